mod batch;
mod bench;
mod cli;
mod config;
mod doh;
mod doq;
mod dot;
mod geo;
mod pacing;
mod questions;
mod report;
mod scoring;
mod server;
mod stats;
mod tls;
mod transport;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, FailCondition};
use crate::geo::{GeoLookup, StaticLookup};

#[tokio::main]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(EnvFilter::from_default_env())
		.with_writer(std::io::stderr)
		.init();

	let cli = Cli::parse();
	match run(cli).await {
		Ok(true) => {}
		Ok(false) => std::process::exit(1),
		Err(e) => {
			eprintln!("dnstress: {e:#}");
			std::process::exit(1);
		}
	}
}

/// Returns Ok(true) on a clean run, Ok(false) when a --fail condition was
/// matched after a completed run.
async fn run(cli: Cli) -> Result<bool> {
	let cfg = cli.to_config()?;
	let question_list = Arc::new(questions::load(&cli.queries, &cfg.types).await?);

	let cancel = CancellationToken::new();
	spawn_signal_handler(cancel.clone());

	let geo = StaticLookup;

	if let Some(servers) = &cli.batch_json {
		let results = batch::run(&cfg, servers, question_list, &geo, cancel).await?;
		println!("{}", serde_json::to_string_pretty(&results)?);
		return Ok(true);
	}

	let started = Instant::now();
	let workers = bench::run(&cfg, question_list, cancel).await?;
	let elapsed = started.elapsed();
	let aggregate = stats::merge(&cfg, workers)?;

	if cfg.json {
		let result = report::build_json_report(
			&cfg,
			&aggregate,
			elapsed,
			geo.lookup(&cfg.server),
			geo::extract_ip(&cfg.server),
		);
		println!("{}", serde_json::to_string_pretty(&result)?);
	} else if !cfg.silent {
		report::print_summary(&cfg, &aggregate, elapsed);
	}

	for condition in &cli.fail {
		let c = &aggregate.counters;
		let matched = match condition {
			FailCondition::Ioerror => c.ioerror > 0,
			FailCondition::Negative => c.negative > 0,
			FailCondition::Error => c.error > 0,
			FailCondition::Idmismatch => c.idmismatch > 0,
		};
		if matched {
			return Ok(false);
		}
	}

	Ok(true)
}

/// First SIGINT cancels the run and lets in-flight queries drain; a second
/// one aborts the process.
fn spawn_signal_handler(cancel: CancellationToken) {
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_err() {
			return;
		}
		eprintln!("interrupt received, stopping benchmark");
		cancel.cancel();
		if tokio::signal::ctrl_c().await.is_ok() {
			eprintln!("second interrupt, aborting");
			std::process::exit(1);
		}
	});
}
