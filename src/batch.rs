use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::bench;
use crate::config::BenchmarkConfig;
use crate::geo::{self, GeoLookup};
use crate::questions::Question;
use crate::report;
use crate::stats;

/// Run the benchmark against a comma-separated list of servers, one full
/// run per server in process, and collect the per-server JSON results
/// keyed by the original server strings in their given order.
pub async fn run(
	cfg: &BenchmarkConfig,
	server_list: &str,
	questions: Arc<Vec<Question>>,
	geo: &dyn GeoLookup,
	cancel: CancellationToken,
) -> Result<serde_json::Value> {
	let servers: Vec<String> = server_list
		.split(',')
		.map(|s| s.trim().to_string())
		.filter(|s| !s.is_empty())
		.collect();
	if servers.is_empty() {
		bail!("no servers provided for batch benchmark");
	}

	eprintln!("starting batch benchmark for {} servers", servers.len());

	// Keyed output preserves the input order; progress goes to stderr so
	// stdout stays pure JSON.
	let mut results = serde_json::Map::new();
	for server in servers {
		if cancel.is_cancelled() {
			break;
		}
		eprintln!("benchmarking {server}");

		let mut sub = cfg.clone();
		sub.server = server.clone();
		sub.silent = true;
		sub.progress = false;

		let started = Instant::now();
		let workers = match bench::run(&sub, questions.clone(), cancel.clone()).await {
			Ok(workers) => workers,
			Err(e) => {
				eprintln!("error benchmarking {server}: {e:#}");
				continue;
			}
		};
		let elapsed = started.elapsed();

		let agg = stats::merge(&sub, workers)?;
		let json = report::build_json_report(
			&sub,
			&agg,
			elapsed,
			geo.lookup(&server),
			geo::extract_ip(&server),
		);
		results.insert(
			server.clone(),
			serde_json::to_value(json).context("failed to serialize benchmark result")?,
		);
		eprintln!("completed {server}");
	}

	Ok(serde_json::Value::Object(results))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::bench::mockdns::{spawn, MockBehavior};
	use crate::geo::StaticLookup;
	use hickory_proto::rr::RecordType;

	async fn question_list() -> Arc<Vec<Question>> {
		Arc::new(
			crate::questions::load(&["example.com".to_string()], &[RecordType::A])
				.await
				.unwrap(),
		)
	}

	#[tokio::test]
	async fn test_empty_server_list_rejected() {
		let cfg = BenchmarkConfig::default();
		let result = run(
			&cfg,
			" , ,",
			question_list().await,
			&StaticLookup,
			CancellationToken::new(),
		)
		.await;
		assert!(result.is_err());
	}

	#[tokio::test]
	async fn test_batch_preserves_server_order() {
		let first = spawn(MockBehavior::Answer).await;
		let second = spawn(MockBehavior::Answer).await;
		let third = spawn(MockBehavior::Answer).await;
		let list = format!("{first},{second},{third}");

		let cfg = BenchmarkConfig {
			count: 10,
			..BenchmarkConfig::default()
		};
		let results = run(
			&cfg,
			&list,
			question_list().await,
			&StaticLookup,
			CancellationToken::new(),
		)
		.await
		.unwrap();

		let object = results.as_object().unwrap();
		let keys: Vec<&String> = object.keys().collect();
		assert_eq!(
			keys,
			vec![&first.to_string(), &second.to_string(), &third.to_string()]
		);
		for (_, entry) in object {
			let entry = entry.as_object().unwrap();
			assert_eq!(entry["totalRequests"], 10);
			assert_eq!(entry["totalSuccessResponses"], 10);
			assert!(entry.contains_key("score"));
			assert!(entry.contains_key("latencyStats"));
		}
	}
}
