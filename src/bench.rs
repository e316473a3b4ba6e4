use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::BenchmarkConfig;
use crate::pacing::{self, RateLimiter};
use crate::questions::Question;
use crate::server::ServerAddr;
use crate::stats::{QueryResult, WorkerStats};
use crate::transport::Backend;

/// Attempts allowed for the initial connectivity check before the run is
/// declared failed.
const FIRST_CONNECT_ATTEMPTS: u32 = 3;

/// Run the benchmark: spawn the worker pool, drive it until the budget is
/// exhausted, the deadline passes or the run is cancelled, then hand back
/// the per-worker statistics for merging.
pub async fn run(
	cfg: &BenchmarkConfig,
	questions: Arc<Vec<Question>>,
	cancel: CancellationToken,
) -> Result<Vec<WorkerStats>> {
	let addr = ServerAddr::parse(&cfg.server, cfg)?;
	let cfg = Arc::new(cfg.clone());

	// With shared connections every worker multiplexes over one backend
	// (a pool per host underneath); otherwise each worker dials its own.
	let shared_backend = if cfg.separate_worker_connections {
		None
	} else {
		Some(Arc::new(Backend::build(&addr, &cfg).await?))
	};

	match &shared_backend {
		Some(backend) => first_connect_check(backend).await?,
		None => {
			let probe = Backend::build(&addr, &cfg).await?;
			first_connect_check(&probe).await?;
		}
	}

	let run_token = cancel.child_token();
	if let Some(duration) = cfg.duration {
		let deadline_token = run_token.clone();
		tokio::spawn(async move {
			tokio::time::sleep(duration).await;
			deadline_token.cancel();
		});
	}

	let issued = Arc::new(AtomicU64::new(0));
	let progress_token = CancellationToken::new();
	let progress_task = if cfg.progress && !cfg.silent {
		Some(spawn_progress_ticker(issued.clone(), progress_token.clone()))
	} else {
		None
	};

	let (log_tx, log_task) = match &cfg.request_log {
		Some(path) => spawn_request_logger(path.clone()).await,
		None => (None, None),
	};

	let global_limit = RateLimiter::new(cfg.rate_limit).map(Arc::new);

	let template = WorkerStats::new(&cfg)?;
	let mut handles: Vec<JoinHandle<WorkerStats>> = Vec::with_capacity(cfg.concurrency as usize);
	for worker_id in 0..cfg.concurrency {
		let backend = match &shared_backend {
			Some(backend) => backend.clone(),
			None => Arc::new(Backend::build(&addr, &cfg).await?),
		};
		handles.push(tokio::spawn(worker(
			worker_id,
			cfg.clone(),
			questions.clone(),
			backend,
			global_limit.clone(),
			run_token.clone(),
			issued.clone(),
			log_tx.clone(),
			template.clone(),
		)));
	}
	drop(log_tx);

	let mut results = Vec::with_capacity(handles.len());
	for handle in handles {
		results.push(handle.await.context("benchmark worker panicked")?);
	}

	progress_token.cancel();
	if let Some(task) = progress_task {
		let _ = task.await;
	}
	if let Some(task) = log_task {
		let _ = task.await;
	}

	let total: u64 = results.iter().map(|s| s.counters.total).sum();
	if cancel.is_cancelled() && total == 0 {
		anyhow::bail!("benchmark cancelled before any results");
	}

	Ok(results)
}

/// Initial connectivity check: a handful of dial attempts, none of which
/// issues a DNS query or touches the statistics.
async fn first_connect_check(backend: &Backend) -> Result<()> {
	let mut last_err = anyhow::anyhow!("no connection attempt made");
	for _ in 0..FIRST_CONNECT_ATTEMPTS {
		match backend.probe().await {
			Ok(()) => return Ok(()),
			Err(e) => last_err = e,
		}
	}
	Err(last_err).context("failed to establish initial connectivity to the server")
}

#[allow(clippy::too_many_arguments)]
async fn worker(
	id: u32,
	cfg: Arc<BenchmarkConfig>,
	questions: Arc<Vec<Question>>,
	backend: Arc<Backend>,
	global_limit: Option<Arc<RateLimiter>>,
	run_token: CancellationToken,
	issued: Arc<AtomicU64>,
	log_tx: Option<mpsc::UnboundedSender<String>>,
	mut stats: WorkerStats,
) -> WorkerStats {
	let mut rng = StdRng::from_entropy();
	let worker_limit = RateLimiter::new(cfg.rate_limit_worker);

	// Every worker walks the same shared list in its own order.
	let mut order: Vec<usize> = (0..questions.len()).collect();
	order.shuffle(&mut rng);

	let mut pass = 0u64;
	'run: loop {
		for &idx in &order {
			if run_token.is_cancelled() {
				break 'run;
			}
			let question = &questions[idx];
			if cfg.probability < 1.0 && !rng.gen_bool(cfg.probability) {
				continue;
			}
			if let Some(limit) = &global_limit {
				if !limit.acquire(&run_token).await {
					break 'run;
				}
			}
			if let Some(limit) = &worker_limit {
				if !limit.acquire(&run_token).await {
					break 'run;
				}
			}
			if !pacing::request_delay(cfg.request_delay, &mut rng, &run_token).await {
				break 'run;
			}

			let result = backend.query(question, &cfg).await;
			stats.record(question, &result);
			issued.fetch_add(1, Ordering::Relaxed);
			if let Some(tx) = &log_tx {
				let _ = tx.send(log_line(id, question, &result));
			}
		}
		pass += 1;
		if cfg.count > 0 && pass >= cfg.count {
			break;
		}
	}

	stats
}

fn log_line(worker: u32, question: &Question, result: &QueryResult) -> String {
	let epoch_ms = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis())
		.unwrap_or(0);
	let rcode = match result.rcode {
		Some(rcode) => crate::report::rcode_name(rcode),
		None => "-".to_string(),
	};
	format!(
		"ts={} worker={} name={} type={} outcome={} rcode={} duration_ms={:.3}",
		epoch_ms,
		worker,
		question.name.to_ascii(),
		question.qtype,
		result.outcome,
		rcode,
		result.latency.as_secs_f64() * 1000.0,
	)
}

fn spawn_progress_ticker(issued: Arc<AtomicU64>, token: CancellationToken) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
		interval.tick().await;
		loop {
			tokio::select! {
				_ = token.cancelled() => break,
				_ = interval.tick() => {
					eprintln!("progress: {} requests issued", issued.load(Ordering::Relaxed));
				}
			}
		}
	})
}

/// Per-request logging runs on its own task fed over a channel; a logging
/// failure never fails the benchmark.
async fn spawn_request_logger(
	path: std::path::PathBuf,
) -> (Option<mpsc::UnboundedSender<String>>, Option<JoinHandle<()>>) {
	let file = match tokio::fs::OpenOptions::new()
		.create(true)
		.append(true)
		.open(&path)
		.await
	{
		Ok(file) => file,
		Err(e) => {
			warn!("cannot open request log {}: {e}", path.display());
			return (None, None);
		}
	};

	let (tx, mut rx) = mpsc::unbounded_channel::<String>();
	let task = tokio::spawn(async move {
		let mut writer = tokio::io::BufWriter::new(file);
		while let Some(line) = rx.recv().await {
			if writer.write_all(line.as_bytes()).await.is_err() {
				break;
			}
			if writer.write_all(b"\n").await.is_err() {
				break;
			}
		}
		let _ = writer.flush().await;
	});
	(Some(tx), Some(task))
}

#[cfg(test)]
pub(crate) mod mockdns {
	use hickory_proto::op::{Message, MessageType, ResponseCode};
	use hickory_proto::rr::rdata::A;
	use hickory_proto::rr::{RData, Record};
	use std::net::{Ipv4Addr, SocketAddr};
	use tokio::net::UdpSocket;

	#[derive(Debug, Clone, Copy)]
	pub enum MockBehavior {
		/// NoError with one A answer.
		Answer,
		/// NXDomain, no answers.
		NxDomain,
		/// ServFail, no answers.
		ServFail,
		/// NoError answer under a transaction ID different from the request's.
		WrongId,
		/// NoError with the TC bit set.
		Truncated,
	}

	/// Start a UDP resolver on a loopback port that answers every request
	/// according to `behavior`. The task lives until the socket errors.
	pub async fn spawn(behavior: MockBehavior) -> SocketAddr {
		let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
		let addr = socket.local_addr().unwrap();
		tokio::spawn(async move {
			let mut buf = vec![0u8; 65_535];
			loop {
				let (len, peer) = match socket.recv_from(&mut buf).await {
					Ok(received) => received,
					Err(_) => break,
				};
				let request = match Message::from_vec(&buf[..len]) {
					Ok(request) => request,
					Err(_) => continue,
				};
				let mut reply = request.clone();
				reply.set_message_type(MessageType::Response);
				match behavior {
					MockBehavior::Answer | MockBehavior::WrongId => {
						if let Some(query) = request.queries().first() {
							reply.add_answer(Record::from_rdata(
								query.name().clone(),
								60,
								RData::A(A::from(Ipv4Addr::new(192, 0, 2, 1))),
							));
						}
						if matches!(behavior, MockBehavior::WrongId) {
							reply.set_id(request.id().wrapping_add(1));
						}
					}
					MockBehavior::NxDomain => {
						reply.set_response_code(ResponseCode::NXDomain);
					}
					MockBehavior::ServFail => {
						reply.set_response_code(ResponseCode::ServFail);
					}
					MockBehavior::Truncated => {
						reply.set_truncated(true);
					}
				}
				if let Ok(bytes) = reply.to_vec() {
					let _ = socket.send_to(&bytes, peer).await;
				}
			}
		});
		addr
	}
}
