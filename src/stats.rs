use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::{Context, Result};
use hdrhistogram::Histogram;
use hickory_proto::op::ResponseCode;

use crate::config::BenchmarkConfig;
use crate::questions::Question;

/// Classification of a single issued query. Every query yields exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	/// NoError rcode with at least one answer record.
	Success,
	/// NXDomain, or NoError with an empty answer section.
	Negative,
	/// Any other rcode (server or format failure).
	Error,
	/// Response with the TC bit set.
	Truncated,
	/// Response transaction ID differs from the request's.
	IdMismatch,
	/// Timeout, connection failure or decode failure.
	IoError,
}

impl std::fmt::Display for Outcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let label = match self {
			Outcome::Success => "success",
			Outcome::Negative => "negative",
			Outcome::Error => "error",
			Outcome::Truncated => "truncated",
			Outcome::IdMismatch => "idmismatch",
			Outcome::IoError => "ioerror",
		};
		f.write_str(label)
	}
}

/// Everything a worker needs to account for one finished query.
#[derive(Debug, Clone)]
pub struct QueryResult {
	pub outcome: Outcome,
	/// Response code of the decoded reply, if one was decoded.
	pub rcode: Option<ResponseCode>,
	/// Time spent in the send/receive exchange only.
	pub latency: Duration,
	/// HTTP status of the DoH exchange, if any.
	pub doh_status: Option<u16>,
	/// AD bit of the decoded reply.
	pub authenticated: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
	pub total: u64,
	pub success: u64,
	pub negative: u64,
	pub error: u64,
	pub truncated: u64,
	pub idmismatch: u64,
	pub ioerror: u64,
}

/// Statistics owned exclusively by one worker while it runs.
///
/// Workers record without synchronization; ownership moves to the merger
/// once the worker has drained.
#[derive(Debug, Clone)]
pub struct WorkerStats {
	pub counters: Counters,
	pub hist: Histogram<u64>,
	pub qtypes: HashMap<String, u64>,
	pub rcodes: HashMap<ResponseCode, u64>,
	pub doh_status: HashMap<u16, u64>,
	pub auth_domains: HashSet<String>,
	track_rcodes: bool,
	track_dnssec: bool,
}

impl WorkerStats {
	pub fn new(cfg: &BenchmarkConfig) -> Result<Self> {
		let low = (cfg.hist_min.as_nanos() as u64).max(1);
		let high = (cfg.hist_max().as_nanos() as u64).max(low * 2);
		let hist = Histogram::new_with_bounds(low, high, cfg.hist_pre)
			.context("invalid latency histogram bounds")?;
		Ok(WorkerStats {
			counters: Counters::default(),
			hist,
			qtypes: HashMap::new(),
			rcodes: HashMap::new(),
			doh_status: HashMap::new(),
			auth_domains: HashSet::new(),
			track_rcodes: cfg.rcodes,
			track_dnssec: cfg.dnssec,
		})
	}

	pub fn record(&mut self, question: &Question, result: &QueryResult) {
		self.counters.total += 1;
		match result.outcome {
			Outcome::Success => self.counters.success += 1,
			Outcome::Negative => self.counters.negative += 1,
			Outcome::Error => self.counters.error += 1,
			Outcome::Truncated => self.counters.truncated += 1,
			Outcome::IdMismatch => self.counters.idmismatch += 1,
			Outcome::IoError => self.counters.ioerror += 1,
		}

		self.hist
			.saturating_record((result.latency.as_nanos() as u64).max(1));

		*self
			.qtypes
			.entry(question.qtype.to_string())
			.or_insert(0) += 1;

		// The rcode tally is an independent view of the same events: any
		// decoded response contributes, whatever outcome it was given.
		if self.track_rcodes {
			if let Some(rcode) = result.rcode {
				*self.rcodes.entry(rcode).or_insert(0) += 1;
			}
		}

		if let Some(status) = result.doh_status {
			*self.doh_status.entry(status).or_insert(0) += 1;
		}

		if self.track_dnssec && result.authenticated {
			self.auth_domains.insert(question.name.to_ascii());
		}
	}
}

/// Combine per-worker statistics into one aggregate.
///
/// Histograms are merged bucket-wise, counters summed, maps unioned with
/// value summation and sets unioned; the operation is commutative and
/// associative, so worker order does not matter.
pub fn merge(cfg: &BenchmarkConfig, workers: Vec<WorkerStats>) -> Result<WorkerStats> {
	let mut agg = WorkerStats::new(cfg)?;
	for w in workers {
		agg.counters.total += w.counters.total;
		agg.counters.success += w.counters.success;
		agg.counters.negative += w.counters.negative;
		agg.counters.error += w.counters.error;
		agg.counters.truncated += w.counters.truncated;
		agg.counters.idmismatch += w.counters.idmismatch;
		agg.counters.ioerror += w.counters.ioerror;

		agg.hist
			.add(&w.hist)
			.context("failed to merge latency histograms")?;

		for (k, v) in w.qtypes {
			*agg.qtypes.entry(k).or_insert(0) += v;
		}
		for (k, v) in w.rcodes {
			*agg.rcodes.entry(k).or_insert(0) += v;
		}
		for (k, v) in w.doh_status {
			*agg.doh_status.entry(k).or_insert(0) += v;
		}
		agg.auth_domains.extend(w.auth_domains);
	}
	Ok(agg)
}

/// Latency percentiles in (rounded) milliseconds, shaped for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySummary {
	pub min_ms: i64,
	pub mean_ms: i64,
	pub std_ms: i64,
	pub max_ms: i64,
	pub p99_ms: i64,
	pub p95_ms: i64,
	pub p90_ms: i64,
	pub p75_ms: i64,
	pub p50_ms: i64,
}

impl WorkerStats {
	pub fn latency_summary(&self) -> LatencySummary {
		LatencySummary {
			min_ms: ns_to_ms(self.hist.min()),
			mean_ms: ns_to_ms(self.hist.mean() as u64),
			std_ms: ns_to_ms(self.hist.stdev() as u64),
			max_ms: ns_to_ms(self.hist.max()),
			p99_ms: ns_to_ms(self.hist.value_at_quantile(0.99)),
			p95_ms: ns_to_ms(self.hist.value_at_quantile(0.95)),
			p90_ms: ns_to_ms(self.hist.value_at_quantile(0.90)),
			p75_ms: ns_to_ms(self.hist.value_at_quantile(0.75)),
			p50_ms: ns_to_ms(self.hist.value_at_quantile(0.50)),
		}
	}

	/// Recorded latency distribution as (latencyMs, count) points, with
	/// adjacent points that round to the same millisecond folded together.
	pub fn distribution(&self) -> Vec<(i64, u64)> {
		let mut points: Vec<(i64, u64)> = Vec::new();
		for v in self.hist.iter_recorded() {
			let ms = ns_to_ms(v.value_iterated_to());
			let count = v.count_at_value();
			if count == 0 {
				continue;
			}
			match points.last_mut() {
				Some((last_ms, last_count)) if *last_ms == ms => *last_count += count,
				_ => points.push((ms, count)),
			}
		}
		points
	}
}

/// Nanoseconds to milliseconds, rounded to nearest.
pub fn ns_to_ms(ns: u64) -> i64 {
	((ns + 500_000) / 1_000_000) as i64
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::BenchmarkConfig;
	use hickory_proto::rr::{Name, RecordType};
	use std::str::FromStr;

	fn question(qtype: RecordType) -> Question {
		Question {
			name: Name::from_str("example.com.").unwrap(),
			qtype,
		}
	}

	fn result(outcome: Outcome, latency_ms: u64) -> QueryResult {
		QueryResult {
			outcome,
			rcode: Some(ResponseCode::NoError),
			latency: Duration::from_millis(latency_ms),
			doh_status: None,
			authenticated: false,
		}
	}

	#[test]
	fn test_counter_conservation() {
		let cfg = BenchmarkConfig::default();
		let mut stats = WorkerStats::new(&cfg).unwrap();
		let q = question(RecordType::A);
		for outcome in [
			Outcome::Success,
			Outcome::Success,
			Outcome::Negative,
			Outcome::Error,
			Outcome::Truncated,
			Outcome::IdMismatch,
			Outcome::IoError,
		] {
			stats.record(&q, &result(outcome, 5));
		}
		let c = stats.counters;
		assert_eq!(c.total, 7);
		assert_eq!(
			c.success + c.negative + c.error + c.truncated + c.idmismatch + c.ioerror,
			c.total
		);
	}

	#[test]
	fn test_qtype_tally() {
		let cfg = BenchmarkConfig::default();
		let mut stats = WorkerStats::new(&cfg).unwrap();
		stats.record(&question(RecordType::A), &result(Outcome::Success, 1));
		stats.record(&question(RecordType::A), &result(Outcome::Success, 1));
		stats.record(&question(RecordType::AAAA), &result(Outcome::Success, 1));
		assert_eq!(stats.qtypes.get("A"), Some(&2));
		assert_eq!(stats.qtypes.get("AAAA"), Some(&1));
	}

	#[test]
	fn test_rcode_tally_independent_of_outcome() {
		let cfg = BenchmarkConfig::default();
		let mut stats = WorkerStats::new(&cfg).unwrap();
		let q = question(RecordType::A);
		let mut nx = result(Outcome::Negative, 1);
		nx.rcode = Some(ResponseCode::NXDomain);
		stats.record(&q, &nx);
		let mut io = result(Outcome::IoError, 1);
		io.rcode = None;
		stats.record(&q, &io);
		assert_eq!(stats.rcodes.get(&ResponseCode::NXDomain), Some(&1));
		assert_eq!(stats.rcodes.len(), 1);
	}

	#[test]
	fn test_merge_commutative() {
		let cfg = BenchmarkConfig::default();
		let q = question(RecordType::A);

		let mut a = WorkerStats::new(&cfg).unwrap();
		for i in 0..50 {
			a.record(&q, &result(Outcome::Success, i % 20 + 1));
		}
		let mut b = WorkerStats::new(&cfg).unwrap();
		for i in 0..30 {
			b.record(&q, &result(Outcome::Negative, i % 7 + 1));
		}

		let ab = merge(&cfg, vec![a.clone(), b.clone()]).unwrap();
		let ba = merge(&cfg, vec![b, a]).unwrap();

		assert_eq!(ab.counters, ba.counters);
		assert_eq!(ab.qtypes, ba.qtypes);
		assert_eq!(ab.hist.len(), ba.hist.len());
		assert_eq!(
			ab.hist.value_at_quantile(0.5),
			ba.hist.value_at_quantile(0.5)
		);
		assert_eq!(ab.hist.max(), ba.hist.max());
	}

	#[test]
	fn test_merge_sums_histogram_buckets() {
		let cfg = BenchmarkConfig::default();
		let q = question(RecordType::A);
		let mut a = WorkerStats::new(&cfg).unwrap();
		a.record(&q, &result(Outcome::Success, 10));
		let mut b = WorkerStats::new(&cfg).unwrap();
		b.record(&q, &result(Outcome::Success, 10));
		let agg = merge(&cfg, vec![a, b]).unwrap();
		assert_eq!(agg.hist.len(), 2);
	}

	#[test]
	fn test_dnssec_domains_deduplicated() {
		let cfg = BenchmarkConfig {
			dnssec: true,
			..BenchmarkConfig::default()
		};
		let mut stats = WorkerStats::new(&cfg).unwrap();
		let q = question(RecordType::A);
		let mut r = result(Outcome::Success, 1);
		r.authenticated = true;
		stats.record(&q, &r);
		stats.record(&q, &r);
		assert_eq!(stats.auth_domains.len(), 1);
	}

	#[test]
	fn test_ns_to_ms_rounds() {
		assert_eq!(ns_to_ms(0), 0);
		assert_eq!(ns_to_ms(499_999), 0);
		assert_eq!(ns_to_ms(500_000), 1);
		assert_eq!(ns_to_ms(1_500_000), 2);
	}

	#[test]
	fn test_distribution_folds_same_millisecond() {
		let cfg = BenchmarkConfig::default();
		let mut stats = WorkerStats::new(&cfg).unwrap();
		let q = question(RecordType::A);
		for _ in 0..5 {
			stats.record(&q, &result(Outcome::Success, 3));
		}
		let dist = stats.distribution();
		let total: u64 = dist.iter().map(|(_, c)| c).sum();
		assert_eq!(total, 5);
		assert!(dist.iter().all(|(ms, _)| *ms >= 0));
	}
}
