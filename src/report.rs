use std::collections::BTreeMap;
use std::time::Duration;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use hickory_proto::op::ResponseCode;
use serde::Serialize;

use crate::config::BenchmarkConfig;
use crate::scoring::{calculate_score, ScoreInput, ScoreResult};
use crate::stats::WorkerStats;

/// Standard mnemonic for a DNS response code, e.g. NOERROR or NXDOMAIN.
pub fn rcode_name(rcode: ResponseCode) -> String {
	match rcode {
		ResponseCode::NoError => "NOERROR".to_string(),
		ResponseCode::FormErr => "FORMERR".to_string(),
		ResponseCode::ServFail => "SERVFAIL".to_string(),
		ResponseCode::NXDomain => "NXDOMAIN".to_string(),
		ResponseCode::NotImp => "NOTIMP".to_string(),
		ResponseCode::Refused => "REFUSED".to_string(),
		ResponseCode::YXDomain => "YXDOMAIN".to_string(),
		ResponseCode::YXRRSet => "YXRRSET".to_string(),
		ResponseCode::NXRRSet => "NXRRSET".to_string(),
		ResponseCode::NotAuth => "NOTAUTH".to_string(),
		ResponseCode::NotZone => "NOTZONE".to_string(),
		ResponseCode::BADVERS => "BADVERS".to_string(),
		ResponseCode::BADSIG => "BADSIG".to_string(),
		ResponseCode::BADKEY => "BADKEY".to_string(),
		ResponseCode::BADTIME => "BADTIME".to_string(),
		other => format!("RCODE{}", u16::from(other)),
	}
}

#[derive(Debug, Serialize)]
pub struct JsonLatencyStats {
	#[serde(rename = "minMs")]
	pub min_ms: i64,
	#[serde(rename = "meanMs")]
	pub mean_ms: i64,
	#[serde(rename = "stdMs")]
	pub std_ms: i64,
	#[serde(rename = "maxMs")]
	pub max_ms: i64,
	#[serde(rename = "p99Ms")]
	pub p99_ms: i64,
	#[serde(rename = "p95Ms")]
	pub p95_ms: i64,
	#[serde(rename = "p90Ms")]
	pub p90_ms: i64,
	#[serde(rename = "p75Ms")]
	pub p75_ms: i64,
	#[serde(rename = "p50Ms")]
	pub p50_ms: i64,
}

#[derive(Debug, Serialize)]
pub struct JsonHistogramPoint {
	#[serde(rename = "latencyMs")]
	pub latency_ms: i64,
	pub count: u64,
}

/// The machine-readable result for one server, also the per-entry shape of
/// the batch output.
#[derive(Debug, Serialize)]
pub struct JsonReport {
	#[serde(rename = "totalRequests")]
	pub total_requests: u64,
	#[serde(rename = "totalSuccessResponses")]
	pub total_success_responses: u64,
	#[serde(rename = "totalNegativeResponses")]
	pub total_negative_responses: u64,
	#[serde(rename = "totalErrorResponses")]
	pub total_error_responses: u64,
	#[serde(rename = "totalIOErrors")]
	pub total_io_errors: u64,
	#[serde(rename = "totalIDmismatch")]
	pub total_id_mismatch: u64,
	#[serde(rename = "totalTruncatedResponses")]
	pub total_truncated_responses: u64,
	#[serde(rename = "responseRcodes", skip_serializing_if = "Option::is_none")]
	pub response_rcodes: Option<BTreeMap<String, u64>>,
	#[serde(rename = "questionTypes")]
	pub question_types: BTreeMap<String, u64>,
	#[serde(rename = "queriesPerSecond")]
	pub queries_per_second: f64,
	#[serde(rename = "benchmarkDurationSeconds")]
	pub benchmark_duration_seconds: f64,
	#[serde(rename = "latencyStats")]
	pub latency_stats: JsonLatencyStats,
	#[serde(rename = "latencyDistribution", skip_serializing_if = "Option::is_none")]
	pub latency_distribution: Option<Vec<JsonHistogramPoint>>,
	#[serde(
		rename = "dohHTTPResponseStatusCodes",
		skip_serializing_if = "Option::is_none"
	)]
	pub doh_http_response_status_codes: Option<BTreeMap<u16, u64>>,
	#[serde(
		rename = "totalDNSSECSecuredDomains",
		skip_serializing_if = "Option::is_none"
	)]
	pub total_dnssec_secured_domains: Option<u64>,
	pub geocode: String,
	pub ip: String,
	pub score: ScoreResult,
}

/// Queries per second rounded to two decimals, the value used both in the
/// report and as the scoring input.
pub fn queries_per_second(total: u64, elapsed: Duration) -> f64 {
	let secs = elapsed.as_secs_f64();
	if secs <= 0.0 {
		return 0.0;
	}
	(total as f64 / secs * 100.0).round() / 100.0
}

pub fn build_json_report(
	cfg: &BenchmarkConfig,
	agg: &WorkerStats,
	elapsed: Duration,
	geocode: String,
	ip: String,
) -> JsonReport {
	let summary = agg.latency_summary();
	let qps = queries_per_second(agg.counters.total, elapsed);

	let response_rcodes = if cfg.rcodes {
		Some(
			agg.rcodes
				.iter()
				.map(|(rcode, count)| (rcode_name(*rcode), *count))
				.collect(),
		)
	} else {
		None
	};

	let latency_distribution = if cfg.distribution {
		Some(
			agg.distribution()
				.into_iter()
				.map(|(latency_ms, count)| JsonHistogramPoint { latency_ms, count })
				.collect(),
		)
	} else {
		None
	};

	let doh_http_response_status_codes = if agg.doh_status.is_empty() {
		None
	} else {
		Some(agg.doh_status.iter().map(|(k, v)| (*k, *v)).collect())
	};

	let score = calculate_score(ScoreInput {
		total_requests: agg.counters.total,
		total_success: agg.counters.success,
		total_errors: agg.counters.error,
		total_io_errors: agg.counters.ioerror,
		queries_per_second: qps,
		mean_ms: summary.mean_ms,
		std_ms: summary.std_ms,
		p50_ms: summary.p50_ms,
		p95_ms: summary.p95_ms,
	});

	JsonReport {
		total_requests: agg.counters.total,
		total_success_responses: agg.counters.success,
		total_negative_responses: agg.counters.negative,
		total_error_responses: agg.counters.error,
		total_io_errors: agg.counters.ioerror,
		total_id_mismatch: agg.counters.idmismatch,
		total_truncated_responses: agg.counters.truncated,
		response_rcodes,
		question_types: agg.qtypes.iter().map(|(k, v)| (k.clone(), *v)).collect(),
		queries_per_second: qps,
		benchmark_duration_seconds: (elapsed.as_secs_f64() * 1000.0).round() / 1000.0,
		latency_stats: JsonLatencyStats {
			min_ms: summary.min_ms,
			mean_ms: summary.mean_ms,
			std_ms: summary.std_ms,
			max_ms: summary.max_ms,
			p99_ms: summary.p99_ms,
			p95_ms: summary.p95_ms,
			p90_ms: summary.p90_ms,
			p75_ms: summary.p75_ms,
			p50_ms: summary.p50_ms,
		},
		latency_distribution,
		doh_http_response_status_codes,
		total_dnssec_secured_domains: if cfg.dnssec {
			Some(agg.auth_domains.len() as u64)
		} else {
			None
		},
		geocode,
		ip,
		score,
	}
}

/// Print the human-readable run summary to stdout.
pub fn print_summary(cfg: &BenchmarkConfig, agg: &WorkerStats, elapsed: Duration) {
	let c = &agg.counters;
	println!("Benchmark finished: {}", cfg.server);
	println!("===================");
	println!("Total requests:      {}", c.total);
	println!("Success responses:   {}", c.success);
	println!("Negative responses:  {}", c.negative);
	println!("Error responses:     {}", c.error);
	println!("Truncated responses: {}", c.truncated);
	println!("ID mismatches:       {}", c.idmismatch);
	println!("IO errors:           {}", c.ioerror);
	println!(
		"Duration:            {:.2}s",
		elapsed.as_secs_f64()
	);
	println!(
		"Queries per second:  {:.2}",
		queries_per_second(c.total, elapsed)
	);

	if cfg.rcodes && !agg.rcodes.is_empty() {
		let mut entries: Vec<(String, u64)> = agg
			.rcodes
			.iter()
			.map(|(rcode, count)| (rcode_name(*rcode), *count))
			.collect();
		entries.sort();
		println!();
		println!("Response codes:");
		for (name, count) in entries {
			println!("  {name}: {count}");
		}
	}

	if !agg.qtypes.is_empty() {
		let mut entries: Vec<(String, u64)> =
			agg.qtypes.iter().map(|(k, v)| (k.clone(), *v)).collect();
		entries.sort();
		println!();
		println!("Question types:");
		for (name, count) in entries {
			println!("  {name}: {count}");
		}
	}

	if !agg.doh_status.is_empty() {
		let mut entries: Vec<(u16, u64)> =
			agg.doh_status.iter().map(|(k, v)| (*k, *v)).collect();
		entries.sort();
		println!();
		println!("DoH HTTP status codes:");
		for (status, count) in entries {
			println!("  {status}: {count}");
		}
	}

	if cfg.dnssec {
		println!();
		println!("DNSSEC secured domains: {}", agg.auth_domains.len());
	}

	if c.total > 0 {
		let summary = agg.latency_summary();
		let mut table = Table::new();
		table.load_preset(UTF8_FULL);
		table.set_content_arrangement(ContentArrangement::Dynamic);
		table.set_header(vec![
			"Min", "Mean", "Std", "Max", "p99", "p95", "p90", "p75", "p50",
		]);
		table.add_row(vec![
			format!("{} ms", summary.min_ms),
			format!("{} ms", summary.mean_ms),
			format!("{} ms", summary.std_ms),
			format!("{} ms", summary.max_ms),
			format!("{} ms", summary.p99_ms),
			format!("{} ms", summary.p95_ms),
			format!("{} ms", summary.p90_ms),
			format!("{} ms", summary.p75_ms),
			format!("{} ms", summary.p50_ms),
		]);
		println!();
		println!("Latency (ms):");
		println!("{table}");
	}

	if cfg.distribution && c.total > 0 {
		let dist = agg.distribution();
		if !dist.is_empty() {
			let peak = dist.iter().map(|(_, count)| *count).max().unwrap_or(1);
			println!();
			println!("Latency distribution:");
			for (ms, count) in dist {
				let width = (count * 40 / peak.max(1)) as usize;
				println!("  {:>6} ms  {:>8}  {}", ms, count, "#".repeat(width.max(1)));
			}
		}
	}

	let qps = queries_per_second(c.total, elapsed);
	let summary = agg.latency_summary();
	let score = calculate_score(ScoreInput {
		total_requests: c.total,
		total_success: c.success,
		total_errors: c.error,
		total_io_errors: c.ioerror,
		queries_per_second: qps,
		mean_ms: summary.mean_ms,
		std_ms: summary.std_ms,
		p50_ms: summary.p50_ms,
		p95_ms: summary.p95_ms,
	});
	println!();
	println!(
		"Score: {:.1} (success {:.1}, errors {:.1}, latency {:.1}, qps {:.1})",
		score.total, score.success_rate, score.error_rate, score.latency, score.qps
	);
}
