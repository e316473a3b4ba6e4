use std::path::PathBuf;
use std::time::Duration;

use hickory_proto::rr::RecordType;
use thiserror::Error;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_HIST_MIN: Duration = Duration::from_micros(400);
pub const DEFAULT_REQUEST_LOG_PATH: &str = "requests.log";

/// Configuration failures detected before any query is issued.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid server address '{0}'")]
	InvalidServer(String),
	#[error("invalid request delay '{0}', expected <duration> or <duration>-<duration>")]
	InvalidRequestDelay(String),
	#[error("invalid EDNS option '{0}', expected code:hex")]
	InvalidEdnsOpt(String),
	#[error("invalid query type '{0}'")]
	InvalidQueryType(String),
	#[error("unsupported DoH method '{0}', expected get or post")]
	InvalidDohMethod(String),
	#[error("unsupported DoH protocol '{0}', expected 1.1, 2 or 3")]
	InvalidDohProtocol(String),
	#[error("no questions to issue, provide at least one hostname")]
	EmptyQuestionList,
	#[error("failed to load questions from '{source_name}': {reason}")]
	QuestionSource { source_name: String, reason: String },
	#[error("--number and --duration are mutually exclusive")]
	CountAndDuration,
	#[error("--precision must be between 1 and 5, got {0}")]
	InvalidHistPrecision(u8),
	#[error("--probability must be greater than 0, got {0}")]
	InvalidProbability(f64),
	#[error("--concurrency must be at least 1")]
	InvalidConcurrency,
}

/// HTTP method used for DoH exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DohMethod {
	Get,
	Post,
}

/// HTTP protocol version used for DoH exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DohProtocol {
	Http1,
	Http2,
	Http3,
}

/// Delay applied before each request done by a worker.
///
/// Either no delay, a constant duration, or a uniformly random value
/// drawn from an interval after each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDelay {
	None,
	Constant(Duration),
	Range(Duration, Duration),
}

impl RequestDelay {
	/// Parse "0s", "500ms" or "1s-2s" style delay specifications.
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let trimmed = input.trim();
		if let Some((lo, hi)) = trimmed.split_once('-') {
			let lo = parse_duration(lo)
				.ok_or_else(|| ConfigError::InvalidRequestDelay(input.to_string()))?;
			let hi = parse_duration(hi)
				.ok_or_else(|| ConfigError::InvalidRequestDelay(input.to_string()))?;
			if hi < lo {
				return Err(ConfigError::InvalidRequestDelay(input.to_string()));
			}
			return Ok(RequestDelay::Range(lo, hi));
		}
		let d = parse_duration(trimmed)
			.ok_or_else(|| ConfigError::InvalidRequestDelay(input.to_string()))?;
		if d.is_zero() {
			Ok(RequestDelay::None)
		} else {
			Ok(RequestDelay::Constant(d))
		}
	}
}

/// A generic EDNS option attached to every query, given as `code:hex`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdnsOptSpec {
	pub code: u16,
	pub data: Vec<u8>,
}

impl EdnsOptSpec {
	pub fn parse(input: &str) -> Result<Self, ConfigError> {
		let invalid = || ConfigError::InvalidEdnsOpt(input.to_string());
		let (code, hex) = match input.split_once(':') {
			Some((code, hex)) => (code, hex),
			None => (input, ""),
		};
		let code: u16 = code.parse().map_err(|_| invalid())?;
		if hex.len() % 2 != 0 {
			return Err(invalid());
		}
		let mut data = Vec::with_capacity(hex.len() / 2);
		for i in (0..hex.len()).step_by(2) {
			let byte = u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid())?;
			data.push(byte);
		}
		Ok(EdnsOptSpec { code, data })
	}
}

/// Parse a human duration like "400µs", "10ms", "2s", "1m" or "1h".
///
/// Accepts fractional values ("1.5s") and a bare "0".
pub fn parse_duration(input: &str) -> Option<Duration> {
	let s = input.trim();
	if s == "0" {
		return Some(Duration::ZERO);
	}
	let units: [(&str, f64); 7] = [
		("ns", 1.0),
		("µs", 1_000.0),
		("us", 1_000.0),
		("ms", 1_000_000.0),
		("s", 1_000_000_000.0),
		("m", 60.0 * 1_000_000_000.0),
		("h", 3600.0 * 1_000_000_000.0),
	];
	for (suffix, scale) in units {
		if let Some(num) = s.strip_suffix(suffix) {
			// "s" must not swallow the "s" of "ms"/"us"/"ns"
			if num.ends_with(|c: char| c.is_ascii_alphabetic() || c == 'µ') {
				continue;
			}
			let value: f64 = num.parse().ok()?;
			if value < 0.0 || !value.is_finite() {
				return None;
			}
			return Some(Duration::from_nanos((value * scale) as u64));
		}
	}
	None
}

/// The full benchmark configuration, assembled once by the entry point and
/// passed by value to the driver. Batch mode clones it per server.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
	/// Raw server string as given on the command line, also the report key.
	pub server: String,
	pub types: Vec<RecordType>,
	/// Per-worker repeat count; 0 means the run is duration-bounded.
	pub count: u64,
	pub duration: Option<Duration>,
	pub concurrency: u32,
	/// Global queries/second cap across all workers; 0 = unlimited.
	pub rate_limit: u32,
	/// Per-worker queries/second cap; 0 = unlimited.
	pub rate_limit_worker: u32,
	/// Bernoulli inclusion probability per question per pass; >= 1 means always.
	pub probability: f64,
	/// Queries per connection before reconnecting (plain DNS and DoT); 0 = unbounded.
	pub qper_conn: u64,
	pub separate_worker_connections: bool,
	pub recurse: bool,
	pub dnssec: bool,
	/// EDNS0 UDP buffer size; 0 disables EDNS0 unless dnssec or ednsopt need it.
	pub edns0: u16,
	pub ednsopt: Option<EdnsOptSpec>,
	pub tcp: bool,
	pub dot: bool,
	pub insecure: bool,
	pub doh_method: DohMethod,
	pub doh_protocol: DohProtocol,
	pub write_timeout: Duration,
	pub read_timeout: Duration,
	pub connect_timeout: Duration,
	pub request_timeout: Duration,
	pub request_delay: RequestDelay,
	pub hist_min: Duration,
	pub hist_max: Option<Duration>,
	pub hist_pre: u8,
	pub rcodes: bool,
	pub progress: bool,
	pub silent: bool,
	pub json: bool,
	pub distribution: bool,
	pub request_log: Option<PathBuf>,
}

impl BenchmarkConfig {
	/// Check the cross-field invariants that clap cannot express.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.count > 0 && self.duration.is_some() {
			return Err(ConfigError::CountAndDuration);
		}
		if !(1..=5).contains(&self.hist_pre) {
			return Err(ConfigError::InvalidHistPrecision(self.hist_pre));
		}
		if self.probability <= 0.0 || !self.probability.is_finite() {
			return Err(ConfigError::InvalidProbability(self.probability));
		}
		if self.concurrency == 0 {
			return Err(ConfigError::InvalidConcurrency);
		}
		Ok(())
	}

	/// Upper bound of the latency histogram; defaults to the request timeout.
	pub fn hist_max(&self) -> Duration {
		self.hist_max.unwrap_or(self.request_timeout)
	}
}

impl Default for BenchmarkConfig {
	fn default() -> Self {
		BenchmarkConfig {
			server: "127.0.0.1".to_string(),
			types: vec![RecordType::A],
			count: 1,
			duration: None,
			concurrency: 1,
			rate_limit: 0,
			rate_limit_worker: 0,
			probability: 1.0,
			qper_conn: 0,
			separate_worker_connections: false,
			recurse: true,
			dnssec: false,
			edns0: 0,
			ednsopt: None,
			tcp: false,
			dot: false,
			insecure: false,
			doh_method: DohMethod::Post,
			doh_protocol: DohProtocol::Http1,
			write_timeout: DEFAULT_WRITE_TIMEOUT,
			read_timeout: DEFAULT_READ_TIMEOUT,
			connect_timeout: DEFAULT_CONNECT_TIMEOUT,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			request_delay: RequestDelay::None,
			hist_min: DEFAULT_HIST_MIN,
			hist_max: None,
			hist_pre: 1,
			rcodes: true,
			progress: true,
			silent: false,
			json: false,
			distribution: true,
			request_log: None,
		}
	}
}
