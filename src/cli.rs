use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::config::{
	parse_duration, BenchmarkConfig, ConfigError, DohMethod, DohProtocol, EdnsOptSpec,
	RequestDelay, DEFAULT_REQUEST_LOG_PATH,
};
use crate::questions;

/// Recoverable outcome categories that can be turned into a non-zero exit
/// code after a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FailCondition {
	Ioerror,
	Negative,
	Error,
	Idmismatch,
}

fn duration_value(s: &str) -> Result<Duration, String> {
	parse_duration(s).ok_or_else(|| format!("invalid duration '{s}'"))
}

/// A high QPS DNS benchmark over UDP, TCP, DoT, DoH and DoQ
#[derive(Parser, Debug)]
#[command(name = "dnstress", version, about)]
pub struct Cli {
	/// Server to benchmark. Plain DNS: <IP/host>[:port] (port 53). DoT:
	/// tls://<IP/host>[:port] (port 853). DoH: https://<IP/host>[:port][/path]
	/// or http://... (port 443/80, path /dns-query). DoQ:
	/// quic://<IP/host>[:port] (port 853)
	#[arg(short = 's', long, default_value = "127.0.0.1")]
	pub server: String,

	/// Query type. Repeatable; each query is duplicated for each type
	#[arg(short = 't', long = "type", default_value = "A")]
	pub types: Vec<String>,

	/// How many times the provided queries are repeated per worker.
	/// Total issued = types*number*concurrency*len(queries)
	#[arg(short = 'n', long, conflicts_with = "duration")]
	pub number: Option<u64>,

	/// Run for the given duration instead of a fixed count, looping over
	/// the question list
	#[arg(short = 'd', long, value_parser = duration_value)]
	pub duration: Option<Duration>,

	/// Number of concurrent workers
	#[arg(short = 'c', long, default_value_t = 1)]
	pub concurrency: u32,

	/// Global queries/second limit across all workers; 0 = unlimited
	#[arg(short = 'l', long = "rate-limit", default_value_t = 0)]
	pub rate_limit: u32,

	/// Queries/second limit applied within each worker; 0 = unlimited
	#[arg(long = "rate-limit-worker", default_value_t = 0)]
	pub rate_limit_worker: u32,

	/// Use TCP for plain DNS requests
	#[arg(long)]
	pub tcp: bool,

	/// Use DoT (DNS over TLS)
	#[arg(long)]
	pub dot: bool,

	/// Disable server TLS certificate validation (DoT, DoH, DoQ)
	#[arg(long)]
	pub insecure: bool,

	/// HTTP method for DoH requests: get or post
	#[arg(long = "doh-method", default_value = "post")]
	pub doh_method: String,

	/// HTTP protocol for DoH requests: 1.1, 2 or 3
	#[arg(long = "doh-protocol", default_value = "1.1")]
	pub doh_protocol: String,

	/// Do not set the Recursion Desired bit
	#[arg(long = "no-recurse")]
	pub no_recurse: bool,

	/// Set the DNSSEC OK bit on all requests
	#[arg(long)]
	pub dnssec: bool,

	/// EDNS0 buffer size; 0 disables EDNS0
	#[arg(long, default_value_t = 0)]
	pub edns0: u16,

	/// Generic EDNS option as code[:hex]
	#[arg(long)]
	pub ednsopt: Option<String>,

	/// Inclusion probability per question per pass; >= 1 means every
	/// question every pass
	#[arg(long, default_value_t = 1.0)]
	pub probability: f64,

	/// Queries sent on one connection before reconnecting (plain DNS and
	/// DoT only); 0 = unlimited
	#[arg(long = "query-per-conn", default_value_t = 0)]
	pub query_per_conn: u64,

	/// Give each worker its own connections instead of sharing a pool
	#[arg(long = "separate-worker-connections")]
	pub separate_worker_connections: bool,

	/// Delay before each request: a duration or a <min>-<max> interval
	#[arg(long = "request-delay", default_value = "0s")]
	pub request_delay: String,

	/// Write timeout
	#[arg(long = "write", value_parser = duration_value, default_value = "1s")]
	pub write_timeout: Duration,

	/// Read timeout
	#[arg(long = "read", value_parser = duration_value, default_value = "3s")]
	pub read_timeout: Duration,

	/// Connect timeout
	#[arg(long = "connect", value_parser = duration_value, default_value = "1s")]
	pub connect_timeout: Duration,

	/// Request timeout bounding a whole send/receive exchange
	#[arg(long = "request", value_parser = duration_value, default_value = "5s")]
	pub request_timeout: Duration,

	/// Minimum value for the latency histogram
	#[arg(long = "min", value_parser = duration_value, default_value = "400us")]
	pub hist_min: Duration,

	/// Maximum value for the latency histogram; defaults to the request
	/// timeout
	#[arg(long = "max", value_parser = duration_value)]
	pub hist_max: Option<Duration>,

	/// Significant figures of histogram precision [1-5]
	#[arg(long = "precision", default_value_t = 1)]
	pub precision: u8,

	/// Do not tally DNS response codes
	#[arg(long = "no-codes")]
	pub no_codes: bool,

	/// Do not report progress while the benchmark runs
	#[arg(long = "no-progress")]
	pub no_progress: bool,

	/// Do not include the latency distribution in reports
	#[arg(long = "no-distribution")]
	pub no_distribution: bool,

	/// Exit non-zero when the given outcome occurred at least once.
	/// Repeatable
	#[arg(long = "fail")]
	pub fail: Vec<FailCondition>,

	/// Log every request to the file given by --log-requests-path
	#[arg(long = "log-requests")]
	pub log_requests: bool,

	/// Path of the request log, appended to if it exists
	#[arg(long = "log-requests-path", default_value = DEFAULT_REQUEST_LOG_PATH)]
	pub log_requests_path: PathBuf,

	/// Report benchmark results as JSON
	#[arg(long)]
	pub json: bool,

	/// Run against a comma-separated server list and emit one JSON object
	/// keyed by server
	#[arg(long = "batch-json")]
	pub batch_json: Option<String>,

	/// Disable stdout output
	#[arg(long)]
	pub silent: bool,

	/// Queries to issue: a hostname, @<file-path>, or an http(s) URL to a
	/// hostname list
	#[arg(required = true)]
	pub queries: Vec<String>,
}

impl Cli {
	/// Assemble the benchmark configuration, rejecting anything clap could
	/// not validate on its own.
	pub fn to_config(&self) -> Result<BenchmarkConfig, ConfigError> {
		let doh_method = match self.doh_method.to_ascii_lowercase().as_str() {
			"get" => DohMethod::Get,
			"post" => DohMethod::Post,
			_ => return Err(ConfigError::InvalidDohMethod(self.doh_method.clone())),
		};
		let doh_protocol = match self.doh_protocol.as_str() {
			"1.1" => DohProtocol::Http1,
			"2" => DohProtocol::Http2,
			"3" => DohProtocol::Http3,
			_ => return Err(ConfigError::InvalidDohProtocol(self.doh_protocol.clone())),
		};

		let ednsopt = match &self.ednsopt {
			Some(spec) => Some(EdnsOptSpec::parse(spec)?),
			None => None,
		};

		let cfg = BenchmarkConfig {
			server: self.server.clone(),
			types: questions::parse_types(&self.types)?,
			count: match (self.number, self.duration) {
				(Some(n), _) => n,
				(None, Some(_)) => 0,
				(None, None) => 1,
			},
			duration: self.duration,
			concurrency: self.concurrency,
			rate_limit: self.rate_limit,
			rate_limit_worker: self.rate_limit_worker,
			probability: self.probability,
			qper_conn: self.query_per_conn,
			separate_worker_connections: self.separate_worker_connections,
			recurse: !self.no_recurse,
			dnssec: self.dnssec,
			edns0: self.edns0,
			ednsopt,
			tcp: self.tcp,
			dot: self.dot,
			insecure: self.insecure,
			doh_method,
			doh_protocol,
			write_timeout: self.write_timeout,
			read_timeout: self.read_timeout,
			connect_timeout: self.connect_timeout,
			request_timeout: self.request_timeout,
			request_delay: RequestDelay::parse(&self.request_delay)?,
			hist_min: self.hist_min,
			hist_max: self.hist_max,
			hist_pre: self.precision,
			rcodes: !self.no_codes,
			progress: !self.no_progress,
			silent: self.silent,
			json: self.json,
			distribution: !self.no_distribution,
			request_log: if self.log_requests {
				Some(self.log_requests_path.clone())
			} else {
				None
			},
		};
		cfg.validate()?;
		Ok(cfg)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use hickory_proto::rr::RecordType;

	fn parse(args: &[&str]) -> Cli {
		Cli::try_parse_from(std::iter::once("dnstress").chain(args.iter().copied())).unwrap()
	}

	#[test]
	fn test_defaults() {
		let cli = parse(&["example.com"]);
		let cfg = cli.to_config().unwrap();
		assert_eq!(cfg.server, "127.0.0.1");
		assert_eq!(cfg.types, vec![RecordType::A]);
		assert_eq!(cfg.count, 1);
		assert_eq!(cfg.concurrency, 1);
		assert!(cfg.recurse);
		assert!(cfg.rcodes);
		assert_eq!(cfg.doh_method, DohMethod::Post);
		assert_eq!(cfg.doh_protocol, DohProtocol::Http1);
		assert!(cfg.request_log.is_none());
	}

	#[test]
	fn test_number_and_duration_conflict() {
		let result = Cli::try_parse_from(["dnstress", "-n", "10", "-d", "5s", "example.com"]);
		assert!(result.is_err());
	}

	#[test]
	fn test_duration_bounded_zeroes_count() {
		let cli = parse(&["-d", "2s", "example.com"]);
		let cfg = cli.to_config().unwrap();
		assert_eq!(cfg.count, 0);
		assert_eq!(cfg.duration, Some(Duration::from_secs(2)));
	}

	#[test]
	fn test_repeatable_types() {
		let cli = parse(&["-t", "A", "-t", "AAAA", "example.com"]);
		let cfg = cli.to_config().unwrap();
		assert_eq!(cfg.types, vec![RecordType::A, RecordType::AAAA]);
	}

	#[test]
	fn test_doh_protocol_parse() {
		let cli = parse(&["--doh-protocol", "3", "example.com"]);
		let cfg = cli.to_config().unwrap();
		assert_eq!(cfg.doh_protocol, DohProtocol::Http3);

		let cli = parse(&["--doh-protocol", "h9", "example.com"]);
		assert!(cli.to_config().is_err());
	}

	#[test]
	fn test_fail_conditions() {
		let cli = parse(&["--fail", "ioerror", "--fail", "negative", "example.com"]);
		assert_eq!(
			cli.fail,
			vec![FailCondition::Ioerror, FailCondition::Negative]
		);
	}

	#[test]
	fn test_queries_required() {
		assert!(Cli::try_parse_from(["dnstress"]).is_err());
	}

	#[test]
	fn test_log_requests_path() {
		let cli = parse(&["--log-requests", "example.com"]);
		let cfg = cli.to_config().unwrap();
		assert_eq!(
			cfg.request_log,
			Some(PathBuf::from(DEFAULT_REQUEST_LOG_PATH))
		);
	}
}
