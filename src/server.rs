use crate::config::{BenchmarkConfig, ConfigError};

pub const DEFAULT_PLAIN_PORT: u16 = 53;
pub const DEFAULT_DOT_PORT: u16 = 853;
pub const DEFAULT_DOQ_PORT: u16 = 853;
pub const DEFAULT_HTTPS_PORT: u16 = 443;
pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_DOH_PATH: &str = "/dns-query";

/// A classified benchmark target: transport kind plus normalized endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddr {
	Plain { host: String, port: u16, tcp: bool },
	Dot { host: String, port: u16 },
	Doh { https: bool, host: String, port: u16, path: String },
	Doq { host: String, port: u16 },
}

impl ServerAddr {
	/// Classify a server string using its scheme prefix and the transport
	/// flags from the configuration.
	///
	/// `quic://` selects DoQ, `https://`/`http://` select DoH, `tls://` or
	/// the DoT flag selects DoT, anything else is plain DNS (UDP unless the
	/// TCP flag is set). A missing port falls back to the transport default.
	pub fn parse(input: &str, cfg: &BenchmarkConfig) -> Result<Self, ConfigError> {
		let trimmed = input.trim();
		if trimmed.is_empty() {
			return Err(ConfigError::InvalidServer(input.to_string()));
		}

		if let Some(rest) = trimmed.strip_prefix("quic://") {
			let (host, port) = split_host_port(rest, DEFAULT_DOQ_PORT)
				.ok_or_else(|| ConfigError::InvalidServer(input.to_string()))?;
			return Ok(ServerAddr::Doq { host, port });
		}

		if trimmed.starts_with("https://") || trimmed.starts_with("http://") {
			return parse_doh(trimmed).ok_or_else(|| ConfigError::InvalidServer(input.to_string()));
		}

		if let Some(rest) = trimmed.strip_prefix("tls://") {
			let (host, port) = split_host_port(rest, DEFAULT_DOT_PORT)
				.ok_or_else(|| ConfigError::InvalidServer(input.to_string()))?;
			return Ok(ServerAddr::Dot { host, port });
		}

		if cfg.dot {
			let (host, port) = split_host_port(trimmed, DEFAULT_DOT_PORT)
				.ok_or_else(|| ConfigError::InvalidServer(input.to_string()))?;
			return Ok(ServerAddr::Dot { host, port });
		}

		let (host, port) = split_host_port(trimmed, DEFAULT_PLAIN_PORT)
			.ok_or_else(|| ConfigError::InvalidServer(input.to_string()))?;
		Ok(ServerAddr::Plain {
			host,
			port,
			tcp: cfg.tcp,
		})
	}

	/// Hostname or IP literal without port or scheme.
	pub fn host(&self) -> &str {
		match self {
			ServerAddr::Plain { host, .. } => host,
			ServerAddr::Dot { host, .. } => host,
			ServerAddr::Doh { host, .. } => host,
			ServerAddr::Doq { host, .. } => host,
		}
	}

	pub fn port(&self) -> u16 {
		match self {
			ServerAddr::Plain { port, .. } => *port,
			ServerAddr::Dot { port, .. } => *port,
			ServerAddr::Doh { port, .. } => *port,
			ServerAddr::Doq { port, .. } => *port,
		}
	}

	/// `host:port` with IPv6 hosts bracketed, usable for socket dialing.
	pub fn authority(&self) -> String {
		let host = self.host();
		if host.contains(':') {
			format!("[{}]:{}", host, self.port())
		} else {
			format!("{}:{}", host, self.port())
		}
	}

	/// Full request URL for DoH targets.
	pub fn doh_url(&self) -> Option<String> {
		match self {
			ServerAddr::Doh {
				https, host, port, path,
			} => {
				let scheme = if *https { "https" } else { "http" };
				let host = if host.contains(':') {
					format!("[{host}]")
				} else {
					host.clone()
				};
				Some(format!("{scheme}://{host}:{port}{path}"))
			}
			_ => None,
		}
	}
}

fn parse_doh(input: &str) -> Option<ServerAddr> {
	let (https, rest) = if let Some(rest) = input.strip_prefix("https://") {
		(true, rest)
	} else {
		(false, input.strip_prefix("http://")?)
	};

	let (authority, path) = match rest.find('/') {
		Some(idx) => (&rest[..idx], &rest[idx..]),
		None => (rest, ""),
	};
	let default_port = if https {
		DEFAULT_HTTPS_PORT
	} else {
		DEFAULT_HTTP_PORT
	};
	let (host, port) = split_host_port(authority, default_port)?;
	let path = if path.is_empty() {
		DEFAULT_DOH_PATH.to_string()
	} else {
		path.to_string()
	};
	Some(ServerAddr::Doh {
		https,
		host,
		port,
		path,
	})
}

/// Split `host[:port]` with bracketed-IPv6 support.
///
/// A bare IPv6 literal without brackets is ambiguous and treated as a host
/// with the default port.
fn split_host_port(input: &str, default_port: u16) -> Option<(String, u16)> {
	let input = input.trim();
	if input.is_empty() {
		return None;
	}

	if let Some(rest) = input.strip_prefix('[') {
		// [ipv6] or [ipv6]:port
		let (host, after) = rest.split_once(']')?;
		if host.is_empty() {
			return None;
		}
		let port = match after.strip_prefix(':') {
			Some(p) => p.parse().ok()?,
			None if after.is_empty() => default_port,
			None => return None,
		};
		return Some((host.to_string(), port));
	}

	if input.matches(':').count() > 1 {
		// Unbracketed IPv6: host only
		return Some((input.to_string(), default_port));
	}

	match input.split_once(':') {
		Some((host, port)) => {
			if host.is_empty() {
				return None;
			}
			Some((host.to_string(), port.parse().ok()?))
		}
		None => Some((input.to_string(), default_port)),
	}
}
