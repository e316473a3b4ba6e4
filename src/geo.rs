use std::net::IpAddr;

/// Pluggable IP-to-country lookup consumed by the reporter.
///
/// The benchmark core ships only the static fallback; a real GeoIP-backed
/// implementation can be slotted in without touching the driver.
pub trait GeoLookup {
	/// ISO 3166-1 alpha-2 country code, or `PRIVATE` for private and
	/// unspecified addresses, or `XX` when the location is unknown.
	fn lookup(&self, server: &str) -> String;
}

/// Fallback lookup with no database: classifies private address space and
/// reports everything else as unknown.
pub struct StaticLookup;

impl GeoLookup for StaticLookup {
	fn lookup(&self, server: &str) -> String {
		match host_of(server).parse::<IpAddr>() {
			Ok(ip) if is_private(ip) => "PRIVATE".to_string(),
			_ => "XX".to_string(),
		}
	}
}

fn is_private(ip: IpAddr) -> bool {
	match ip {
		IpAddr::V4(v4) => {
			v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified()
		}
		IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
	}
}

/// Server string with scheme and path stripped, used for the `ip` report
/// field.
pub fn extract_ip(server: &str) -> String {
	let server = server.trim();
	for scheme in ["https://", "http://", "tls://", "quic://"] {
		if let Some(rest) = server.strip_prefix(scheme) {
			return rest.to_string();
		}
	}
	server.to_string()
}

/// Host part of a server string: scheme, path, port and brackets removed.
fn host_of(server: &str) -> String {
	let mut host = extract_ip(server);
	if let Some(idx) = host.find('/') {
		host.truncate(idx);
	}
	if host.starts_with('[') {
		if let Some(end) = host.find(']') {
			return host[1..end].to_string();
		}
	}
	// host:port only when a single colon is present; more means bare IPv6
	if host.matches(':').count() == 1 {
		if let Some((name, port)) = host.split_once(':') {
			if port.chars().all(|c| c.is_ascii_digit()) {
				return name.to_string();
			}
		}
	}
	host
}
