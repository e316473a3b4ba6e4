use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use hickory_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::rdata::opt::EdnsOption;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::Mutex;
use tokio::time::{timeout, Instant};

use crate::config::BenchmarkConfig;
use crate::doh::DohBackend;
use crate::doq::DoqBackend;
use crate::dot::DotBackend;
use crate::questions::Question;
use crate::server::ServerAddr;
use crate::stats::{Outcome, QueryResult};

/// EDNS0 buffer size advertised when DNSSEC or a generic EDNS option needs
/// an OPT record but no explicit size was configured.
const DEFAULT_EDNS0_BUFFER: u16 = 4096;

const MAX_REPLY_SIZE: usize = 65_535;

/// One decoded transport exchange: the raw reply plus the HTTP status for
/// DoH transports.
#[derive(Debug)]
pub struct Reply {
	pub body: Vec<u8>,
	pub doh_status: Option<u16>,
}

impl Reply {
	pub fn wire(body: Vec<u8>) -> Self {
		Reply {
			body,
			doh_status: None,
		}
	}
}

/// Resolve `host:port` to the first socket address, preferring IPv4 when
/// both families are offered.
pub async fn resolve(authority: &str) -> Result<SocketAddr> {
	let addrs: Vec<SocketAddr> = tokio::net::lookup_host(authority)
		.await
		.with_context(|| format!("failed to resolve {authority}"))?
		.collect();
	addrs
		.iter()
		.find(|a| a.is_ipv4())
		.or(addrs.first())
		.copied()
		.ok_or_else(|| anyhow!("no address found for {authority}"))
}

/// Build the query message for one question: random transaction ID, RD per
/// configuration, OPT record when EDNS0, DNSSEC or a generic option asks
/// for one.
pub fn build_message(question: &Question, cfg: &BenchmarkConfig) -> Message {
	let mut msg = Message::new();
	msg.set_id(rand::random());
	msg.set_message_type(MessageType::Query);
	msg.set_op_code(OpCode::Query);
	msg.set_recursion_desired(cfg.recurse);
	msg.add_query(Query::query(question.name.clone(), question.qtype));

	if cfg.edns0 > 0 || cfg.dnssec || cfg.ednsopt.is_some() {
		let edns = msg.extensions_mut().get_or_insert_with(Edns::new);
		edns.set_version(0);
		edns.set_max_payload(if cfg.edns0 > 0 {
			cfg.edns0
		} else {
			DEFAULT_EDNS0_BUFFER
		});
		if cfg.dnssec {
			edns.set_dnssec_ok(true);
		}
		if let Some(opt) = &cfg.ednsopt {
			edns.options_mut()
				.insert(EdnsOption::Unknown(opt.code, opt.data.clone()));
		}
	}
	msg
}

/// Classify a raw reply into the outcome taxonomy.
pub fn classify(body: &[u8], expected_id: u16, latency: Duration, doh_status: Option<u16>) -> QueryResult {
	let msg = match Message::from_vec(body) {
		Ok(msg) => msg,
		Err(_) => {
			return QueryResult {
				outcome: Outcome::IoError,
				rcode: None,
				latency,
				doh_status,
				authenticated: false,
			}
		}
	};

	let rcode = msg.response_code();
	let authenticated = msg.authentic_data();
	let outcome = if msg.id() != expected_id {
		Outcome::IdMismatch
	} else if msg.truncated() {
		Outcome::Truncated
	} else if rcode == ResponseCode::NoError && msg.answer_count() > 0 {
		Outcome::Success
	} else if rcode == ResponseCode::NoError || rcode == ResponseCode::NXDomain {
		Outcome::Negative
	} else {
		Outcome::Error
	};

	QueryResult {
		outcome,
		rcode: Some(rcode),
		latency,
		doh_status,
		authenticated,
	}
}

fn io_error(latency: Duration, doh_status: Option<u16>) -> QueryResult {
	QueryResult {
		outcome: Outcome::IoError,
		rcode: None,
		latency,
		doh_status,
		authenticated: false,
	}
}

/// A transport backend able to carry one DNS exchange at a time per
/// caller. Dispatch is a small kind-tag; adding a transport means adding a
/// constructor and a match arm.
pub enum Backend {
	Plain(PlainBackend),
	Dot(DotBackend),
	Doh(DohBackend),
	Doq(DoqBackend),
}

impl Backend {
	pub async fn build(addr: &ServerAddr, cfg: &BenchmarkConfig) -> Result<Self> {
		match addr {
			ServerAddr::Plain { tcp, .. } => Ok(Backend::Plain(
				PlainBackend::build(addr.authority(), *tcp, cfg).await?,
			)),
			ServerAddr::Dot { host, .. } => Ok(Backend::Dot(
				DotBackend::build(host.clone(), addr.authority(), cfg).await?,
			)),
			ServerAddr::Doh { .. } => Ok(Backend::Doh(DohBackend::build(addr, cfg)?)),
			ServerAddr::Doq { host, .. } => Ok(Backend::Doq(
				DoqBackend::build(host.clone(), addr.authority(), cfg).await?,
			)),
		}
	}

	/// Establish initial connectivity without issuing a query. Used by the
	/// driver's first-connect check; failures here fail the whole run.
	pub async fn probe(&self) -> Result<()> {
		match self {
			Backend::Plain(b) => b.probe().await,
			Backend::Dot(b) => b.probe().await,
			Backend::Doh(b) => b.probe().await,
			Backend::Doq(b) => b.probe().await,
		}
	}

	/// Issue one query and classify the reply. The latency covers only the
	/// send/receive exchange; a request timeout records the timeout value
	/// itself as the duration.
	pub async fn query(&self, question: &Question, cfg: &BenchmarkConfig) -> QueryResult {
		let mut msg = build_message(question, cfg);
		if matches!(self, Backend::Doq(_)) {
			// DoQ requires a zero message ID on the wire (RFC 9250 §4.2.1)
			msg.set_id(0);
		}
		let expected_id = msg.id();
		let wire = match msg.to_vec() {
			Ok(wire) => wire,
			Err(_) => return io_error(Duration::ZERO, None),
		};

		let started = Instant::now();
		let exchange = async {
			match self {
				Backend::Plain(b) => b.exchange(&wire).await,
				Backend::Dot(b) => b.exchange(&wire).await,
				Backend::Doh(b) => b.exchange(&wire).await,
				Backend::Doq(b) => b.exchange(&wire).await,
			}
		};

		match timeout(cfg.request_timeout, exchange).await {
			Ok(Ok(reply)) => {
				let latency = started.elapsed();
				if let Some(status) = reply.doh_status {
					if !(200..300).contains(&status) {
						return io_error(latency, Some(status));
					}
				}
				classify(&reply.body, expected_id, latency, reply.doh_status)
			}
			Ok(Err(_)) => io_error(started.elapsed(), None),
			Err(_) => io_error(cfg.request_timeout, None),
		}
	}
}

enum PlainConnIo {
	Udp(UdpSocket),
	Tcp(TcpStream),
}

struct PlainConn {
	io: PlainConnIo,
	queries: u64,
}

/// Plain DNS over UDP or TCP with connection reuse.
///
/// Connections live in a pool shared by every worker using this backend;
/// each exchange checks one out, so a connection never carries two queries
/// at once. A connection is retired after `qper_conn` queries or on the
/// first I/O failure.
pub struct PlainBackend {
	addr: SocketAddr,
	tcp: bool,
	qper_conn: u64,
	connect_timeout: Duration,
	write_timeout: Duration,
	read_timeout: Duration,
	pool: Mutex<Vec<PlainConn>>,
}

impl PlainBackend {
	async fn build(authority: String, tcp: bool, cfg: &BenchmarkConfig) -> Result<Self> {
		let addr = resolve(&authority).await?;
		Ok(PlainBackend {
			addr,
			tcp,
			qper_conn: cfg.qper_conn,
			connect_timeout: cfg.connect_timeout,
			write_timeout: cfg.write_timeout,
			read_timeout: cfg.read_timeout,
			pool: Mutex::new(Vec::new()),
		})
	}

	async fn probe(&self) -> Result<()> {
		let conn = self.dial().await?;
		self.checkin(conn).await;
		Ok(())
	}

	async fn dial(&self) -> Result<PlainConn> {
		let io = if self.tcp {
			let stream = timeout(self.connect_timeout, TcpStream::connect(self.addr))
				.await
				.with_context(|| format!("connect to {} timed out", self.addr))?
				.with_context(|| format!("failed to connect to {}", self.addr))?;
			PlainConnIo::Tcp(stream)
		} else {
			let bind = if self.addr.is_ipv4() {
				"0.0.0.0:0"
			} else {
				"[::]:0"
			};
			let socket = UdpSocket::bind(bind)
				.await
				.context("failed to bind UDP socket")?;
			socket
				.connect(self.addr)
				.await
				.with_context(|| format!("failed to connect UDP socket to {}", self.addr))?;
			PlainConnIo::Udp(socket)
		};
		Ok(PlainConn { io, queries: 0 })
	}

	async fn checkout(&self) -> Result<PlainConn> {
		if let Some(conn) = self.pool.lock().await.pop() {
			return Ok(conn);
		}
		self.dial().await
	}

	async fn checkin(&self, conn: PlainConn) {
		if self.qper_conn > 0 && conn.queries >= self.qper_conn {
			return;
		}
		self.pool.lock().await.push(conn);
	}

	async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		let mut conn = self.checkout().await?;
		// On failure the connection is dropped; the next attempt redials.
		let body = self.exchange_on(&mut conn.io, wire).await?;
		conn.queries += 1;
		self.checkin(conn).await;
		Ok(Reply::wire(body))
	}

	async fn exchange_on(&self, io: &mut PlainConnIo, wire: &[u8]) -> Result<Vec<u8>> {
		match io {
			PlainConnIo::Udp(socket) => {
				timeout(self.write_timeout, socket.send(wire))
					.await
					.context("UDP send timed out")?
					.context("UDP send failed")?;
				let mut buf = vec![0u8; MAX_REPLY_SIZE];
				let len = timeout(self.read_timeout, socket.recv(&mut buf))
					.await
					.context("UDP receive timed out")?
					.context("UDP receive failed")?;
				buf.truncate(len);
				Ok(buf)
			}
			PlainConnIo::Tcp(stream) => {
				write_framed(stream, wire, self.write_timeout).await?;
				read_framed(stream, self.read_timeout).await
			}
		}
	}
}

/// Write one DNS message with the RFC 1035 §4.2.2 two-byte length prefix.
pub async fn write_framed<S>(stream: &mut S, wire: &[u8], write_timeout: Duration) -> Result<()>
where
	S: AsyncWriteExt + Unpin,
{
	let mut framed = Vec::with_capacity(wire.len() + 2);
	framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
	framed.extend_from_slice(wire);
	timeout(write_timeout, stream.write_all(&framed))
		.await
		.context("stream write timed out")?
		.context("stream write failed")?;
	Ok(())
}

/// Read one length-prefixed DNS message.
pub async fn read_framed<S>(stream: &mut S, read_timeout: Duration) -> Result<Vec<u8>>
where
	S: AsyncReadExt + Unpin,
{
	let body = timeout(read_timeout, async {
		let mut len_buf = [0u8; 2];
		stream.read_exact(&mut len_buf).await?;
		let len = u16::from_be_bytes(len_buf) as usize;
		let mut body = vec![0u8; len];
		stream.read_exact(&mut body).await?;
		Ok::<_, std::io::Error>(body)
	})
	.await
	.context("stream read timed out")?
	.context("stream read failed")?;
	Ok(body)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::EdnsOptSpec;
	use hickory_proto::rr::{Name, RecordType};
	use std::str::FromStr;

	fn question() -> Question {
		Question {
			name: Name::from_str("example.com.").unwrap(),
			qtype: RecordType::A,
		}
	}

	fn reply_from(request: &Message) -> Message {
		let mut reply = request.clone();
		reply.set_message_type(MessageType::Response);
		reply
	}

	#[test]
	fn test_build_message_recursion_bit() {
		let mut cfg = BenchmarkConfig::default();
		let msg = build_message(&question(), &cfg);
		assert!(msg.recursion_desired());

		cfg.recurse = false;
		let msg = build_message(&question(), &cfg);
		assert!(!msg.recursion_desired());
	}

	#[test]
	fn test_build_message_no_edns_by_default() {
		let cfg = BenchmarkConfig::default();
		let msg = build_message(&question(), &cfg);
		assert!(msg.extensions().is_none());
	}

	#[test]
	fn test_build_message_edns0_buffer() {
		let cfg = BenchmarkConfig {
			edns0: 1232,
			..BenchmarkConfig::default()
		};
		let msg = build_message(&question(), &cfg);
		let edns = msg.extensions().as_ref().unwrap();
		assert_eq!(edns.max_payload(), 1232);
		assert!(!edns.dnssec_ok());
	}

	#[test]
	fn test_build_message_dnssec_sets_do() {
		let cfg = BenchmarkConfig {
			dnssec: true,
			..BenchmarkConfig::default()
		};
		let msg = build_message(&question(), &cfg);
		let edns = msg.extensions().as_ref().unwrap();
		assert!(edns.dnssec_ok());
	}

	#[test]
	fn test_build_message_generic_edns_option() {
		let cfg = BenchmarkConfig {
			ednsopt: Some(EdnsOptSpec {
				code: 65001,
				data: vec![0xde, 0xad],
			}),
			..BenchmarkConfig::default()
		};
		let msg = build_message(&question(), &cfg);
		assert!(msg.extensions().is_some());
	}

	#[test]
	fn test_classify_success() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let mut reply = reply_from(&request);
		reply.add_answer(hickory_proto::rr::Record::from_rdata(
			Name::from_str("example.com.").unwrap(),
			60,
			hickory_proto::rr::RData::A(hickory_proto::rr::rdata::A::from(
				std::net::Ipv4Addr::new(93, 184, 216, 34),
			)),
		));
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id(), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::Success);
		assert_eq!(result.rcode, Some(ResponseCode::NoError));
	}

	#[test]
	fn test_classify_negative_nodata() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let reply = reply_from(&request);
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id(), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::Negative);
	}

	#[test]
	fn test_classify_negative_nxdomain() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let mut reply = reply_from(&request);
		reply.set_response_code(ResponseCode::NXDomain);
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id(), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::Negative);
		assert_eq!(result.rcode, Some(ResponseCode::NXDomain));
	}

	#[test]
	fn test_classify_error_rcode() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let mut reply = reply_from(&request);
		reply.set_response_code(ResponseCode::ServFail);
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id(), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::Error);
	}

	#[test]
	fn test_classify_truncated() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let mut reply = reply_from(&request);
		reply.set_truncated(true);
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id(), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::Truncated);
	}

	#[test]
	fn test_classify_id_mismatch() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let reply = reply_from(&request);
		let body = reply.to_vec().unwrap();
		let wrong_id = request.id().wrapping_add(1);
		let result = classify(&body, wrong_id, Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::IdMismatch);
	}

	#[test]
	fn test_classify_undecodable_is_io_error() {
		let result = classify(&[0u8; 3], 0, Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::IoError);
		assert_eq!(result.rcode, None);
	}

	#[test]
	fn test_classify_mismatch_beats_truncated() {
		let cfg = BenchmarkConfig::default();
		let request = build_message(&question(), &cfg);
		let mut reply = reply_from(&request);
		reply.set_truncated(true);
		let body = reply.to_vec().unwrap();
		let result = classify(&body, request.id().wrapping_add(1), Duration::from_millis(1), None);
		assert_eq!(result.outcome, Outcome::IdMismatch);
	}

	#[tokio::test]
	async fn test_framing_roundtrip() {
		let (mut a, mut b) = tokio::io::duplex(1024);
		let payload = vec![1u8, 2, 3, 4, 5];
		write_framed(&mut a, &payload, Duration::from_secs(1))
			.await
			.unwrap();
		let read = read_framed(&mut b, Duration::from_secs(1)).await.unwrap();
		assert_eq!(read, payload);
	}
}
