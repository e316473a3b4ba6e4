use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::config::BenchmarkConfig;
use crate::tls;
use crate::transport::{read_framed, resolve, write_framed, Reply};

struct DotConn {
	stream: TlsStream<TcpStream>,
	queries: u64,
}

/// DNS over TLS (RFC 7858). Same framing and connection-reuse policy as
/// plain TCP, with the stream TLS-wrapped; certificate verification is
/// disabled only through the insecure flag.
pub struct DotBackend {
	addr: SocketAddr,
	server_name: ServerName<'static>,
	connector: TlsConnector,
	qper_conn: u64,
	connect_timeout: Duration,
	write_timeout: Duration,
	read_timeout: Duration,
	pool: Mutex<Vec<DotConn>>,
}

impl DotBackend {
	pub async fn build(host: String, authority: String, cfg: &BenchmarkConfig) -> Result<Self> {
		let addr = resolve(&authority).await?;
		let server_name = ServerName::try_from(host)
			.context("server name is not valid for TLS")?;
		let config = tls::client_config(cfg.insecure, &[]);
		Ok(DotBackend {
			addr,
			server_name,
			connector: TlsConnector::from(Arc::new(config)),
			qper_conn: cfg.qper_conn,
			connect_timeout: cfg.connect_timeout,
			write_timeout: cfg.write_timeout,
			read_timeout: cfg.read_timeout,
			pool: Mutex::new(Vec::new()),
		})
	}

	pub async fn probe(&self) -> Result<()> {
		let conn = self.dial().await?;
		self.checkin(conn).await;
		Ok(())
	}

	async fn dial(&self) -> Result<DotConn> {
		let tcp = timeout(self.connect_timeout, TcpStream::connect(self.addr))
			.await
			.with_context(|| format!("connect to {} timed out", self.addr))?
			.with_context(|| format!("failed to connect to {}", self.addr))?;
		let stream = timeout(
			self.connect_timeout,
			self.connector.connect(self.server_name.clone(), tcp),
		)
		.await
		.context("TLS handshake timed out")?
		.context("TLS handshake failed")?;
		Ok(DotConn { stream, queries: 0 })
	}

	async fn checkout(&self) -> Result<DotConn> {
		if let Some(conn) = self.pool.lock().await.pop() {
			return Ok(conn);
		}
		self.dial().await
	}

	async fn checkin(&self, conn: DotConn) {
		if self.qper_conn > 0 && conn.queries >= self.qper_conn {
			return;
		}
		self.pool.lock().await.push(conn);
	}

	pub async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		let mut conn = self.checkout().await?;
		// A failed exchange drops the session; the next query redials.
		let body = async {
			write_framed(&mut conn.stream, wire, self.write_timeout).await?;
			read_framed(&mut conn.stream, self.read_timeout).await
		}
		.await?;
		conn.queries += 1;
		self.checkin(conn).await;
		Ok(Reply::wire(body))
	}
}
