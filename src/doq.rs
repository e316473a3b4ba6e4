use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use quinn::crypto::rustls::QuicClientConfig;
use quinn::{ClientConfig, Connection, Endpoint};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::BenchmarkConfig;
use crate::tls;
use crate::transport::{resolve, Reply};

/// ALPN token for DNS over dedicated QUIC connections (RFC 9250).
const ALPN_DOQ: &[u8] = b"doq";

/// DNS over QUIC (RFC 9250). One QUIC session per backend; every query
/// opens a fresh bidirectional stream carrying a single length-prefixed
/// message each way. The per-connection query cap does not apply here.
pub struct DoqBackend {
	endpoint: Endpoint,
	addr: SocketAddr,
	server_name: String,
	connect_timeout: Duration,
	read_timeout: Duration,
	conn: Mutex<Option<Connection>>,
}

impl DoqBackend {
	pub async fn build(host: String, authority: String, cfg: &BenchmarkConfig) -> Result<Self> {
		let addr = resolve(&authority).await?;
		let bind: SocketAddr = if addr.is_ipv4() {
			"0.0.0.0:0".parse().expect("valid literal")
		} else {
			"[::]:0".parse().expect("valid literal")
		};
		let mut endpoint = Endpoint::client(bind).context("failed to create QUIC endpoint")?;

		let tls_config = tls::client_config(cfg.insecure, &[ALPN_DOQ]);
		let quic_config = QuicClientConfig::try_from(tls_config)
			.context("TLS configuration rejected for QUIC")?;
		endpoint.set_default_client_config(ClientConfig::new(Arc::new(quic_config)));

		Ok(DoqBackend {
			endpoint,
			addr,
			server_name: host,
			connect_timeout: cfg.connect_timeout,
			read_timeout: cfg.read_timeout,
			conn: Mutex::new(None),
		})
	}

	pub async fn probe(&self) -> Result<()> {
		self.session().await?;
		Ok(())
	}

	/// Current QUIC session, dialing a new one if none is cached or the
	/// cached one has been closed.
	async fn session(&self) -> Result<Connection> {
		let mut guard = self.conn.lock().await;
		if let Some(conn) = guard.as_ref() {
			if conn.close_reason().is_none() {
				return Ok(conn.clone());
			}
		}
		let connecting = self
			.endpoint
			.connect(self.addr, &self.server_name)
			.context("failed to start QUIC connection")?;
		let conn = timeout(self.connect_timeout, connecting)
			.await
			.context("QUIC handshake timed out")?
			.context("QUIC handshake failed")?;
		*guard = Some(conn.clone());
		Ok(conn)
	}

	pub async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		let conn = self.session().await?;
		let (mut send, mut recv) = conn
			.open_bi()
			.await
			.context("failed to open QUIC stream")?;

		let mut framed = Vec::with_capacity(wire.len() + 2);
		framed.extend_from_slice(&(wire.len() as u16).to_be_bytes());
		framed.extend_from_slice(wire);
		send.write_all(&framed)
			.await
			.context("QUIC stream write failed")?;
		send.finish().context("QUIC stream finish failed")?;

		let body = timeout(self.read_timeout, async {
			let mut len_buf = [0u8; 2];
			recv.read_exact(&mut len_buf).await?;
			let len = u16::from_be_bytes(len_buf) as usize;
			let mut body = vec![0u8; len];
			recv.read_exact(&mut body).await?;
			Ok::<_, quinn::ReadExactError>(body)
		})
		.await
		.context("QUIC stream read timed out")?
		.context("QUIC stream read failed")?;

		Ok(Reply::wire(body))
	}
}
