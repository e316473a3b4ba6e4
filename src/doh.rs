use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use data_encoding::BASE64URL_NOPAD;
use h3::client::SendRequest;
use h3_quinn::OpenStreams;
use quinn::crypto::rustls::QuicClientConfig;
use quinn::Endpoint;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::config::{BenchmarkConfig, DohMethod, DohProtocol};
use crate::server::ServerAddr;
use crate::tls;
use crate::transport::Reply;

const CONTENT_TYPE: &str = "application/dns-message";
const ALPN_H3: &[u8] = b"h3";

/// DNS over HTTPS (RFC 8484). HTTP/1.1 and HTTP/2 ride a pooled reqwest
/// client; HTTP/3 drives an h3 request stream over its own QUIC session.
pub enum DohBackend {
	Http(HttpBackend),
	H3(H3Backend),
}

impl DohBackend {
	pub fn build(addr: &ServerAddr, cfg: &BenchmarkConfig) -> Result<Self> {
		let url = addr
			.doh_url()
			.ok_or_else(|| anyhow!("not a DoH server address"))?;
		match cfg.doh_protocol {
			DohProtocol::Http1 | DohProtocol::Http2 => {
				Ok(DohBackend::Http(HttpBackend::build(url, cfg)?))
			}
			DohProtocol::Http3 => Ok(DohBackend::H3(H3Backend::new(addr, url, cfg))),
		}
	}

	pub async fn probe(&self) -> Result<()> {
		match self {
			// reqwest dials lazily and pools internally; the first query
			// reports connectivity failures as counted IO errors.
			DohBackend::Http(_) => Ok(()),
			DohBackend::H3(b) => {
				b.request_handle().await?;
				Ok(())
			}
		}
	}

	pub async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		match self {
			DohBackend::Http(b) => b.exchange(wire).await,
			DohBackend::H3(b) => b.exchange(wire).await,
		}
	}
}

pub struct HttpBackend {
	client: reqwest::Client,
	url: String,
	method: DohMethod,
}

impl HttpBackend {
	fn build(url: String, cfg: &BenchmarkConfig) -> Result<Self> {
		let mut builder = reqwest::Client::builder()
			.timeout(cfg.request_timeout)
			.connect_timeout(cfg.connect_timeout)
			.danger_accept_invalid_certs(cfg.insecure);
		builder = match cfg.doh_protocol {
			DohProtocol::Http1 => builder.http1_only(),
			_ => builder.http2_prior_knowledge(),
		};
		let client = builder.build().context("failed to build HTTP client")?;
		Ok(HttpBackend {
			client,
			url,
			method: cfg.doh_method,
		})
	}

	async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		let request = match self.method {
			DohMethod::Post => self
				.client
				.post(&self.url)
				.header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
				.header(reqwest::header::ACCEPT, CONTENT_TYPE)
				.body(wire.to_vec()),
			DohMethod::Get => self
				.client
				.get(format!("{}?dns={}", self.url, BASE64URL_NOPAD.encode(wire)))
				.header(reqwest::header::ACCEPT, CONTENT_TYPE),
		};

		let response = request.send().await.context("DoH request failed")?;
		let status = response.status().as_u16();
		let body = response
			.bytes()
			.await
			.context("failed to read DoH response body")?;
		Ok(Reply {
			body: body.to_vec(),
			doh_status: Some(status),
		})
	}
}

pub struct H3Backend {
	addr: ServerAddr,
	url: String,
	method: DohMethod,
	insecure: bool,
	connect_timeout: Duration,
	state: Mutex<Option<SendRequest<OpenStreams, Bytes>>>,
}

impl H3Backend {
	fn new(addr: &ServerAddr, url: String, cfg: &BenchmarkConfig) -> Self {
		H3Backend {
			addr: addr.clone(),
			url,
			method: cfg.doh_method,
			insecure: cfg.insecure,
			connect_timeout: cfg.connect_timeout,
			state: Mutex::new(None),
		}
	}

	/// Request handle for the cached HTTP/3 connection, establishing one
	/// on first use or after a connection-level failure.
	async fn request_handle(&self) -> Result<SendRequest<OpenStreams, Bytes>> {
		let mut guard = self.state.lock().await;
		if let Some(handle) = guard.as_ref() {
			return Ok(handle.clone());
		}

		let remote = crate::transport::resolve(&self.addr.authority()).await?;
		let bind: SocketAddr = if remote.is_ipv4() {
			"0.0.0.0:0".parse().expect("valid literal")
		} else {
			"[::]:0".parse().expect("valid literal")
		};
		let mut endpoint = Endpoint::client(bind).context("failed to create QUIC endpoint")?;
		let tls_config = tls::client_config(self.insecure, &[ALPN_H3]);
		let quic_config = QuicClientConfig::try_from(tls_config)
			.context("TLS configuration rejected for QUIC")?;
		endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(quic_config)));

		let connecting = endpoint
			.connect(remote, self.addr.host())
			.context("failed to start QUIC connection")?;
		let conn = timeout(self.connect_timeout, connecting)
			.await
			.context("QUIC handshake timed out")?
			.context("QUIC handshake failed")?;

		let (mut driver, send_request) = h3::client::new(h3_quinn::Connection::new(conn))
			.await
			.context("HTTP/3 handshake failed")?;
		// The driver must be polled for the connection to make progress.
		tokio::spawn(async move {
			let _ = std::future::poll_fn(|cx| driver.poll_close(cx)).await;
		});

		*guard = Some(send_request.clone());
		Ok(send_request)
	}

	async fn invalidate(&self) {
		*self.state.lock().await = None;
	}

	async fn exchange(&self, wire: &[u8]) -> Result<Reply> {
		let mut handle = self.request_handle().await?;
		match self.exchange_on(&mut handle, wire).await {
			Ok(reply) => Ok(reply),
			Err(e) => {
				// Any stream error may mean the session is gone; drop it so
				// the next query reconnects.
				self.invalidate().await;
				Err(e)
			}
		}
	}

	async fn exchange_on(
		&self,
		handle: &mut SendRequest<OpenStreams, Bytes>,
		wire: &[u8],
	) -> Result<Reply> {
		let request = match self.method {
			DohMethod::Post => http::Request::builder()
				.method(http::Method::POST)
				.uri(self.url.as_str())
				.header(http::header::CONTENT_TYPE, CONTENT_TYPE)
				.header(http::header::ACCEPT, CONTENT_TYPE)
				.body(())
				.context("failed to build HTTP/3 request")?,
			DohMethod::Get => http::Request::builder()
				.method(http::Method::GET)
				.uri(format!("{}?dns={}", self.url, BASE64URL_NOPAD.encode(wire)))
				.header(http::header::ACCEPT, CONTENT_TYPE)
				.body(())
				.context("failed to build HTTP/3 request")?,
		};

		let mut stream = handle
			.send_request(request)
			.await
			.map_err(|e| anyhow!("HTTP/3 send_request failed: {e}"))?;
		if self.method == DohMethod::Post {
			stream
				.send_data(Bytes::copy_from_slice(wire))
				.await
				.map_err(|e| anyhow!("HTTP/3 send_data failed: {e}"))?;
		}
		stream
			.finish()
			.await
			.map_err(|e| anyhow!("HTTP/3 finish failed: {e}"))?;

		let response = stream
			.recv_response()
			.await
			.map_err(|e| anyhow!("HTTP/3 recv_response failed: {e}"))?;
		let status = response.status().as_u16();

		let mut body = BytesMut::new();
		while let Some(chunk) = stream
			.recv_data()
			.await
			.map_err(|e| anyhow!("HTTP/3 recv_data failed: {e}"))?
		{
			body.put(chunk);
		}

		Ok(Reply {
			body: body.to_vec(),
			doh_status: Some(status),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_get_query_parameter_is_base64url() {
		let wire = vec![0xab, 0xcd, 0xef];
		let encoded = BASE64URL_NOPAD.encode(&wire);
		assert_eq!(encoded, "q83v");
		assert!(!encoded.contains('='));
	}
}
