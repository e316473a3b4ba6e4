use std::sync::Arc;
use std::sync::Once;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

static INSTALL_PROVIDER: Once = Once::new();

/// Install the ring crypto provider as the process default. Safe to call
/// more than once; later calls are no-ops.
pub fn ensure_crypto_provider() {
	INSTALL_PROVIDER.call_once(|| {
		let _ = rustls::crypto::ring::default_provider().install_default();
	});
}

/// Build the rustls client configuration shared by DoT, DoQ and HTTP/3.
///
/// Uses the webpki root store; when `insecure` is set, certificate
/// verification is replaced with a verifier that accepts everything.
/// `alpn` carries the protocol token required by the transport (`doq`,
/// `h3`) or stays empty for DoT.
pub fn client_config(insecure: bool, alpn: &[&[u8]]) -> ClientConfig {
	ensure_crypto_provider();

	let mut roots = RootCertStore::empty();
	roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

	let mut config = ClientConfig::builder()
		.with_root_certificates(roots)
		.with_no_client_auth();

	if insecure {
		config
			.dangerous()
			.set_certificate_verifier(Arc::new(AcceptAnyCert::new()));
	}

	config.alpn_protocols = alpn.iter().map(|p| p.to_vec()).collect();
	config
}

/// Certificate verifier that accepts any server certificate. Only
/// reachable through the `--insecure` flag.
#[derive(Debug)]
struct AcceptAnyCert(CryptoProvider);

impl AcceptAnyCert {
	fn new() -> Self {
		AcceptAnyCert(rustls::crypto::ring::default_provider())
	}
}

impl ServerCertVerifier for AcceptAnyCert {
	fn verify_server_cert(
		&self,
		_end_entity: &CertificateDer<'_>,
		_intermediates: &[CertificateDer<'_>],
		_server_name: &ServerName<'_>,
		_ocsp_response: &[u8],
		_now: UnixTime,
	) -> Result<ServerCertVerified, rustls::Error> {
		Ok(ServerCertVerified::assertion())
	}

	fn verify_tls12_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn verify_tls13_signature(
		&self,
		message: &[u8],
		cert: &CertificateDer<'_>,
		dss: &DigitallySignedStruct,
	) -> Result<HandshakeSignatureValid, rustls::Error> {
		verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
	}

	fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
		self.0.signature_verification_algorithms.supported_schemes()
	}
}
