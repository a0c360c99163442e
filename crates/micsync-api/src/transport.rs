// Shared transport configuration for building vendor HTTP and WebSocket clients.
//
// REST and push connections to the same vendor share TLS, timeout, and
// credential settings through this module.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{DigitallySignedStruct, SignatureScheme};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

pub const DEFAULT_KEY_HEADER: &str = "X-Api-Key";
pub const DEFAULT_SECRET_HEADER: &str = "X-Api-Secret";

/// TLS verification mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsMode {
    /// Use the bundled web PKI roots.
    #[default]
    System,
    /// Trust a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (on-premise vendor servers with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared-secret header pair sent on every vendor request.
#[derive(Debug, Clone)]
pub struct SharedSecret {
    pub key_header: String,
    pub key: String,
    pub secret_header: String,
    pub secret: SecretString,
}

impl SharedSecret {
    /// Credentials under the default header names.
    pub fn new(key: impl Into<String>, secret: SecretString) -> Self {
        Self {
            key_header: DEFAULT_KEY_HEADER.into(),
            key: key.into(),
            secret_header: DEFAULT_SECRET_HEADER.into(),
            secret,
        }
    }

    /// Render the pair as default headers. The secret is marked sensitive.
    pub fn headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();

        let key_name = header_name(&self.key_header)?;
        let key_value = HeaderValue::from_str(&self.key).map_err(|e| Error::Authentication {
            message: format!("invalid key header value: {e}"),
        })?;
        headers.insert(key_name, key_value);

        let secret_name = header_name(&self.secret_header)?;
        let mut secret_value =
            HeaderValue::from_str(self.secret.expose_secret()).map_err(|e| {
                Error::Authentication {
                    message: format!("invalid secret header value: {e}"),
                }
            })?;
        secret_value.set_sensitive(true);
        headers.insert(secret_name, secret_value);

        Ok(headers)
    }
}

fn header_name(raw: &str) -> Result<HeaderName, Error> {
    HeaderName::from_bytes(raw.as_bytes()).map_err(|e| Error::Authentication {
        message: format!("invalid header name {raw:?}: {e}"),
    })
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` that injects `headers` on every request.
    pub fn build_client(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.timeout)
            .user_agent(concat!("micsync/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }

    /// Build a rustls configuration for `wss://` push connections.
    ///
    /// Returns `None` for [`TlsMode::System`], letting tokio-tungstenite use
    /// its bundled web PKI roots.
    pub fn websocket_tls(&self) -> Result<Option<Arc<rustls::ClientConfig>>, Error> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::Tls(format!("unsupported protocol versions: {e}")))?;

        let config = match &self.tls {
            TlsMode::System => return Ok(None),
            TlsMode::CustomCa(path) => {
                let mut roots = rustls::RootCertStore::empty();
                let certs = CertificateDer::pem_file_iter(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                for cert in certs {
                    let cert = cert.map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                    roots
                        .add(cert)
                        .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                }
                builder.with_root_certificates(roots).with_no_client_auth()
            }
            TlsMode::DangerAcceptInvalid => {
                tracing::warn!("certificate verification disabled for push connection");
                builder
                    .dangerous()
                    .with_custom_certificate_verifier(Arc::new(AcceptAnyCert {
                        schemes: provider
                            .signature_verification_algorithms
                            .supported_schemes(),
                    }))
                    .with_no_client_auth()
            }
        };

        Ok(Some(Arc::new(config)))
    }
}

/// Verifier that trusts every server certificate.
#[derive(Debug)]
struct AcceptAnyCert {
    schemes: Vec<SignatureScheme>,
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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.schemes.clone()
    }
}
