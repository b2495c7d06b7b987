//! WebSocket transport: DNS, TCP, TLS, then a signed HTTP upgrade.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::{lookup_host, TcpStream};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::client_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::MaybeTlsStream;

use crate::credentials::Credentials;
use crate::endpoint::Endpoint;
use crate::error::ConnectError;
use crate::transport::{UpgradeSigner, WsStream};

/// Transport-level connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Deadline for the whole connect sequence, DNS through upgrade.
    pub connect_timeout: Duration,
    /// Extra CA certificates to trust, PEM encoded.
    pub ca_file: Option<PathBuf>,
    /// Client certificate chain for mutual TLS, PEM encoded.
    pub cert_file: Option<PathBuf>,
    /// Private key matching `cert_file`, PEM encoded.
    pub key_file: Option<PathBuf>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_millis(3000),
            ca_file: None,
            cert_file: None,
            key_file: None,
        }
    }
}

impl WebSocketConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ca_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_client_cert(
        mut self,
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
    ) -> Self {
        self.cert_file = Some(cert.into());
        self.key_file = Some(key.into());
        self
    }
}

/// An established WebSocket connection to a broker.
pub struct WebSocketTransport {
    stream: WsStream,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport").finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Runs the full connect sequence against `endpoint`.
    ///
    /// The sequence is DNS resolution, TCP connect, TLS handshake when the
    /// scheme requires it, then the signed WebSocket upgrade. Each stage maps
    /// to its own [`ConnectError`] variant; the whole sequence shares one
    /// deadline from `config.connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns the stage-specific [`ConnectError`], or
    /// [`ConnectError::TimeoutExceeded`] when the deadline elapses first.
    pub async fn connect(
        endpoint: &Endpoint,
        config: &WebSocketConfig,
        signer: &dyn UpgradeSigner,
        credentials: &Credentials,
    ) -> Result<Self, ConnectError> {
        timeout(
            config.connect_timeout,
            Self::connect_inner(endpoint, config, signer, credentials),
        )
        .await
        .map_err(|_| ConnectError::TimeoutExceeded)?
    }

    async fn connect_inner(
        endpoint: &Endpoint,
        config: &WebSocketConfig,
        signer: &dyn UpgradeSigner,
        credentials: &Credentials,
    ) -> Result<Self, ConnectError> {
        if !endpoint.scheme().is_websocket() {
            return Err(ConnectError::UpgradeFailed(format!(
                "{} is not a WebSocket endpoint",
                endpoint.scheme().as_str()
            )));
        }

        tracing::debug!(host = endpoint.host(), port = endpoint.port(), "resolving broker");
        let addrs: Vec<SocketAddr> = lookup_host((endpoint.host(), endpoint.port()))
            .await
            .map_err(|e| ConnectError::DnsFailure(e.to_string()))?
            .collect();
        if addrs.is_empty() {
            return Err(ConnectError::DnsFailure(format!(
                "no addresses for {}",
                endpoint.host()
            )));
        }

        let tcp = TcpStream::connect(addrs.as_slice())
            .await
            .map_err(|e| ConnectError::TcpFailure(e.to_string()))?;

        let stream = if endpoint.scheme().uses_tls() {
            let tls_config = build_tls_config(config)?;
            let server_name = ServerName::try_from(endpoint.host().to_string())
                .map_err(|e| ConnectError::TlsHandshakeFailure(e.to_string()))?;
            let connector = TlsConnector::from(Arc::new(tls_config));
            let tls = connector
                .connect(server_name, tcp)
                .await
                .map_err(|e| ConnectError::TlsHandshakeFailure(e.to_string()))?;
            MaybeTlsStream::Rustls(tls)
        } else {
            MaybeTlsStream::Plain(tcp)
        };

        let mut request = endpoint
            .websocket_url()
            .into_client_request()
            .map_err(|e| ConnectError::UpgradeFailed(e.to_string()))?;
        request
            .headers_mut()
            .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));
        signer.sign(&mut request, credentials)?;

        tracing::debug!(url = %endpoint.websocket_url(), "upgrading to WebSocket");
        let (ws, response) = client_async(request, stream).await.map_err(|e| match e {
            WsError::Http(response) => ConnectError::UpgradeRejected {
                status: response.status().as_u16(),
            },
            other => ConnectError::UpgradeFailed(other.to_string()),
        })?;

        tracing::debug!(status = response.status().as_u16(), "WebSocket upgrade accepted");
        Ok(Self { stream: ws })
    }

    pub(crate) fn into_stream(self) -> WsStream {
        self.stream
    }
}

fn build_tls_config(config: &WebSocketConfig) -> Result<ClientConfig, ConnectError> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(ca_file) = &config.ca_file {
        for cert in read_certs(ca_file)? {
            roots
                .add(cert)
                .map_err(|e| ConnectError::TlsHandshakeFailure(e.to_string()))?;
        }
    }

    let builder = ClientConfig::builder().with_root_certificates(roots);
    let tls_config = match (&config.cert_file, &config.key_file) {
        (Some(cert_file), Some(key_file)) => {
            let certs = read_certs(cert_file)?;
            let key = rustls_pemfile::private_key(&mut open_pem(key_file)?)
                .map_err(|e| ConnectError::TlsHandshakeFailure(e.to_string()))?
                .ok_or_else(|| {
                    ConnectError::TlsHandshakeFailure(format!(
                        "no private key in {}",
                        key_file.display()
                    ))
                })?;
            builder
                .with_client_auth_cert(certs, key)
                .map_err(|e| ConnectError::TlsHandshakeFailure(e.to_string()))?
        }
        (None, None) => builder.with_no_client_auth(),
        _ => {
            return Err(ConnectError::TlsHandshakeFailure(
                "client certificate and key must be provided together".to_string(),
            ));
        }
    };

    Ok(tls_config)
}

fn open_pem(path: &Path) -> Result<BufReader<File>, ConnectError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ConnectError::TlsHandshakeFailure(format!("{}: {e}", path.display())))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConnectError> {
    rustls_pemfile::certs(&mut open_pem(path)?)
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| ConnectError::TlsHandshakeFailure(format!("{}: {e}", path.display())))
}
