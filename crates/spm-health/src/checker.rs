//! Liveness probe logic.
//!
//! A probe is a single bounded `GET {endpoint}/health`. Any 2xx answer is
//! healthy; everything else (bad URL, DNS or connect failure, TLS error,
//! timeout, non-2xx) is not. The finer-grained [`ProbeResult`] only feeds
//! debug logging.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::Uri;
use http_body_util::Empty;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::error::{HealthError, HealthResult};

const USER_AGENT: &str = concat!("spm-health/", env!("CARGO_PKG_VERSION"));

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResult {
    /// The health endpoint returned 2xx.
    Healthy,
    /// The health endpoint answered with a non-2xx status.
    Unhealthy,
    /// The probe could not be completed (bad URL, connection error, timeout).
    Failed,
}

impl ProbeResult {
    pub fn is_healthy(self) -> bool {
        self == ProbeResult::Healthy
    }
}

/// Something that can tell whether a provider endpoint is alive.
pub trait Probe: Send + Sync {
    /// Probe `endpoint` once. Never fails; problems read as `false`.
    fn probe(&self, endpoint: &str) -> impl Future<Output = bool> + Send;
}

/// Health URL for a provider base endpoint.
pub fn health_url(endpoint: &str) -> String {
    format!("{}/health", endpoint.trim_end_matches('/'))
}

/// HTTP(S) prober with a per-probe timeout.
#[derive(Clone)]
pub struct HttpProber {
    timeout: Duration,
    tls: Arc<rustls::ClientConfig>,
}

impl HttpProber {
    /// Create a prober that verifies TLS against the Mozilla root store.
    pub fn new(timeout: Duration) -> HealthResult<Self> {
        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        let config = rustls::ClientConfig::builder_with_provider(
            rustls::crypto::ring::default_provider().into(),
        )
        .with_safe_default_protocol_versions()
        .map_err(|e| HealthError::Tls(e.to_string()))?
        .with_root_certificates(root_store)
        .with_no_client_auth();

        Ok(Self::with_tls_config(timeout, Arc::new(config)))
    }

    /// Create a prober with a pre-built TLS client configuration.
    pub fn with_tls_config(timeout: Duration, tls: Arc<rustls::ClientConfig>) -> Self {
        Self { timeout, tls }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Probe `{endpoint}/health` and classify the outcome.
    pub async fn check(&self, endpoint: &str) -> ProbeResult {
        let url = health_url(endpoint);
        match tokio::time::timeout(self.timeout, self.request(&url)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(%url, timeout_ms = self.timeout.as_millis() as u64, "health probe timed out");
                ProbeResult::Failed
            }
        }
    }

    async fn request(&self, url: &str) -> ProbeResult {
        let uri: Uri = match url.parse() {
            Ok(uri) => uri,
            Err(e) => {
                debug!(error = %e, %url, "health probe url invalid");
                return ProbeResult::Failed;
            }
        };
        let secure = match uri.scheme_str() {
            Some("http") => false,
            Some("https") => true,
            other => {
                debug!(scheme = ?other, %url, "health probe scheme unsupported");
                return ProbeResult::Failed;
            }
        };
        let Some(authority) = uri.authority().cloned() else {
            debug!(%url, "health probe url has no host");
            return ProbeResult::Failed;
        };
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = authority.port_u16().unwrap_or(if secure { 443 } else { 80 });

        let server_name = if secure {
            match ServerName::try_from(host.clone()) {
                Ok(name) => Some(name),
                Err(e) => {
                    debug!(error = %e, %url, "health probe server name invalid");
                    return ProbeResult::Failed;
                }
            }
        } else {
            None
        };

        let stream = match TcpStream::connect((host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, %url, "health probe connection failed");
                return ProbeResult::Failed;
            }
        };

        let Some(server_name) = server_name else {
            return send_probe(stream, &uri, authority.as_str()).await;
        };
        let connector = TlsConnector::from(Arc::clone(&self.tls));
        match connector.connect(server_name, stream).await {
            Ok(tls) => send_probe(tls, &uri, authority.as_str()).await,
            Err(e) => {
                debug!(error = %e, %url, "health probe tls handshake failed");
                ProbeResult::Failed
            }
        }
    }
}

impl Probe for HttpProber {
    async fn probe(&self, endpoint: &str) -> bool {
        self.check(endpoint).await.is_healthy()
    }
}

/// Issue the GET over an established connection.
async fn send_probe<S>(stream: S, uri: &Uri, authority: &str) -> ProbeResult
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
        Ok(pair) => pair,
        Err(e) => {
            debug!(error = %e, %uri, "health probe handshake failed");
            return ProbeResult::Failed;
        }
    };

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let path = uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or("/health");
    let req = match http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", authority)
        .header("user-agent", USER_AGENT)
        .body(Empty::<Bytes>::new())
    {
        Ok(req) => req,
        Err(e) => {
            debug!(error = %e, %uri, "health probe request invalid");
            return ProbeResult::Failed;
        }
    };

    match sender.send_request(req).await {
        Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
        Ok(resp) => {
            debug!(status = %resp.status(), %uri, "health probe non-2xx");
            ProbeResult::Unhealthy
        }
        Err(e) => {
            debug!(error = %e, %uri, "health probe request failed");
            ProbeResult::Failed
        }
    }
}
