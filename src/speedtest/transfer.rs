//! Transfer execution
//!
//! A [`TransferEngine`] performs one download or upload attempt through a
//! proxy and reports it as a [`TransferOutcome`]. Failures are data, never
//! errors: the caller folds them into a summary.

use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{HOST, USER_AGENT};
use hyper::{Method, Request};
use hyper_util::rt::TokioIo;
use rand::RngCore;
use tracing::debug;
use url::Url;

use crate::error::{Result, SpeedTestError};
use crate::speedtest::adapter::ProxyEntry;
use crate::speedtest::summary::TransferOutcome;
use crate::speedtest::tls::{self, TlsConnector};
use crate::speedtest::transport::ProxyConnection;

const CLIENT_USER_AGENT: &str = concat!("speedtester/", env!("CARGO_PKG_VERSION"));

/// Performs single transfer attempts through a proxy
#[async_trait]
pub trait TransferEngine: Send + Sync {
    /// Download `size` bytes through the proxy
    async fn download(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome;

    /// Upload `size` bytes through the proxy
    async fn upload(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome;
}

/// HTTP/1.1 engine talking to a `/__down` + `/__up` speed-test server.
///
/// `https://` servers get a TLS session inside the proxy tunnel.
#[derive(Clone)]
pub struct HttpTransferEngine {
    host: String,
    port: u16,
    base_path: String,
    base_url: String,
    tls: Option<TlsConnector>,
}

impl HttpTransferEngine {
    pub fn new(server_url: &str, tls: TlsConnector) -> Result<Self> {
        let url = Url::parse(server_url)?;
        let tls = match url.scheme() {
            "http" => None,
            "https" => Some(tls),
            other => {
                return Err(SpeedTestError::InvalidConfig(format!(
                    "speed-test server must use http or https, got {}",
                    other
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| SpeedTestError::InvalidConfig("speed-test server has no host".into()))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls.is_some() { 443 } else { 80 });
        let base_path = url.path().trim_end_matches('/').to_string();
        let base_url = url.as_str().trim_end_matches('/').to_string();

        Ok(Self {
            host,
            port,
            base_path,
            base_url,
            tls,
        })
    }

    pub fn download_url(&self, size: u64) -> String {
        format!("{}/__down?bytes={}", self.base_url, size)
    }

    pub fn upload_url(&self) -> String {
        format!("{}/__up", self.base_url)
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    fn host_header(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        let default_port = if self.is_tls() { 443 } else { 80 };
        if self.port == default_port {
            host
        } else {
            format!("{}:{}", host, self.port)
        }
    }

    /// Send one request through the proxy and drain the response body.
    ///
    /// Returns the number of response body bytes received.
    async fn exchange(
        &self,
        entry: &ProxyEntry,
        method: Method,
        path: String,
        url: &str,
        body: Bytes,
    ) -> Result<u64> {
        let tunnel = entry.handle.connect(&self.host, self.port).await?;
        let conn: Box<dyn ProxyConnection> = match &self.tls {
            Some(connector) => Box::new(tls::handshake(connector, tunnel, &self.host).await?),
            None => tunnel,
        };

        let io = TokioIo::new(conn);
        let (mut sender, connection) = hyper::client::conn::http1::handshake(io).await?;

        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Connection ended: {}", e);
            }
        });

        let request = Request::builder()
            .method(method)
            .uri(path)
            .header(HOST, self.host_header())
            .header(USER_AGENT, CLIENT_USER_AGENT)
            .body(Full::new(body))?;

        let response = sender.send_request(request).await?;
        if !response.status().is_success() {
            return Err(SpeedTestError::UnexpectedStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        let mut body = response.into_body();
        let mut received = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = frame?;
            if let Some(chunk) = frame.data_ref() {
                received += chunk.len() as u64;
            }
        }

        Ok(received)
    }
}

#[async_trait]
impl TransferEngine for HttpTransferEngine {
    async fn download(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome {
        let url = self.download_url(size);
        let path = format!("{}/__down?bytes={}", self.base_path, size);
        let start = Instant::now();

        match self.exchange(entry, Method::GET, path, &url, Bytes::new()).await {
            Ok(received) => TransferOutcome::success(received, start.elapsed()),
            Err(e) => {
                TransferOutcome::failure(format!("download request to {} failed: {}", url, e))
            }
        }
    }

    async fn upload(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome {
        let url = self.upload_url();
        let path = format!("{}/__up", self.base_path);
        let payload = random_payload(size);
        let start = Instant::now();

        match self.exchange(entry, Method::POST, path, &url, payload).await {
            Ok(_) => TransferOutcome::success(size, start.elapsed()),
            Err(e) => {
                TransferOutcome::failure(format!("upload request to {} failed: {}", url, e))
            }
        }
    }
}

/// Incompressible upload body
fn random_payload(size: u64) -> Bytes {
    let mut buf = vec![0u8; usize::try_from(size).unwrap_or(usize::MAX)];
    rand::thread_rng().fill_bytes(&mut buf);
    Bytes::from(buf)
}
