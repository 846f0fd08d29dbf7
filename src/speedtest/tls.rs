//! TLS client for HTTPS proxies and https speed-test servers

use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_rustls::client::TlsStream;

pub use tokio_rustls::TlsConnector;

use crate::error::{Result, SpeedTestError};

/// Build a connector that trusts the bundled webpki root set
pub fn connector() -> Result<TlsConnector> {
    let roots = RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| SpeedTestError::Tls(format!("failed to build client config: {}", e)))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

/// Run the client handshake over an established stream
pub async fn handshake<S>(
    connector: &TlsConnector,
    stream: S,
    server_name: &str,
) -> Result<TlsStream<S>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let name = ServerName::try_from(server_name.to_string()).map_err(|e| {
        SpeedTestError::Tls(format!("invalid server name {}: {}", server_name, e))
    })?;

    connector.connect(name, stream).await.map_err(|e| {
        SpeedTestError::Tls(format!("handshake with {} failed: {}", server_name, e))
    })
}
