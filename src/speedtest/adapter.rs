//! Proxy adapters
//!
//! An adapter turns a loosely-typed [`ProxyConfig`] into a [`ProxyHandle`]
//! able to open connections through that proxy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Proxy, ProxyConfig};
use crate::speedtest::tls::TlsConnector;
use crate::speedtest::transport::{ProxyConnection, ProxyTransport};

/// Opaque capability to reach targets through one proxy
#[async_trait]
pub trait ProxyHandle: Send + Sync {
    /// Display name of the proxy
    fn name(&self) -> &str;

    /// Protocol name (`socks5`, `vless`, ...)
    fn kind(&self) -> &str;

    /// Open a stream to `host:port` through the proxy
    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>>;
}

/// Parses proxy configurations into handles
pub trait ProxyAdapter: Send + Sync {
    fn parse_proxy(&self, config: &ProxyConfig) -> Result<Arc<dyn ProxyHandle>>;
}

/// A parsed proxy handle together with the configuration it came from
#[derive(Clone)]
pub struct ProxyEntry {
    pub handle: Arc<dyn ProxyHandle>,
    pub config: ProxyConfig,
}

impl ProxyEntry {
    pub fn new(handle: Arc<dyn ProxyHandle>, config: ProxyConfig) -> Self {
        Self { handle, config }
    }

    /// Parse a configuration with the given adapter
    pub fn parse(adapter: &dyn ProxyAdapter, config: ProxyConfig) -> Result<Self> {
        let handle = adapter.parse_proxy(&config)?;
        Ok(Self { handle, config })
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn kind(&self) -> &str {
        self.handle.kind()
    }
}

impl std::fmt::Debug for ProxyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyEntry")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Built-in adapter for HTTP(S) CONNECT and SOCKS4/4a/5 proxies
#[derive(Clone)]
pub struct StandardAdapter {
    tls: TlsConnector,
}

impl StandardAdapter {
    /// `tls` is used for the hop to HTTPS proxies
    pub fn new(tls: TlsConnector) -> Self {
        Self { tls }
    }
}

impl ProxyAdapter for StandardAdapter {
    fn parse_proxy(&self, config: &ProxyConfig) -> Result<Arc<dyn ProxyHandle>> {
        Ok(Arc::new(StandardHandle {
            proxy: Proxy::from_config(config)?,
            tls: self.tls.clone(),
        }))
    }
}

/// Handle produced by [`StandardAdapter`]
pub struct StandardHandle {
    proxy: Proxy,
    tls: TlsConnector,
}

#[async_trait]
impl ProxyHandle for StandardHandle {
    fn name(&self) -> &str {
        &self.proxy.name
    }

    fn kind(&self) -> &str {
        self.proxy.protocol.as_str()
    }

    async fn connect(&self, host: &str, port: u16) -> Result<Box<dyn ProxyConnection>> {
        ProxyTransport::connect(&self.proxy, &self.tls, host, port).await
    }
}
