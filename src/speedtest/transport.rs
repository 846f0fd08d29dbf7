//! Proxy transport layer for HTTP and SOCKS protocols
//!
//! Opens a byte stream to a target host through an upstream proxy.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_socks::tcp::{Socks4Stream, Socks5Stream};
use tracing::{debug, instrument};

use crate::error::{Result, SpeedTestError};
use crate::models::{Proxy, ProxyProtocol};
use crate::speedtest::tls::{self, TlsConnector};

/// Upper bound for the CONNECT response header block
const MAX_CONNECT_RESPONSE: usize = 8 * 1024;

/// Proxy transport handler
///
/// Manages connections through various proxy protocols
pub struct ProxyTransport;

impl ProxyTransport {
    /// Connect to a target through the specified proxy.
    ///
    /// `tls` secures the hop to HTTPS proxies; other protocols ignore it.
    #[instrument(skip(proxy, tls), fields(proxy = %proxy.redacted_url(), target = %target_host))]
    pub async fn connect(
        proxy: &Proxy,
        tls: &TlsConnector,
        target_host: &str,
        target_port: u16,
    ) -> Result<Box<dyn ProxyConnection>> {
        let stream: Box<dyn ProxyConnection> = match proxy.protocol {
            ProxyProtocol::Http => {
                Box::new(Self::connect_http(proxy, target_host, target_port).await?)
            }
            ProxyProtocol::Https => {
                Box::new(Self::connect_https(proxy, tls, target_host, target_port).await?)
            }
            ProxyProtocol::Socks4 => {
                Box::new(Self::connect_socks4(proxy, target_host, target_port).await?)
            }
            ProxyProtocol::Socks4a => {
                Box::new(Self::connect_socks4a(proxy, target_host, target_port).await?)
            }
            ProxyProtocol::Socks5 => {
                Box::new(Self::connect_socks5(proxy, target_host, target_port).await?)
            }
        };
        Ok(stream)
    }

    /// Connect through HTTP CONNECT method
    async fn connect_http(proxy: &Proxy, target_host: &str, target_port: u16) -> Result<TcpStream> {
        debug!("Connecting to HTTP proxy at {}", proxy.address());

        let mut stream = Self::dial(proxy).await?;
        Self::establish_tunnel(&mut stream, proxy, target_host, target_port).await?;
        Ok(stream)
    }

    /// Connect through HTTP CONNECT sent inside a TLS session with the proxy
    async fn connect_https(
        proxy: &Proxy,
        tls: &TlsConnector,
        target_host: &str,
        target_port: u16,
    ) -> Result<TlsStream<TcpStream>> {
        debug!("Connecting to HTTPS proxy at {}", proxy.address());

        let socket = Self::dial(proxy).await?;
        let mut stream = tls::handshake(tls, socket, proxy.tls_server_name()).await?;
        Self::establish_tunnel(&mut stream, proxy, target_host, target_port).await?;
        Ok(stream)
    }

    /// Send CONNECT and wait for a 200 response
    async fn establish_tunnel<S>(
        stream: &mut S,
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let connect_request = Self::build_connect_request(proxy, target_host, target_port);
        stream.write_all(connect_request.as_bytes()).await.map_err(|e| {
            SpeedTestError::ProxyConnectionFailed(format!("Failed to send CONNECT: {}", e))
        })?;
        stream.flush().await?;

        let head = Self::read_response_head(stream).await?;
        let status_line = head.lines().next().unwrap_or("Unknown error");
        if !status_line.starts_with("HTTP/1.1 200") && !status_line.starts_with("HTTP/1.0 200") {
            return Err(SpeedTestError::ProxyConnectionFailed(format!(
                "CONNECT failed: {}",
                status_line
            )));
        }

        debug!("HTTP CONNECT tunnel established");
        Ok(())
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(proxy: &Proxy, target_host: &str, target_port: u16) -> String {
        let authority = if target_host.contains(':') && !target_host.starts_with('[') {
            format!("[{}]:{}", target_host, target_port)
        } else {
            format!("{}:{}", target_host, target_port)
        };
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if let Some(username) = &proxy.username {
            let password = proxy.password.as_deref().unwrap_or("");
            let credentials = format!("{}:{}", username, password);
            let encoded = BASE64.encode(credentials.as_bytes());
            request.push_str(&format!("Proxy-Authorization: Basic {}\r\n", encoded));
        }

        request.push_str("\r\n");
        request
    }

    /// Read the CONNECT response up to the blank line, never past it
    async fn read_response_head<S>(stream: &mut S) -> Result<String>
    where
        S: AsyncRead + Unpin,
    {
        let mut head = Vec::with_capacity(256);
        let mut byte = [0u8; 1];

        while !head.ends_with(b"\r\n\r\n") {
            if head.len() >= MAX_CONNECT_RESPONSE {
                return Err(SpeedTestError::ProxyConnectionFailed(
                    "CONNECT response too large".to_string(),
                ));
            }
            let n = stream.read(&mut byte).await.map_err(|e| {
                SpeedTestError::ProxyConnectionFailed(format!(
                    "Failed to read CONNECT response: {}",
                    e
                ))
            })?;
            if n == 0 {
                return Err(SpeedTestError::ProxyConnectionFailed(
                    "empty CONNECT response".to_string(),
                ));
            }
            head.push(byte[0]);
        }

        Ok(String::from_utf8_lossy(&head).into_owned())
    }

    /// Connect through SOCKS4 proxy
    async fn connect_socks4(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to SOCKS4 proxy at {}", proxy.address());

        // SOCKS4 requires IP address, not hostname
        let target_ip: std::net::Ipv4Addr = target_host.parse().map_err(|_| {
            SpeedTestError::ProxyConnectionFailed(
                "SOCKS4 requires IP address, not hostname. Use SOCKS4a or SOCKS5 for DNS resolution"
                    .to_string(),
            )
        })?;
        let target = std::net::SocketAddr::from((target_ip, target_port));

        let socket = Self::dial(proxy).await?;
        let stream = match &proxy.username {
            Some(user_id) => {
                Socks4Stream::connect_with_userid_and_socket(socket, target, user_id).await
            }
            None => Socks4Stream::connect_with_socket(socket, target).await,
        }
        .map_err(|e| {
            SpeedTestError::ProxyConnectionFailed(format!("SOCKS4 connect failed: {}", e))
        })?;

        debug!("SOCKS4 connection established");
        Ok(stream.into_inner())
    }

    /// Connect through SOCKS4a proxy (supports hostname)
    async fn connect_socks4a(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to SOCKS4a proxy at {}", proxy.address());

        let socket = Self::dial(proxy).await?;
        let target = (target_host, target_port);
        let stream = match &proxy.username {
            Some(user_id) => {
                Socks4Stream::connect_with_userid_and_socket(socket, target, user_id).await
            }
            None => Socks4Stream::connect_with_socket(socket, target).await,
        }
        .map_err(|e| {
            SpeedTestError::ProxyConnectionFailed(format!("SOCKS4a connect failed: {}", e))
        })?;

        debug!("SOCKS4a connection established");
        Ok(stream.into_inner())
    }

    /// Connect through SOCKS5 proxy
    async fn connect_socks5(
        proxy: &Proxy,
        target_host: &str,
        target_port: u16,
    ) -> Result<TcpStream> {
        debug!("Connecting to SOCKS5 proxy at {}", proxy.address());

        let socket = Self::dial(proxy).await?;
        let target = (target_host, target_port);
        let stream = match (&proxy.username, &proxy.password) {
            (Some(username), Some(password)) => {
                Socks5Stream::connect_with_password_and_socket(socket, target, username, password)
                    .await
            }
            _ => Socks5Stream::connect_with_socket(socket, target).await,
        }
        .map_err(|e| {
            SpeedTestError::ProxyConnectionFailed(format!("SOCKS5 connect failed: {}", e))
        })?;

        debug!("SOCKS5 connection established");
        Ok(stream.into_inner())
    }

    async fn dial(proxy: &Proxy) -> Result<TcpStream> {
        TcpStream::connect((proxy.server.as_str(), proxy.port))
            .await
            .map_err(|e| {
                SpeedTestError::ProxyConnectionFailed(format!(
                    "TCP connect to {} failed: {}",
                    proxy.address(),
                    e
                ))
            })
    }
}

/// Trait for proxy connections
pub trait ProxyConnection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl ProxyConnection for TcpStream {}

impl<S> ProxyConnection for TlsStream<S> where S: AsyncRead + AsyncWrite + Unpin + Send + 'static
{}

impl ProxyConnection for Box<dyn ProxyConnection> {}

#[cfg(test)]
impl ProxyConnection for tokio::io::DuplexStream {}
