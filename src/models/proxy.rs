use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Result, SpeedTestError};

/// Loosely-typed proxy configuration as read from a YAML/JSON source
pub type ProxyConfig = Map<String, Value>;

/// Proxy protocol type understood by the built-in transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks4a,
    Socks5,
}

impl ProxyProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks4a => "socks4a",
            ProxyProtocol::Socks5 => "socks5",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "http" => Some(ProxyProtocol::Http),
            "https" => Some(ProxyProtocol::Https),
            "socks4" => Some(ProxyProtocol::Socks4),
            "socks4a" => Some(ProxyProtocol::Socks4a),
            "socks5" | "socks" => Some(ProxyProtocol::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProxyProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Proxy endpoint resolved from a [`ProxyConfig`] by the built-in adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    pub password: Option<String>,
    /// TLS server name for HTTPS proxies when it differs from `server`
    pub sni: Option<String>,
}

impl Proxy {
    /// Build a proxy from its configuration mapping
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        let kind = config_str(config, "type")
            .ok_or_else(|| SpeedTestError::ProxyParse("missing field `type`".into()))?;
        let mut protocol = ProxyProtocol::from_str(kind)
            .ok_or_else(|| SpeedTestError::UnsupportedProtocol(kind.to_string()))?;

        // Clash marks TLS-wrapped HTTP proxies with `tls: true` instead of a separate type.
        if protocol == ProxyProtocol::Http
            && config.get("tls").and_then(Value::as_bool).unwrap_or(false)
        {
            protocol = ProxyProtocol::Https;
        }

        let server = config_str(config, "server")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| SpeedTestError::ProxyParse("missing field `server`".into()))?;

        let port = config
            .get("port")
            .and_then(canonical_port)
            .and_then(|p| u16::try_from(p).ok())
            .filter(|p| *p != 0)
            .ok_or_else(|| {
                SpeedTestError::InvalidProxyAddress(format!(
                    "{} has no valid port",
                    server
                ))
            })?;

        let name = config_str(config, "name")
            .map(str::to_string)
            .unwrap_or_else(|| format_host_port(server, port));

        Ok(Proxy {
            name,
            server: server.to_string(),
            port,
            protocol,
            username: config_str(config, "username").map(str::to_string),
            password: config_str(config, "password").map(str::to_string),
            sni: config_str(config, "sni")
                .or_else(|| config_str(config, "servername"))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }

    /// Get the `host:port` address, bracketing IPv6 literals
    pub fn address(&self) -> String {
        format_host_port(&self.server, self.port)
    }

    /// Name presented in the TLS handshake with an HTTPS proxy
    pub fn tls_server_name(&self) -> &str {
        self.sni.as_deref().unwrap_or(&self.server)
    }

    /// Get proxy URL with the username but never the password
    pub fn redacted_url(&self) -> String {
        match &self.username {
            Some(user) => format!("{}://{}@{}", self.protocol, user, self.address()),
            None => format!("{}://{}", self.protocol, self.address()),
        }
    }
}

/// Normalize a port value to an integer.
///
/// Generic deserializers hand ports over as integers, as floats with a zero
/// fractional part (`443.0`), or occasionally as decimal strings. All of those
/// represent the same port and collapse to one integer here.
pub fn canonical_port(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                .map(|f| f as u64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a string field from a proxy configuration
pub fn config_str<'a>(config: &'a ProxyConfig, key: &str) -> Option<&'a str> {
    config.get(key).and_then(Value::as_str)
}

/// Parse a proxy list document.
///
/// Accepts either a mapping with a top-level `proxies` sequence (Clash
/// style) or a bare sequence of mappings. YAML is a superset of JSON, so both
/// formats go through the YAML parser. Non-mapping entries are skipped.
pub fn parse_proxy_list(raw: &str) -> Result<Vec<ProxyConfig>> {
    let document: Value = serde_yaml::from_str(raw)?;

    let items = match document {
        Value::Array(items) => items,
        Value::Object(mut root) => match root.remove("proxies") {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(SpeedTestError::InvalidConfig(
                    "`proxies` must be a sequence".into(),
                ))
            }
            None => {
                return Err(SpeedTestError::InvalidConfig(
                    "proxy list has no `proxies` field".into(),
                ))
            }
        },
        Value::Null => Vec::new(),
        _ => {
            return Err(SpeedTestError::InvalidConfig(
                "proxy list must be a sequence or a mapping with `proxies`".into(),
            ))
        }
    };

    let mut configs = Vec::with_capacity(items.len());
    for (index, item) in items.into_iter().enumerate() {
        match item {
            Value::Object(config) => configs.push(config),
            other => warn!("Skipping proxy #{}: expected a mapping, got {}", index, other),
        }
    }

    Ok(configs)
}

fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}
