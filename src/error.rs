use thiserror::Error;

/// Unified error type for the speed tester
#[derive(Error, Debug)]
pub enum SpeedTestError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    // Proxy errors
    #[error("Failed to parse proxy: {0}")]
    ProxyParse(String),

    #[error("Unsupported proxy protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid proxy address: {0}")]
    InvalidProxyAddress(String),

    #[error("Proxy connection failed: {0}")]
    ProxyConnectionFailed(String),

    // Transfer errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("TLS error: {0}")]
    Tls(String),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Decoding errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type alias for speed tester operations
pub type Result<T> = std::result::Result<T, SpeedTestError>;

// Convert from hyper errors
impl From<hyper::Error> for SpeedTestError {
    fn from(err: hyper::Error) -> Self {
        SpeedTestError::Http(err.to_string())
    }
}

// Convert from URL parse errors
impl From<url::ParseError> for SpeedTestError {
    fn from(err: url::ParseError) -> Self {
        SpeedTestError::InvalidConfig(format!("invalid URL: {}", err))
    }
}

impl From<http::Error> for SpeedTestError {
    fn from(err: http::Error) -> Self {
        SpeedTestError::Http(err.to_string())
    }
}
