use std::env;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{Result, SpeedTestError};
use crate::models::ResultSort;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Transfer and scheduling parameters for a test run
    pub speedtest: SpeedTestConfig,
    /// Ranking and filtering of finished results
    pub report: ReportConfig,
    /// Logging configuration
    pub log: LogConfig,
    /// Path to the YAML/JSON proxy list
    pub proxy_file: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeedTestConfig {
    /// Base URL of the speed-test server (http or https)
    pub server_url: String,
    /// Bytes requested per download attempt
    pub download_size: u64,
    /// Bytes sent per upload attempt
    pub upload_size: u64,
    /// Concurrent download attempts per proxy
    pub download_attempts: usize,
    /// Concurrent upload attempts per proxy
    pub upload_attempts: usize,
    /// Number of proxies tested at the same time
    pub concurrency: usize,
    /// Upper bound for a single transfer attempt
    pub transfer_timeout: Duration,
    /// Skip the upload phase entirely
    pub skip_upload: bool,
}

impl Default for SpeedTestConfig {
    fn default() -> Self {
        Self {
            server_url: "https://speed.cloudflare.com".to_string(),
            download_size: 10 * 1024 * 1024,
            upload_size: 5 * 1024 * 1024,
            download_attempts: 3,
            upload_attempts: 3,
            concurrency: 4,
            transfer_timeout: Duration::from_secs(10),
            skip_upload: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportConfig {
    /// Result ordering
    pub sort: ResultSort,
    /// Minimum download speed in bytes/s (0 = no minimum)
    pub min_download_speed: f64,
    /// Minimum upload speed in bytes/s (0 = no minimum)
    pub min_upload_speed: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            sort: ResultSort::Download,
            min_download_speed: 0.0,
            min_upload_speed: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let speedtest = SpeedTestConfig {
            server_url: parse_server_url(&get_env_or(
                "SPEEDTEST_SERVER_URL",
                "https://speed.cloudflare.com",
            ))?,
            download_size: parse_env("SPEEDTEST_DOWNLOAD_SIZE", "10485760")?,
            upload_size: parse_env("SPEEDTEST_UPLOAD_SIZE", "5242880")?,
            download_attempts: parse_positive("SPEEDTEST_DOWNLOAD_ATTEMPTS", "3")?,
            upload_attempts: parse_positive("SPEEDTEST_UPLOAD_ATTEMPTS", "3")?,
            concurrency: parse_positive("SPEEDTEST_CONCURRENCY", "4")?,
            transfer_timeout: Duration::from_secs(parse_positive::<u64>(
                "SPEEDTEST_TIMEOUT",
                "10",
            )?),
            skip_upload: parse_env("SPEEDTEST_SKIP_UPLOAD", "false")?,
        };

        let sort_raw = get_env_or("SPEEDTEST_SORT", "download");
        let report = ReportConfig {
            sort: ResultSort::from_str(&sort_raw).ok_or_else(|| {
                SpeedTestError::InvalidConfig(format!(
                    "SPEEDTEST_SORT must be one of download, upload, name (got {})",
                    sort_raw
                ))
            })?,
            min_download_speed: parse_env("SPEEDTEST_MIN_DOWNLOAD_SPEED", "0")?,
            min_upload_speed: parse_env("SPEEDTEST_MIN_UPLOAD_SPEED", "0")?,
        };

        let proxy_file = env::var("SPEEDTEST_PROXY_FILE")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Config {
            speedtest,
            report,
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
            proxy_file,
        })
    }

    /// Get the proxy list path, failing when it was not configured
    pub fn require_proxy_file(&self) -> Result<&str> {
        self.proxy_file
            .as_deref()
            .ok_or_else(|| SpeedTestError::MissingEnvVar("SPEEDTEST_PROXY_FILE".to_string()))
    }
}

fn parse_server_url(raw: &str) -> Result<String> {
    let url = Url::parse(raw.trim()).map_err(|e| {
        SpeedTestError::InvalidConfig(format!("SPEEDTEST_SERVER_URL must be a valid URL: {}", e))
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SpeedTestError::InvalidConfig(format!(
            "SPEEDTEST_SERVER_URL has unsupported scheme: {}",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(SpeedTestError::InvalidConfig(
            "SPEEDTEST_SERVER_URL must include a host".into(),
        ));
    }

    Ok(url.as_str().trim_end_matches('/').to_string())
}

fn parse_env<T: FromStr>(key: &str, default: &str) -> Result<T> {
    get_env_or(key, default)
        .trim()
        .parse()
        .map_err(|_| SpeedTestError::InvalidConfig(format!("{} has an invalid value", key)))
}

fn parse_positive<T: FromStr + PartialOrd + Default>(key: &str, default: &str) -> Result<T> {
    let value: T = parse_env(key, default)?;
    if value <= T::default() {
        return Err(SpeedTestError::InvalidConfig(format!(
            "{} must be greater than zero",
            key
        )));
    }
    Ok(value)
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
