//! Speedtester - Proxy Speed Test Aggregator
//!
//! Benchmarks download and upload throughput through a list of proxies.
//!
//! ## Features
//!
//! - HTTP, HTTPS, SOCKS4, SOCKS4a, and SOCKS5 proxy support
//! - Plain http and TLS (rustls) speed-test servers
//! - Deduplication of proxies that share an endpoint
//! - Concurrent transfer attempts with per-attempt timeouts
//! - Aggregated speeds with first-seen error reporting
//! - Ranked and filtered JSON reports

pub mod config;
pub mod error;
pub mod models;
pub mod speedtest;

pub use config::Config;
pub use error::{Result, SpeedTestError};
