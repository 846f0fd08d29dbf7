//! Speed-test pipeline
//!
//! Parsing and deduplication of proxies, transfer attempts through each
//! proxy, and aggregation of their outcomes.

pub mod adapter;
pub mod identity;
pub mod runner;
pub mod summary;
pub mod tls;
pub mod transfer;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use adapter::{ProxyAdapter, ProxyEntry, ProxyHandle, StandardAdapter, StandardHandle};
pub use identity::{config_dedup_key, dedup_key, dedup_proxies};
pub use runner::{finalize, Direction, SpeedTester};
pub use summary::{SummarySnapshot, TransferOutcome, TransferSummary};
pub use tls::TlsConnector;
pub use transfer::{HttpTransferEngine, TransferEngine};
pub use transport::{ProxyConnection, ProxyTransport};
