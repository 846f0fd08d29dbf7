//! Proxy identity and deduplication
//!
//! Two configurations that target the same `server`, `port` and `type` are the
//! same network endpoint, whatever their names, credentials, or transport
//! options. Only one of them is worth benchmarking.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, info};

use crate::models::{canonical_port, ProxyConfig};
use crate::speedtest::adapter::ProxyEntry;

/// Deduplication key of a proxy entry
pub fn dedup_key(entry: &ProxyEntry) -> String {
    config_dedup_key(&entry.config)
}

/// Deduplication key of a raw configuration.
///
/// The key is the JSON array `[server, port, type]`. JSON string escaping
/// keeps distinct triples from ever encoding to the same text; missing
/// fields encode as `null`.
pub fn config_dedup_key(config: &ProxyConfig) -> String {
    let field = |key: &str| config.get(key).cloned().unwrap_or(Value::Null);

    let port = match config.get("port") {
        Some(value) => canonical_port(value)
            .map(Value::from)
            .unwrap_or_else(|| value.clone()),
        None => Value::Null,
    };

    Value::Array(vec![field("server"), port, field("type")]).to_string()
}

/// Keep the first entry for every endpoint, preserving input order
pub fn dedup_proxies(entries: Vec<ProxyEntry>) -> Vec<ProxyEntry> {
    let total = entries.len();
    let mut seen = HashSet::with_capacity(total);

    let unique: Vec<ProxyEntry> = entries
        .into_iter()
        .filter(|entry| {
            let key = dedup_key(entry);
            if seen.contains(&key) {
                debug!("Skipping duplicate proxy {} ({})", entry.name(), key);
                return false;
            }
            seen.insert(key);
            true
        })
        .collect();

    if unique.len() < total {
        info!(
            "Removed {} duplicate proxies, {} left to test",
            total - unique.len(),
            unique.len()
        );
    }

    unique
}
