//! In-memory adapter, handle, and engine for tests

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::{Result, SpeedTestError};
use crate::models::{config_str, ProxyConfig};
use crate::speedtest::adapter::{ProxyAdapter, ProxyEntry, ProxyHandle};
use crate::speedtest::summary::TransferOutcome;
use crate::speedtest::transfer::TransferEngine;
use crate::speedtest::transport::ProxyConnection;

pub struct StubHandle {
    name: String,
    kind: String,
}

#[async_trait]
impl ProxyHandle for StubHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> &str {
        &self.kind
    }

    async fn connect(&self, _host: &str, _port: u16) -> Result<Box<dyn ProxyConnection>> {
        Err(SpeedTestError::ProxyConnectionFailed("stub handle".to_string()))
    }
}

/// Accepts any config with `name` and `type`
pub struct StubAdapter;

impl ProxyAdapter for StubAdapter {
    fn parse_proxy(&self, config: &ProxyConfig) -> Result<Arc<dyn ProxyHandle>> {
        let name = config_str(config, "name")
            .ok_or_else(|| SpeedTestError::ProxyParse("missing field `name`".into()))?;
        let kind = config_str(config, "type")
            .ok_or_else(|| SpeedTestError::ProxyParse("missing field `type`".into()))?;
        Ok(Arc::new(StubHandle {
            name: name.to_string(),
            kind: kind.to_string(),
        }))
    }
}

pub fn config(value: Value) -> ProxyConfig {
    match value {
        Value::Object(map) => map,
        _ => panic!("test config must be an object"),
    }
}

pub fn entry(value: Value) -> ProxyEntry {
    match ProxyEntry::parse(&StubAdapter, config(value)) {
        Ok(entry) => entry,
        Err(e) => panic!("stub parse failed: {}", e),
    }
}

/// Engine whose outcomes are scripted per proxy name.
///
/// Attempts pop outcomes from the front of that proxy's queue; an empty or
/// missing queue yields `default`.
pub struct ScriptedEngine {
    downloads: Mutex<HashMap<String, Vec<TransferOutcome>>>,
    uploads: Mutex<HashMap<String, Vec<TransferOutcome>>>,
    default: TransferOutcome,
    delay: Duration,
    calls: Mutex<Vec<(String, &'static str, u64)>>,
}

impl ScriptedEngine {
    pub fn new(default: TransferOutcome) -> Self {
        Self {
            downloads: Mutex::new(HashMap::new()),
            uploads: Mutex::new(HashMap::new()),
            default,
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script_download(self, name: &str, outcomes: Vec<TransferOutcome>) -> Self {
        self.downloads.lock().insert(name.to_string(), outcomes);
        self
    }

    pub fn script_upload(self, name: &str, outcomes: Vec<TransferOutcome>) -> Self {
        self.uploads.lock().insert(name.to_string(), outcomes);
        self
    }

    /// Recorded `(proxy, direction, size)` calls
    pub fn calls(&self) -> Vec<(String, &'static str, u64)> {
        self.calls.lock().clone()
    }

    fn next(
        &self,
        queue: &Mutex<HashMap<String, Vec<TransferOutcome>>>,
        entry: &ProxyEntry,
        direction: &'static str,
        size: u64,
    ) -> TransferOutcome {
        self.calls
            .lock()
            .push((entry.name().to_string(), direction, size));
        let mut queue = queue.lock();
        match queue.get_mut(entry.name()) {
            Some(outcomes) if !outcomes.is_empty() => outcomes.remove(0),
            _ => self.default.clone(),
        }
    }
}

#[async_trait]
impl TransferEngine for ScriptedEngine {
    async fn download(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome {
        let outcome = self.next(&self.downloads, entry, "download", size);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }

    async fn upload(&self, entry: &ProxyEntry, size: u64) -> TransferOutcome {
        let outcome = self.next(&self.uploads, entry, "upload", size);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        outcome
    }
}
