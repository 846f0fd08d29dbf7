//! Speed-test orchestration
//!
//! Parses and deduplicates proxies, dispatches concurrent transfer attempts
//! for each one, and turns the folded outcomes into [`ProxyResult`]s.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::config::SpeedTestConfig;
use crate::models::{config_str, format_speed, ProxyConfig, ProxyResult};
use crate::speedtest::adapter::{ProxyAdapter, ProxyEntry};
use crate::speedtest::identity::dedup_proxies;
use crate::speedtest::summary::{TransferOutcome, TransferSummary};
use crate::speedtest::transfer::TransferEngine;

/// Error reported when a direction produced neither a success nor a failure
pub const NO_ATTEMPTS_COMPLETED: &str = "no transfer attempts completed";

/// Error reported when successful transfers took no measurable time
pub const ZERO_ELAPSED_TIME: &str = "transfers completed in zero elapsed time";

/// Error reported for a proxy whose test aborted
pub const TEST_ABORTED: &str = "speed test aborted unexpectedly";

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Download => "download",
            Direction::Upload => "upload",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Turn a finished summary into `(speed, error)`.
///
/// Any success yields a speed of `total_bytes / average_duration` and no
/// error, even if other attempts failed. Without successes the first-seen
/// failure message is reported and the speed stays at zero. Exactly one of
/// speed and error is set.
pub fn finalize(summary: &TransferSummary) -> (f64, String) {
    let snapshot = summary.snapshot();

    if snapshot.success_count > 0 {
        let secs = snapshot.average_duration().as_secs_f64();
        if secs <= 0.0 {
            return (0.0, ZERO_ELAPSED_TIME.to_string());
        }
        return (snapshot.total_bytes as f64 / secs, String::new());
    }

    match snapshot.errors.into_iter().next() {
        Some(error) => (0.0, error),
        None => (0.0, NO_ATTEMPTS_COMPLETED.to_string()),
    }
}

/// Runs speed tests over a set of proxies
pub struct SpeedTester {
    config: SpeedTestConfig,
    adapter: Arc<dyn ProxyAdapter>,
    engine: Arc<dyn TransferEngine>,
}

impl SpeedTester {
    pub fn new(
        config: SpeedTestConfig,
        adapter: Arc<dyn ProxyAdapter>,
        engine: Arc<dyn TransferEngine>,
    ) -> Self {
        Self {
            config,
            adapter,
            engine,
        }
    }

    /// Parse configurations, skipping the ones the adapter rejects
    pub fn parse_entries(&self, configs: Vec<ProxyConfig>) -> Vec<ProxyEntry> {
        let total = configs.len();
        let entries: Vec<ProxyEntry> = configs
            .into_iter()
            .enumerate()
            .filter_map(|(index, config)| {
                let label = config
                    .get("name")
                    .and_then(|v| v.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("#{}", index));
                match ProxyEntry::parse(self.adapter.as_ref(), config) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        warn!("Skipping proxy {}: {}", label, e);
                        None
                    }
                }
            })
            .collect();

        if entries.len() < total {
            info!("Parsed {} of {} proxies", entries.len(), total);
        }
        entries
    }

    /// Test every distinct proxy and return one result per proxy
    pub async fn test_proxies(&self, configs: Vec<ProxyConfig>) -> Vec<ProxyResult> {
        let entries = dedup_proxies(self.parse_entries(configs));
        let concurrency = self.config.concurrency.max(1);

        info!(
            "Testing {} proxies, {} at a time",
            entries.len(),
            concurrency
        );

        let results = futures::stream::iter(entries)
            .map(|entry| async move {
                match AssertUnwindSafe(self.test_proxy(&entry)).catch_unwind().await {
                    Ok(result) => result,
                    Err(_) => {
                        warn!("Speed test for {} aborted", entry.name());
                        let kind = config_str(&entry.config, "type").unwrap_or_default();
                        ProxyResult::failed(entry.name(), kind, TEST_ABORTED)
                    }
                }
            })
            .buffer_unordered(concurrency)
            .collect::<Vec<ProxyResult>>()
            .await;

        let failed = results
            .iter()
            .filter(|r| !r.download_error.is_empty())
            .count();
        info!(
            "Speed test complete: {} proxies tested, {} failed to download",
            results.len(),
            failed
        );

        results
    }

    /// Test a single proxy in both directions
    #[instrument(skip(self, entry), fields(proxy = %entry.name(), kind = %entry.kind()))]
    pub async fn test_proxy(&self, entry: &ProxyEntry) -> ProxyResult {
        let download = self
            .run_direction(
                entry,
                Direction::Download,
                self.config.download_attempts,
                self.config.download_size,
            )
            .await;
        let (download_speed, download_error) = finalize(&download);

        let (upload_size, upload_speed, upload_error) = if self.config.skip_upload {
            (0, 0.0, String::new())
        } else {
            let upload = self
                .run_direction(
                    entry,
                    Direction::Upload,
                    self.config.upload_attempts,
                    self.config.upload_size,
                )
                .await;
            let (speed, error) = finalize(&upload);
            (self.config.upload_size, speed, error)
        };

        let result = ProxyResult {
            proxy_name: entry.name().to_string(),
            proxy_type: entry.kind().to_string(),
            download_size: self.config.download_size,
            upload_size,
            download_speed,
            upload_speed,
            download_error,
            upload_error,
            tested_at: Utc::now(),
        };

        if result.download_error.is_empty() {
            info!(
                "Proxy {}: download {}, upload {}",
                result.proxy_name,
                format_speed(result.download_speed),
                result.format_upload_speed()
            );
        } else {
            warn!(
                "Proxy {} failed: {}",
                result.proxy_name, result.download_error
            );
        }

        result
    }

    /// Run `attempts` concurrent transfers and fold them into one summary
    async fn run_direction(
        &self,
        entry: &ProxyEntry,
        direction: Direction,
        attempts: usize,
        size: u64,
    ) -> Arc<TransferSummary> {
        let summary = Arc::new(TransferSummary::new());
        let limit = self.config.transfer_timeout;

        let handles: Vec<_> = (0..attempts)
            .map(|attempt| {
                let engine = Arc::clone(&self.engine);
                let entry = entry.clone();
                let summary = Arc::clone(&summary);
                tokio::spawn(async move {
                    let transfer = async {
                        match direction {
                            Direction::Download => engine.download(&entry, size).await,
                            Direction::Upload => engine.upload(&entry, size).await,
                        }
                    };
                    let outcome = match timeout(limit, transfer).await {
                        Ok(outcome) => outcome,
                        Err(_) => TransferOutcome::failure(format!(
                            "{} timed out after {}s",
                            direction,
                            limit.as_secs_f64()
                        )),
                    };
                    if outcome.is_success() {
                        debug!(
                            "{} attempt {} via {}: {:?}",
                            direction,
                            attempt,
                            entry.name(),
                            outcome
                        );
                    } else {
                        warn!(
                            "{} attempt {} via {} failed: {:?}",
                            direction,
                            attempt,
                            entry.name(),
                            outcome
                        );
                    }
                    summary.add(Some(&outcome));
                })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                summary.add(Some(&TransferOutcome::failure(format!(
                    "{} task failed: {}",
                    direction, e
                ))));
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::speedtest::adapter::ProxyHandle;
    use crate::speedtest::testing::{config, ScriptedEngine, StubAdapter};
    use crate::speedtest::transport::ProxyConnection;

    fn test_config() -> SpeedTestConfig {
        SpeedTestConfig {
            server_url: "http://speed.example".to_string(),
            download_size: 1000,
            upload_size: 500,
            download_attempts: 2,
            upload_attempts: 2,
            concurrency: 2,
            transfer_timeout: Duration::from_secs(5),
            skip_upload: false,
        }
    }

    fn ok(bytes: u64, millis: u64) -> TransferOutcome {
        TransferOutcome::success(bytes, Duration::from_millis(millis))
    }

    fn tester(config: SpeedTestConfig, engine: Arc<ScriptedEngine>) -> SpeedTester {
        SpeedTester::new(config, Arc::new(StubAdapter), engine)
    }

    fn find<'a>(results: &'a [ProxyResult], name: &str) -> &'a ProxyResult {
        results
            .iter()
            .find(|r| r.proxy_name == name)
            .unwrap_or_else(|| panic!("no result for {}", name))
    }

    #[test]
    fn test_finalize_with_successes() {
        let summary = TransferSummary::new();
        summary.add(Some(&ok(100, 1000)));
        summary.add(Some(&ok(50, 2000)));
        summary.add(Some(&TransferOutcome::failure("reset")));

        let (speed, error) = finalize(&summary);
        assert!((speed - 100.0).abs() < 1e-9);
        assert!(error.is_empty());
    }

    #[test]
    fn test_finalize_all_failed_reports_first_error() {
        let summary = TransferSummary::new();
        summary.add(Some(&TransferOutcome::failure("first")));
        summary.add(Some(&TransferOutcome::failure("second")));

        assert_eq!(finalize(&summary), (0.0, "first".to_string()));
    }

    #[test]
    fn test_finalize_zero_elapsed_reports_error() {
        let summary = TransferSummary::new();
        summary.add(Some(&TransferOutcome::success(100, Duration::ZERO)));

        let (speed, error) = finalize(&summary);
        assert_eq!(speed, 0.0);
        assert_eq!(error, ZERO_ELAPSED_TIME);
    }

    #[tokio::test]
    async fn test_aborted_proxy_yields_failed_result() {
        struct BrokenHandle;

        #[async_trait::async_trait]
        impl ProxyHandle for BrokenHandle {
            fn name(&self) -> &str {
                "broken"
            }

            fn kind(&self) -> &str {
                panic!("kind unavailable")
            }

            async fn connect(
                &self,
                _host: &str,
                _port: u16,
            ) -> crate::error::Result<Box<dyn ProxyConnection>> {
                Err(crate::error::SpeedTestError::ProxyConnectionFailed("broken".into()))
            }
        }

        struct BrokenAdapter;

        impl ProxyAdapter for BrokenAdapter {
            fn parse_proxy(
                &self,
                config: &ProxyConfig,
            ) -> crate::error::Result<Arc<dyn ProxyHandle>> {
                match config_str(config, "name") {
                    Some("broken") => Ok(Arc::new(BrokenHandle)),
                    _ => StubAdapter.parse_proxy(config),
                }
            }
        }

        let mut config_value = test_config();
        config_value.skip_upload = true;
        let tester = SpeedTester::new(
            config_value,
            Arc::new(BrokenAdapter),
            Arc::new(ScriptedEngine::new(ok(1000, 100))),
        );

        let results = tester
            .test_proxies(vec![
                config(json!({ "name": "broken", "type": "ss", "server": "x.com", "port": 1 })),
                config(json!({ "name": "fine", "type": "ss", "server": "y.com", "port": 1 })),
            ])
            .await;

        assert_eq!(results.len(), 2);
        let broken = find(&results, "broken");
        assert_eq!(broken.download_error, TEST_ABORTED);
        assert_eq!(broken.upload_error, TEST_ABORTED);
        assert_eq!(broken.proxy_type, "ss");
        assert!(find(&results, "fine").download_error.is_empty());
    }

    #[test]
    fn test_finalize_empty_summary() {
        let summary = TransferSummary::new();
        assert_eq!(finalize(&summary), (0.0, NO_ATTEMPTS_COMPLETED.to_string()));
    }

    #[tokio::test]
    async fn test_partial_failure_still_reports_speed() {
        let engine = Arc::new(
            ScriptedEngine::new(ok(1000, 500))
                .script_download("flaky", vec![TransferOutcome::failure("reset by peer")]),
        );
        let results = tester(test_config(), engine)
            .test_proxies(vec![config(json!({
                "name": "flaky", "type": "vless", "server": "a.com", "port": 443,
            }))])
            .await;

        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.download_error.is_empty());
        // One success of 1000 bytes in 0.5s.
        assert!((result.download_speed - 2000.0).abs() < 1e-9);
        assert_eq!(result.download_size, 1000);
        assert_eq!(result.upload_size, 500);
        assert!((result.upload_speed - 4000.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_total_failure_reports_error() {
        let engine = Arc::new(
            ScriptedEngine::new(ok(1000, 500))
                .script_download(
                    "dead",
                    vec![
                        TransferOutcome::failure("connection refused"),
                        TransferOutcome::failure("connection refused"),
                    ],
                )
                .script_upload(
                    "dead",
                    vec![
                        TransferOutcome::failure("upload failed: status 500"),
                        TransferOutcome::failure("upload failed: status 500"),
                    ],
                ),
        );
        let results = tester(test_config(), engine)
            .test_proxies(vec![config(json!({
                "name": "dead", "type": "vmess", "server": "d.com", "port": 443,
            }))])
            .await;

        let result = &results[0];
        assert_eq!(result.download_error, "connection refused");
        assert_eq!(result.download_speed, 0.0);
        assert_eq!(result.format_download_speed(), "connection refused");
        assert_eq!(result.upload_error, "upload failed: status 500");
        assert_eq!(result.proxy_type, "vmess");
    }

    #[tokio::test]
    async fn test_parse_failures_and_duplicates_are_skipped() {
        let engine = Arc::new(ScriptedEngine::new(ok(1000, 100)));
        let results = tester(test_config(), engine.clone())
            .test_proxies(vec![
                config(json!({ "name": "a", "type": "vless", "server": "a.com", "port": 443 })),
                config(json!({ "type": "vless", "server": "nameless.com", "port": 443 })),
                config(json!({ "name": "a-copy", "type": "vless", "server": "a.com", "port": 443.0, "uuid": "other" })),
                config(json!({ "name": "b", "type": "trojan", "server": "b.com", "port": 443 })),
            ])
            .await;

        let mut names: Vec<&str> = results.iter().map(|r| r.proxy_name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        // 2 proxies x (2 downloads + 2 uploads)
        assert_eq!(engine.calls().len(), 8);
        assert!(engine.calls().iter().all(|(name, _, _)| name != "a-copy"));
    }

    #[tokio::test]
    async fn test_skip_upload() {
        let mut config_value = test_config();
        config_value.skip_upload = true;
        let engine = Arc::new(ScriptedEngine::new(ok(1000, 100)));

        let results = tester(config_value, engine.clone())
            .test_proxies(vec![config(json!({
                "name": "a", "type": "vless", "server": "a.com", "port": 443,
            }))])
            .await;

        assert_eq!(results[0].upload_size, 0);
        assert!(results[0].upload_error.is_empty());
        assert!(engine.calls().iter().all(|(_, direction, _)| *direction == "download"));
        assert_eq!(engine.calls()[0].2, 1000);
    }

    #[tokio::test]
    async fn test_attempt_timeout_becomes_failure() {
        let mut config_value = test_config();
        config_value.transfer_timeout = Duration::from_millis(20);
        config_value.skip_upload = true;
        let engine =
            Arc::new(ScriptedEngine::new(ok(1000, 100)).with_delay(Duration::from_secs(5)));

        let results = tester(config_value, engine)
            .test_proxies(vec![config(json!({
                "name": "slow", "type": "vless", "server": "s.com", "port": 443,
            }))])
            .await;

        assert_eq!(results[0].download_error, "download timed out after 0.02s");
        assert_eq!(results[0].download_speed, 0.0);
    }

    #[tokio::test]
    async fn test_every_proxy_yields_one_result() {
        let engine = Arc::new(ScriptedEngine::new(ok(10, 10)));
        let configs = (0..10)
            .map(|i| {
                config(json!({
                    "name": format!("p{}", i), "type": "socks5", "server": "h", "port": 1000 + i,
                }))
            })
            .collect();

        let results = tester(test_config(), engine).test_proxies(configs).await;
        assert_eq!(results.len(), 10);
        assert!(results
            .iter()
            .all(|r| r.download_error.is_empty() && r.download_speed > 0.0));
        assert_eq!(find(&results, "p3").download_size, 1000);
    }

    #[tokio::test]
    async fn test_single_proxy_result_fields() {
        let engine = Arc::new(ScriptedEngine::new(ok(1000, 250)));
        let tester = tester(test_config(), engine);
        let entry = crate::speedtest::testing::entry(json!({
            "name": "solo", "type": "trojan", "server": "t.com", "port": 443,
        }));

        let result = tester.test_proxy(&entry).await;
        assert_eq!(result.proxy_name, "solo");
        assert_eq!(result.proxy_type, "trojan");
        assert!((result.download_speed - 4000.0).abs() < 1e-9);
        assert_eq!(result.format_download_error(), "N/A");
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Download.to_string(), "download");
        assert_eq!(Direction::Upload.as_str(), "upload");
    }
}
