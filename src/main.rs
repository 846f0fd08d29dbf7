//! Speedtester - Entry Point
//!
//! Reads a proxy list, runs the speed test, and prints a JSON report.

use std::sync::Arc;

use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use speedtester::config::{Config, LogConfig};
use speedtester::error::Result;
use speedtester::models::{filter_results, parse_proxy_list, rank_results, ProxyResult};
use speedtester::speedtest::{tls, HttpTransferEngine, SpeedTester, StandardAdapter};

#[derive(Serialize)]
struct Report {
    server: String,
    sort: &'static str,
    tested: usize,
    results: Vec<ProxyResult>,
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(2);
        }
    };
    init_tracing(&config.log);

    if let Err(e) = run(config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    info!("Starting speedtester against {}", config.speedtest.server_url);

    let path = config.require_proxy_file()?;
    let raw = tokio::fs::read_to_string(path).await?;
    let configs = parse_proxy_list(&raw)?;
    info!("Loaded {} proxy configurations from {}", configs.len(), path);

    let connector = tls::connector()?;
    let engine = HttpTransferEngine::new(&config.speedtest.server_url, connector.clone())?;
    let tester = SpeedTester::new(
        config.speedtest.clone(),
        Arc::new(StandardAdapter::new(connector)),
        Arc::new(engine),
    );

    let results = tokio::select! {
        results = tester.test_proxies(configs) => results,
        _ = shutdown_signal() => {
            warn!("Shutdown signal received, aborting speed test");
            return Ok(());
        }
    };

    let tested = results.len();
    let ranked = rank_results(results, config.report.sort);
    let results = filter_results(
        ranked,
        config.report.min_download_speed,
        config.report.min_upload_speed,
    );

    for result in &results {
        info!(
            "{} [{}] download={} upload={}",
            result.proxy_name,
            result.proxy_type,
            result.format_download_speed(),
            result.format_upload_speed()
        );
    }
    if results.len() < tested {
        info!(
            "{} of {} proxies below the speed thresholds",
            tested - results.len(),
            tested
        );
    }

    let report = Report {
        server: config.speedtest.server_url.clone(),
        sort: config.report.sort.as_str(),
        tested,
        results,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

fn init_tracing(log: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("speedtester={}", log.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if log.format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
