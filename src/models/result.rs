use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker rendered when a direction carries no error
pub const NOT_AVAILABLE: &str = "N/A";

/// Finished speed-test record for one proxy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyResult {
    pub proxy_name: String,
    pub proxy_type: String,
    /// Bytes requested per download attempt
    pub download_size: u64,
    /// Bytes sent per upload attempt
    pub upload_size: u64,
    /// Download throughput in bytes per second
    pub download_speed: f64,
    /// Upload throughput in bytes per second
    pub upload_speed: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub download_error: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub upload_error: String,
    pub tested_at: DateTime<Utc>,
}

impl ProxyResult {
    /// Result for a proxy that could not be tested at all
    pub fn failed(
        name: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let message = message.into();
        Self {
            proxy_name: name.into(),
            proxy_type: kind.into(),
            download_error: message.clone(),
            upload_error: message,
            tested_at: Utc::now(),
            ..Self::default()
        }
    }

    pub fn format_download_error(&self) -> String {
        format_error(&self.download_error)
    }

    pub fn format_upload_error(&self) -> String {
        format_error(&self.upload_error)
    }

    /// Download speed for human output; an error replaces the number
    pub fn format_download_speed(&self) -> String {
        if !self.download_error.is_empty() {
            return self.download_error.clone();
        }
        format_speed(self.download_speed)
    }

    /// Upload speed for human output; an error replaces the number
    pub fn format_upload_speed(&self) -> String {
        if !self.upload_error.is_empty() {
            return self.upload_error.clone();
        }
        format_speed(self.upload_speed)
    }

    /// Download speed rendered regardless of the error state
    pub fn format_download_speed_value(&self) -> String {
        format_speed(self.download_speed)
    }

    /// Upload speed rendered regardless of the error state
    pub fn format_upload_speed_value(&self) -> String {
        format_speed(self.upload_speed)
    }

    /// Download speed used for ranking and filtering (0 when errored)
    pub fn effective_download_speed(&self) -> f64 {
        if self.download_error.is_empty() {
            self.download_speed
        } else {
            0.0
        }
    }

    /// Upload speed used for ranking and filtering (0 when errored)
    pub fn effective_upload_speed(&self) -> f64 {
        if self.upload_error.is_empty() {
            self.upload_speed
        } else {
            0.0
        }
    }
}

fn format_error(error: &str) -> String {
    if error.is_empty() {
        NOT_AVAILABLE.to_string()
    } else {
        error.to_string()
    }
}

/// Render a bytes-per-second value with binary units
pub fn format_speed(bytes_per_sec: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KB/s", "MB/s", "GB/s"];

    let mut value = if bytes_per_sec.is_finite() && bytes_per_sec > 0.0 {
        bytes_per_sec
    } else {
        0.0
    };
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2}{}", value, UNITS[unit])
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSort {
    #[default]
    Download,
    Upload,
    Name,
}

impl ResultSort {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "download" | "d" => Some(Self::Download),
            "upload" | "u" => Some(Self::Upload),
            "name" | "n" => Some(Self::Name),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Download => "download",
            Self::Upload => "upload",
            Self::Name => "name",
        }
    }
}

/// Order results: speeds descending, ties broken by name
pub fn rank_results(mut results: Vec<ProxyResult>, sort: ResultSort) -> Vec<ProxyResult> {
    let by_name = |a: &ProxyResult, b: &ProxyResult| a.proxy_name.cmp(&b.proxy_name);

    match sort {
        ResultSort::Download => results.sort_by(|a, b| {
            b.effective_download_speed()
                .partial_cmp(&a.effective_download_speed())
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_name(a, b))
        }),
        ResultSort::Upload => results.sort_by(|a, b| {
            b.effective_upload_speed()
                .partial_cmp(&a.effective_upload_speed())
                .unwrap_or(Ordering::Equal)
                .then_with(|| by_name(a, b))
        }),
        ResultSort::Name => results.sort_by(by_name),
    }

    results
}

/// Drop results below the given bytes-per-second thresholds
pub fn filter_results(
    results: Vec<ProxyResult>,
    min_download_speed: f64,
    min_upload_speed: f64,
) -> Vec<ProxyResult> {
    results
        .into_iter()
        .filter(|r| {
            r.effective_download_speed() >= min_download_speed
                && r.effective_upload_speed() >= min_upload_speed
        })
        .collect()
}
