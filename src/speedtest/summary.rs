//! Aggregation of transfer attempts
//!
//! Every attempt against a proxy yields a [`TransferOutcome`]; all outcomes for
//! one proxy and direction are folded into a shared [`TransferSummary`].

use std::time::Duration;

use indexmap::IndexSet;
use parking_lot::Mutex;

/// Outcome of a single download or upload attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Success {
        bytes_transferred: u64,
        elapsed: Duration,
    },
    Failure {
        message: String,
    },
}

impl TransferOutcome {
    pub fn success(bytes_transferred: u64, elapsed: Duration) -> Self {
        TransferOutcome::Success {
            bytes_transferred,
            elapsed,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        TransferOutcome::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TransferOutcome::Success { .. })
    }
}

#[derive(Debug, Default)]
struct SummaryState {
    success_count: u64,
    total_bytes: u64,
    total_duration: Duration,
    // First-seen order, exact-match dedup
    errors: IndexSet<String>,
}

/// Consistent copy of a summary's fields
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummarySnapshot {
    pub success_count: u64,
    pub total_bytes: u64,
    pub total_duration: Duration,
    pub errors: Vec<String>,
}

impl SummarySnapshot {
    /// Mean elapsed time of successful attempts, zero when there were none
    pub fn average_duration(&self) -> Duration {
        average(self.total_duration, self.success_count)
    }
}

/// Concurrency-safe accumulator for one proxy/direction pair
///
/// Mutated only through [`TransferSummary::add`]; all fields are updated under
/// a single lock so readers never observe a half-applied outcome.
#[derive(Debug, Default)]
pub struct TransferSummary {
    state: Mutex<SummaryState>,
}

impl TransferSummary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one outcome in. `None` is ignored.
    pub fn add(&self, outcome: Option<&TransferOutcome>) {
        let Some(outcome) = outcome else {
            return;
        };

        let mut state = self.state.lock();
        match outcome {
            TransferOutcome::Success {
                bytes_transferred,
                elapsed,
            } => {
                state.success_count += 1;
                state.total_bytes = state.total_bytes.saturating_add(*bytes_transferred);
                state.total_duration = state.total_duration.saturating_add(*elapsed);
            }
            TransferOutcome::Failure { message } => {
                if !state.errors.contains(message.as_str()) {
                    state.errors.insert(message.clone());
                }
            }
        }
    }

    /// Mean elapsed time of successful attempts, zero when there were none
    pub fn average_duration(&self) -> Duration {
        let state = self.state.lock();
        average(state.total_duration, state.success_count)
    }

    pub fn success_count(&self) -> u64 {
        self.state.lock().success_count
    }

    pub fn total_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    pub fn total_duration(&self) -> Duration {
        self.state.lock().total_duration
    }

    /// Distinct failure messages in first-seen order
    pub fn errors(&self) -> Vec<String> {
        self.state.lock().errors.iter().cloned().collect()
    }

    pub fn first_error(&self) -> Option<String> {
        self.state.lock().errors.first().cloned()
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        let state = self.state.lock();
        SummarySnapshot {
            success_count: state.success_count,
            total_bytes: state.total_bytes,
            total_duration: state.total_duration,
            errors: state.errors.iter().cloned().collect(),
        }
    }
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
