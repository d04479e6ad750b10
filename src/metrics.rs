//! Per-upstream request metrics
//!
//! Tracks a rolling latency window plus lifetime outcome counters for every
//! call a [`crate::client::Client`] makes.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Maximum number of samples to keep for percentile calculation
const MAX_SAMPLES: usize = 100;

/// Outcome of one client call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    Failure,
    Timeout,
    /// Rejected by the circuit breaker without reaching the upstream
    Rejected,
}

/// Snapshot of one upstream's metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderMetrics {
    /// Name of the provider
    pub provider_name: String,
    /// 50th percentile latency of successful calls in milliseconds
    pub latency_p50_ms: f64,
    /// 99th percentile latency of successful calls in milliseconds
    pub latency_p99_ms: f64,
    /// Share of attempted calls that succeeded (0.0 to 1.0)
    pub success_rate: f64,
    /// Calls that reached the upstream
    pub total_requests: u64,
    /// Attempted calls that failed, timeouts included
    pub failed_requests: u64,
    /// Attempted calls that hit the deadline
    pub timeouts: u64,
    /// Calls short-circuited by an open breaker
    pub circuit_rejections: u64,
}

impl ProviderMetrics {
    /// Creates metrics with no data
    pub fn empty(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            latency_p50_ms: 0.0,
            latency_p99_ms: 0.0,
            success_rate: 1.0,
            total_requests: 0,
            failed_requests: 0,
            timeouts: 0,
            circuit_rejections: 0,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    /// Latencies of successful calls, oldest first
    latencies_ms: VecDeque<f64>,
    total: u64,
    failed: u64,
    timeouts: u64,
    rejected: u64,
}

/// Collects call outcomes for one upstream
#[derive(Debug)]
pub struct MetricsCollector {
    provider_name: String,
    counters: Mutex<Counters>,
}

impl MetricsCollector {
    pub fn new(provider_name: &str) -> Self {
        Self {
            provider_name: provider_name.to_string(),
            counters: Mutex::new(Counters {
                latencies_ms: VecDeque::with_capacity(MAX_SAMPLES),
                ..Counters::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record(&self, duration: Duration, outcome: CallOutcome) {
        let mut counters = self.lock();
        match outcome {
            CallOutcome::Rejected => {
                counters.rejected += 1;
                return;
            }
            CallOutcome::Success => {
                if counters.latencies_ms.len() >= MAX_SAMPLES {
                    counters.latencies_ms.pop_front();
                }
                counters.latencies_ms.push_back(duration.as_secs_f64() * 1000.0);
            }
            CallOutcome::Failure => counters.failed += 1,
            CallOutcome::Timeout => {
                counters.failed += 1;
                counters.timeouts += 1;
            }
        }
        counters.total += 1;
    }

    pub fn snapshot(&self) -> ProviderMetrics {
        let counters = self.lock();
        if counters.total == 0 && counters.rejected == 0 {
            return ProviderMetrics::empty(&self.provider_name);
        }

        let mut sorted: Vec<f64> = counters.latencies_ms.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));

        let success_rate = if counters.total > 0 {
            (counters.total - counters.failed) as f64 / counters.total as f64
        } else {
            1.0
        };

        ProviderMetrics {
            provider_name: self.provider_name.clone(),
            latency_p50_ms: percentile(&sorted, 50.0),
            latency_p99_ms: percentile(&sorted, 99.0),
            success_rate,
            total_requests: counters.total,
            failed_requests: counters.failed,
            timeouts: counters.timeouts,
            circuit_rejections: counters.rejected,
        }
    }
}

/// Nearest-rank percentile over already sorted values
fn percentile(sorted_values: &[f64], p: f64) -> f64 {
    if sorted_values.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_values.len() - 1) as f64).round() as usize;
    sorted_values[idx.min(sorted_values.len() - 1)]
}
