//! Failure-counting guard for a chronically failing upstream
//!
//! There is no half-open state: once the cooldown since the last
//! failure has elapsed the next call simply goes through, and its outcome
//! updates the counter as usual. A failed trial call therefore reopens the circuit
//! for a full cooldown straight away.

use crate::{config::CircuitBreakerConfig, error::FetchError};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Observable breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through
    Closed,
    /// Calls are rejected until the cooldown elapses
    Open,
}

#[derive(Debug)]
struct BreakerState {
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
}

/// Circuit breaker guarding one upstream
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                consecutive_failures: 0,
                last_failure_at: None,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self::new(name, config.failure_threshold, config.cooldown())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_open_locked(&self, state: &BreakerState) -> bool {
        state.consecutive_failures >= self.threshold
            && state
                .last_failure_at
                .is_some_and(|at| at.elapsed() < self.cooldown)
    }

    /// Fails fast with [`FetchError::CircuitOpen`] while the circuit is open
    pub fn check(&self) -> Result<(), FetchError> {
        if self.is_open() {
            Err(FetchError::circuit_open(&self.name))
        } else {
            Ok(())
        }
    }

    pub fn is_open(&self) -> bool {
        let state = self.lock();
        self.is_open_locked(&state)
    }

    pub fn state(&self) -> CircuitState {
        if self.is_open() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    /// Any success closes the circuit immediately
    pub fn record_success(&self) {
        let mut state = self.lock();
        if state.consecutive_failures > 0 {
            tracing::info!(
                upstream = %self.name,
                previous_failures = state.consecutive_failures,
                "Upstream recovered, resetting circuit breaker"
            );
        }
        state.consecutive_failures = 0;
    }

    pub fn record_failure(&self) {
        let mut state = self.lock();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        state.last_failure_at = Some(Instant::now());

        if state.consecutive_failures == self.threshold {
            tracing::warn!(
                upstream = %self.name,
                failures = state.consecutive_failures,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit opened"
            );
        } else if state.consecutive_failures > self.threshold {
            tracing::warn!(
                upstream = %self.name,
                failures = state.consecutive_failures,
                "Call after cooldown failed, circuit reopened"
            );
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    /// Forgets all recorded failures
    pub fn reset(&self) {
        let mut state = self.lock();
        state.consecutive_failures = 0;
        state.last_failure_at = None;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
