//! Per-upstream fetch facade
//!
//! Composes a [`RateLimiter`] and a [`CircuitBreaker`] around one
//! [`MarketDataProvider`] so that every outbound call is budgeted, bounded by
//! a deadline and counted against the upstream's health. The client does not
//! cache; see [`crate::batch::BatchOrchestrator`] for the cache-first path.

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitState},
    config::ClientConfig,
    error::{FetchError, ProviderError},
    metrics::{CallOutcome, MetricsCollector, ProviderMetrics},
    provider::MarketDataProvider,
    rate_limiter::RateLimiter,
    types::{MarketData, ResourceId},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Fetch facade for a single upstream
pub struct Client {
    provider: Arc<dyn MarketDataProvider>,
    limiter: Arc<RateLimiter>,
    breaker: Arc<CircuitBreaker>,
    metrics: MetricsCollector,
    request_timeout: Duration,
}

impl Client {
    /// Creates a client around shared limiter and breaker instances
    pub fn new(
        provider: Arc<dyn MarketDataProvider>,
        limiter: Arc<RateLimiter>,
        breaker: Arc<CircuitBreaker>,
        config: &ClientConfig,
    ) -> Self {
        let metrics = MetricsCollector::new(provider.provider_name());
        Self {
            provider,
            limiter,
            breaker,
            metrics,
            request_timeout: config.request_timeout(),
        }
    }

    /// Fetches one resource
    ///
    /// 1. Fails fast with [`FetchError::CircuitOpen`] while the breaker is open
    /// 2. Waits for a rate limit token
    /// 3. Calls the upstream under the request deadline
    /// 4. Validates the payload and records the outcome on the breaker
    ///
    /// Every attempted call consumes exactly one token and updates the
    /// breaker exactly once, timeouts included.
    pub async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, FetchError> {
        let upstream = self.provider.provider_name();

        if let Err(e) = self.breaker.check() {
            self.metrics.record(Duration::ZERO, CallOutcome::Rejected);
            tracing::debug!(upstream, resource = %resource, "Circuit open, skipping fetch");
            return Err(e);
        }

        self.limiter.acquire().await;

        let start = Instant::now();
        let call = tokio::time::timeout(self.request_timeout, self.provider.fetch(resource));
        let result = match call.await {
            Ok(Ok(data)) => validate(resource, data),
            Ok(Err(e)) => Err(FetchError::from(e)),
            Err(_) => Err(FetchError::from(ProviderError::Timeout)),
        };
        let elapsed = start.elapsed();

        match &result {
            Ok(_) => {
                self.breaker.record_success();
                self.metrics.record(elapsed, CallOutcome::Success);
                tracing::debug!(
                    upstream,
                    resource = %resource,
                    latency_ms = elapsed.as_millis() as u64,
                    "Fetched resource"
                );
            }
            Err(e) => {
                self.breaker.record_failure();
                let outcome = if *e == FetchError::Timeout {
                    CallOutcome::Timeout
                } else {
                    CallOutcome::Failure
                };
                self.metrics.record(elapsed, outcome);
                tracing::warn!(
                    upstream,
                    resource = %resource,
                    error = %e,
                    consecutive_failures = self.breaker.consecutive_failures(),
                    "Fetch failed"
                );
            }
        }

        result
    }

    /// Returns the name of the upstream
    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Gets request metrics including latency percentiles and success rate
    pub fn metrics(&self) -> ProviderMetrics {
        self.metrics.snapshot()
    }
}

/// Rejects payloads that cannot describe the requested resource
fn validate(resource: &ResourceId, data: MarketData) -> Result<MarketData, FetchError> {
    if data.payload.is_null() {
        return Err(FetchError::upstream(format!("empty payload for {}", resource)));
    }
    if data.resource != *resource {
        return Err(FetchError::upstream(format!(
            "upstream answered {} for {}",
            data.resource, resource
        )));
    }
    Ok(data)
}
