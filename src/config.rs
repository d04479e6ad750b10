//! Runtime configuration for the ingestion layer
//!
//! Defaults come from [`crate::constants`]. [`IngestConfig::from_env`] layers
//! `MARKET_DATA_*` environment overrides on top of them.

use crate::{
    constants::{
        BATCH_CONCURRENCY, CACHE_CAPACITY, CIRCUIT_COOLDOWN_MS, CIRCUIT_FAILURE_THRESHOLD,
        DISCOVERY_TTL_SECS, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_RETRY_ATTEMPTS,
        METADATA_TTL_SECS, ORDER_BOOK_TTL_SECS, PRICE_TTL_SECS, RATE_LIMIT_CAPACITY,
        RATE_LIMIT_REFILL_PER_SEC, REFRESH_INTERVAL_MS, REQUEST_TIMEOUT_MS,
        STREAM_BUFFER_SIZE, STREAM_IDLE_TIMEOUT_MS, STREAM_RECONNECT_DELAY_MS,
    },
    error::ConfigError,
    types::ResourceKind,
};
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;

/// Per-upstream client settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Deadline for one outbound call
    pub request_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: REQUEST_TIMEOUT_MS,
        }
    }
}

impl ClientConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Token bucket settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: RATE_LIMIT_CAPACITY,
            refill_per_sec: RATE_LIMIT_REFILL_PER_SEC,
        }
    }
}

/// Circuit breaker settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: CIRCUIT_FAILURE_THRESHOLD,
            cooldown_ms: CIRCUIT_COOLDOWN_MS,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

/// Background refresh settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    pub interval_ms: u64,
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            interval_ms: REFRESH_INTERVAL_MS,
            max_retries: MAX_RETRY_ATTEMPTS,
            initial_backoff_ms: INITIAL_BACKOFF_MS,
            max_backoff_ms: MAX_BACKOFF_MS,
        }
    }
}

impl RefreshConfig {
    /// Delay before the extra retry that follows the `attempt`-th consecutive failure
    ///
    /// `min(initial * 2^attempt, max)`, so with defaults: 2s, 4s, 8s, ... capped at 30s.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let delay_ms = self
            .initial_backoff_ms
            .saturating_mul(factor)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Per-resource-kind cache TTLs
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResourceTtls {
    pub price_secs: u64,
    pub metadata_secs: u64,
    pub discovery_secs: u64,
    pub order_book_secs: u64,
}

impl Default for ResourceTtls {
    fn default() -> Self {
        Self {
            price_secs: PRICE_TTL_SECS,
            metadata_secs: METADATA_TTL_SECS,
            discovery_secs: DISCOVERY_TTL_SECS,
            order_book_secs: ORDER_BOOK_TTL_SECS,
        }
    }
}

impl ResourceTtls {
    pub fn ttl_for(&self, kind: ResourceKind) -> Duration {
        let secs = match kind {
            ResourceKind::Price => self.price_secs,
            ResourceKind::Metadata => self.metadata_secs,
            ResourceKind::Discovery => self.discovery_secs,
            ResourceKind::OrderBook => self.order_book_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Batch orchestration settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub concurrency: usize,
    pub ttls: ResourceTtls,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            concurrency: BATCH_CONCURRENCY,
            ttls: ResourceTtls::default(),
        }
    }
}

/// Shared cache settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: CACHE_CAPACITY,
        }
    }
}

/// Push feed settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub buffer_size: usize,
    pub reconnect_delay_ms: u64,
    /// Deadline for opening a connection, subscription included
    pub connect_timeout_ms: u64,
    /// A connection silent for this long is dropped and reopened
    pub idle_timeout_ms: u64,
    /// Keep only messages whose `match_field` equals `match_value`
    pub match_field: Option<String>,
    pub match_value: Option<serde_json::Value>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: STREAM_BUFFER_SIZE,
            reconnect_delay_ms: STREAM_RECONNECT_DELAY_MS,
            connect_timeout_ms: REQUEST_TIMEOUT_MS,
            idle_timeout_ms: STREAM_IDLE_TIMEOUT_MS,
            match_field: None,
            match_value: None,
        }
    }
}

impl StreamConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

/// Full configuration of an [`crate::ingest::IngestionLayer`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub client: ClientConfig,
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub refresh: RefreshConfig,
    pub batch: BatchConfig,
    pub cache: CacheConfig,
    pub stream: StreamConfig,
}

impl IngestConfig {
    /// Builds the defaults and applies environment overrides
    ///
    /// Recognised variables:
    /// - `MARKET_DATA_REQUEST_TIMEOUT_MS`
    /// - `MARKET_DATA_RATE_LIMIT_CAPACITY`, `MARKET_DATA_RATE_LIMIT_REFILL_PER_SEC`
    /// - `MARKET_DATA_CIRCUIT_THRESHOLD`, `MARKET_DATA_CIRCUIT_COOLDOWN_MS`
    /// - `MARKET_DATA_REFRESH_INTERVAL_MS`, `MARKET_DATA_MAX_RETRIES`
    /// - `MARKET_DATA_BATCH_CONCURRENCY`, `MARKET_DATA_CACHE_CAPACITY`
    /// - `MARKET_DATA_PRICE_TTL_SECS`, `MARKET_DATA_METADATA_TTL_SECS`,
    ///   `MARKET_DATA_DISCOVERY_TTL_SECS`, `MARKET_DATA_ORDER_BOOK_TTL_SECS`
    /// - `MARKET_DATA_STREAM_BUFFER_SIZE`, `MARKET_DATA_STREAM_RECONNECT_MS`,
    ///   `MARKET_DATA_STREAM_CONNECT_TIMEOUT_MS`, `MARKET_DATA_STREAM_IDLE_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`IngestConfig::from_env`] with an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_with(
            &lookup,
            "MARKET_DATA_REQUEST_TIMEOUT_MS",
            &mut config.client.request_timeout_ms,
        )?;
        override_with(&lookup, "MARKET_DATA_RATE_LIMIT_CAPACITY", &mut config.rate_limit.capacity)?;
        override_with(
            &lookup,
            "MARKET_DATA_RATE_LIMIT_REFILL_PER_SEC",
            &mut config.rate_limit.refill_per_sec,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_CIRCUIT_THRESHOLD",
            &mut config.circuit_breaker.failure_threshold,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_CIRCUIT_COOLDOWN_MS",
            &mut config.circuit_breaker.cooldown_ms,
        )?;
        override_with(&lookup, "MARKET_DATA_REFRESH_INTERVAL_MS", &mut config.refresh.interval_ms)?;
        override_with(&lookup, "MARKET_DATA_MAX_RETRIES", &mut config.refresh.max_retries)?;
        override_with(&lookup, "MARKET_DATA_BATCH_CONCURRENCY", &mut config.batch.concurrency)?;
        override_with(&lookup, "MARKET_DATA_CACHE_CAPACITY", &mut config.cache.capacity)?;
        override_with(&lookup, "MARKET_DATA_PRICE_TTL_SECS", &mut config.batch.ttls.price_secs)?;
        override_with(
            &lookup,
            "MARKET_DATA_METADATA_TTL_SECS",
            &mut config.batch.ttls.metadata_secs,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_DISCOVERY_TTL_SECS",
            &mut config.batch.ttls.discovery_secs,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_ORDER_BOOK_TTL_SECS",
            &mut config.batch.ttls.order_book_secs,
        )?;
        override_with(&lookup, "MARKET_DATA_STREAM_BUFFER_SIZE", &mut config.stream.buffer_size)?;
        override_with(
            &lookup,
            "MARKET_DATA_STREAM_RECONNECT_MS",
            &mut config.stream.reconnect_delay_ms,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_STREAM_CONNECT_TIMEOUT_MS",
            &mut config.stream.connect_timeout_ms,
        )?;
        override_with(
            &lookup,
            "MARKET_DATA_STREAM_IDLE_TIMEOUT_MS",
            &mut config.stream.idle_timeout_ms,
        )?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the invariants the components rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client.request_timeout_ms == 0 {
            return Err(ConfigError::invalid("request timeout must be positive"));
        }
        if self.rate_limit.capacity.is_nan() || self.rate_limit.capacity < 1.0 {
            return Err(ConfigError::invalid("rate limit capacity must be at least 1"));
        }
        if self.rate_limit.refill_per_sec.is_nan() || self.rate_limit.refill_per_sec <= 0.0 {
            return Err(ConfigError::invalid("rate limit refill rate must be positive"));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(ConfigError::invalid("circuit breaker threshold must be positive"));
        }
        if self.refresh.interval_ms == 0 {
            return Err(ConfigError::invalid("refresh interval must be positive"));
        }
        if self.batch.concurrency == 0 {
            return Err(ConfigError::invalid("batch concurrency must be positive"));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::invalid("cache capacity must be positive"));
        }
        if self.stream.buffer_size == 0 {
            return Err(ConfigError::invalid("stream buffer size must be positive"));
        }
        if self.stream.connect_timeout_ms == 0 || self.stream.idle_timeout_ms == 0 {
            return Err(ConfigError::invalid("stream timeouts must be positive"));
        }
        Ok(())
    }
}

fn override_with<F, T>(lookup: &F, var: &str, target: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(var) {
        *target = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            var: var.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = IngestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch.concurrency, 8);
        assert_eq!(config.stream.buffer_size, 200);
        assert_eq!(config.client.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_overrides() {
        let config = IngestConfig::from_lookup(lookup_from(&[
            ("MARKET_DATA_BATCH_CONCURRENCY", "4"),
            ("MARKET_DATA_PRICE_TTL_SECS", " 30 "),
            ("MARKET_DATA_RATE_LIMIT_REFILL_PER_SEC", "2.5"),
        ]))
        .unwrap();

        assert_eq!(config.batch.concurrency, 4);
        assert_eq!(config.batch.ttls.ttl_for(ResourceKind::Price), Duration::from_secs(30));
        assert_eq!(config.rate_limit.refill_per_sec, 2.5);
    }

    #[test]
    fn test_env_rejects_garbage_and_zero() {
        let err = IngestConfig::from_lookup(lookup_from(&[("MARKET_DATA_CACHE_CAPACITY", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let err = IngestConfig::from_lookup(lookup_from(&[("MARKET_DATA_BATCH_CONCURRENCY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_default_ttls_per_kind() {
        let ttls = ResourceTtls::default();
        assert_eq!(ttls.ttl_for(ResourceKind::Price), Duration::from_secs(15));
        assert_eq!(ttls.ttl_for(ResourceKind::Metadata), Duration::from_secs(60));
        assert_eq!(ttls.ttl_for(ResourceKind::Discovery), Duration::from_secs(60));
        for kind in ResourceKind::all() {
            assert!(ttls.ttl_for(ResourceKind::OrderBook) <= ttls.ttl_for(*kind), "{}", kind);
        }
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let refresh = RefreshConfig::default();
        assert_eq!(refresh.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(refresh.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(refresh.backoff_delay(3), Duration::from_secs(8));
        assert_eq!(refresh.backoff_delay(10), Duration::from_secs(30));
        assert_eq!(refresh.backoff_delay(200), Duration::from_secs(30));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: IngestConfig =
            serde_json::from_str(r#"{"stream": {"buffer_size": 50}}"#).unwrap();
        assert_eq!(config.stream.buffer_size, 50);
        assert_eq!(config.stream.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.cache.capacity, 256);
    }
}
