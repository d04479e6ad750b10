//! Error types for the market data ingestion layer

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during a single call to an upstream provider
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Network request failed
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// Invalid response from provider
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded (HTTP 429)
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Resource kind not served by this provider
    #[error("Resource not supported: {0}")]
    UnsupportedResource(String),

    /// Provider API error
    #[error("Provider API error: {0}")]
    ApiError(String),

    /// Timeout waiting for response
    #[error("Request timeout")]
    Timeout,
}

/// Errors surfaced by the ingestion layer to its callers
///
/// Every variant is locally recoverable: the refresher retries, the batch
/// orchestrator downgrades the identifier to a failed result and the stream
/// aggregator reconnects.
#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FetchError {
    /// Upstream did not respond within the deadline
    #[error("Upstream did not respond within the deadline")]
    Timeout,

    /// Non-success status or malformed body
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Circuit breaker rejected the call before it was attempted
    #[error("Circuit open for upstream {upstream}")]
    CircuitOpen { upstream: String },

    /// Caller gave up while waiting for a rate limit token
    #[error("Gave up waiting for a rate limit token after {waited:?}")]
    RateLimitWaitAborted { waited: Duration },
}

impl FetchError {
    /// Creates an Upstream error
    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream(msg.into())
    }

    /// Creates a CircuitOpen error
    pub fn circuit_open(upstream: &str) -> Self {
        Self::CircuitOpen {
            upstream: upstream.to_string(),
        }
    }

    /// True when the call never reached the upstream
    pub fn is_short_circuit(&self) -> bool {
        matches!(
            self,
            FetchError::CircuitOpen { .. } | FetchError::RateLimitWaitAborted { .. }
        )
    }
}

impl From<ProviderError> for FetchError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Timeout => FetchError::Timeout,
            ProviderError::NetworkError(e) if e.is_timeout() => FetchError::Timeout,
            other => FetchError::Upstream(other.to_string()),
        }
    }
}

/// Errors raised while building configuration
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable could not be parsed
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },

    /// Value parsed but violates an invariant
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Creates an Invalid error
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_mapping() {
        assert_eq!(FetchError::from(ProviderError::Timeout), FetchError::Timeout);
        assert_eq!(
            FetchError::from(ProviderError::RateLimitExceeded),
            FetchError::Upstream("Rate limit exceeded".to_string())
        );
        assert!(matches!(
            FetchError::from(ProviderError::InvalidResponse("bad".to_string())),
            FetchError::Upstream(msg) if msg.contains("bad")
        ));
    }

    #[test]
    fn test_short_circuit_classification() {
        assert!(FetchError::circuit_open("coingecko").is_short_circuit());
        assert!(!FetchError::Timeout.is_short_circuit());
        assert!(!FetchError::upstream("HTTP 500").is_short_circuit());
    }
}
