//! Failover market data provider implementation

use crate::{
    error::ProviderError,
    provider::MarketDataProvider,
    types::{MarketData, ResourceId},
};
use async_trait::async_trait;
use std::sync::Arc;

/// Provider that tries multiple providers in order until one succeeds
///
/// Wrapped by a single [`crate::client::Client`], the whole chain shares one
/// rate limiter and circuit breaker, and counts as one call.
pub struct FailoverProvider {
    providers: Vec<Arc<dyn MarketDataProvider>>,
}

impl FailoverProvider {
    /// Creates a new failover provider with a list of providers
    ///
    /// The providers are tried in the order they are provided.
    pub fn new(providers: Vec<Arc<dyn MarketDataProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl MarketDataProvider for FailoverProvider {
    async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, ProviderError> {
        let mut last_error = None;

        for provider in &self.providers {
            match provider.fetch(resource).await {
                Ok(data) => return Ok(data),
                Err(e) => {
                    tracing::warn!(
                        provider = provider.provider_name(),
                        resource = %resource,
                        error = %e,
                        "Provider failed, trying next"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::InvalidResponse("No providers configured for failover".to_string())
        }))
    }

    fn provider_name(&self) -> &'static str {
        "failover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use serde_json::json;

    #[tokio::test]
    async fn test_falls_through_to_backup() {
        let primary = Arc::new(MockProvider::new());
        let backup = Arc::new(MockProvider::new());
        let resource = ResourceId::price("SOL");
        primary.set_error(resource.clone(), "HTTP 502");
        backup.set_payload(resource.clone(), json!(142.0));

        let failover = FailoverProvider::new(vec![
            primary.clone() as Arc<dyn MarketDataProvider>,
            backup.clone() as Arc<dyn MarketDataProvider>,
        ]);
        let data = failover.fetch(&resource).await.unwrap();

        assert_eq!(data.as_f64(), Some(142.0));
        assert_eq!(primary.call_count(), 1);
        assert_eq!(backup.call_count(), 1);
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let primary = Arc::new(MockProvider::new());
        let backup = Arc::new(MockProvider::new());
        let resource = ResourceId::price("BTC");
        primary.set_payload(resource.clone(), json!(64000.0));

        let failover = FailoverProvider::new(vec![
            primary.clone() as Arc<dyn MarketDataProvider>,
            backup.clone() as Arc<dyn MarketDataProvider>,
        ]);
        assert!(failover.fetch(&resource).await.is_ok());
        assert_eq!(backup.call_count(), 0);
    }

    #[tokio::test]
    async fn test_reports_last_error() {
        let only = Arc::new(MockProvider::new());
        only.set_error(ResourceId::price("X"), "HTTP 500");
        let failover = FailoverProvider::new(vec![only as Arc<dyn MarketDataProvider>]);
        assert!(matches!(
            failover.fetch(&ResourceId::price("X")).await,
            Err(ProviderError::ApiError(_))
        ));

        let empty = FailoverProvider::new(vec![]);
        assert!(empty.fetch(&ResourceId::price("X")).await.is_err());
    }
}
