//! Composition root of the ingestion layer
//!
//! [`IngestionLayer::init`] wires one cache, rate limiter, circuit breaker,
//! client, batch orchestrator and background refresher around a provider.
//! Nothing is process-global: every layer owns its own instances and
//! [`IngestionLayer::shutdown`] stops every task it started.

use crate::{
    batch::{BatchOrchestrator, BatchResult, MarketDataCache},
    cache::TtlCache,
    circuit_breaker::{CircuitBreaker, CircuitState},
    client::Client,
    config::IngestConfig,
    error::{ConfigError, FetchError, ProviderError},
    metrics::ProviderMetrics,
    provider::MarketDataProvider,
    providers::{CoinGeckoProvider, FailoverProvider, HyperliquidProvider},
    rate_limiter::RateLimiter,
    refresher::BackgroundRefresher,
    stream::{FeedConnector, StreamAggregator},
    types::{
        ComponentHealth, ConnectionState, HealthStatus, MarketData, ProviderStatus, ResourceId,
        StreamEvent,
    },
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable selecting the default upstream
pub const PROVIDER_ENV_VAR: &str = "MARKET_DATA_PROVIDER";

/// Builds the upstream named by `MARKET_DATA_PROVIDER`
///
/// `coingecko` and `hyperliquid` select a single provider; anything else
/// (including an unset variable) selects Hyperliquid with CoinGecko as
/// backup.
pub fn default_provider() -> Result<Arc<dyn MarketDataProvider>, ProviderError> {
    let name = std::env::var(PROVIDER_ENV_VAR).unwrap_or_else(|_| "failover".to_string());
    provider_from_name(&name)
}

/// Builds the upstream for a provider name (see [`default_provider`])
pub fn provider_from_name(name: &str) -> Result<Arc<dyn MarketDataProvider>, ProviderError> {
    let provider: Arc<dyn MarketDataProvider> = match name.to_lowercase().as_str() {
        "hyperliquid" => Arc::new(HyperliquidProvider::new()?),
        "coingecko" => Arc::new(CoinGeckoProvider::new()?),
        _ => Arc::new(FailoverProvider::new(vec![
            Arc::new(HyperliquidProvider::new()?),
            Arc::new(CoinGeckoProvider::new()?),
        ])),
    };
    Ok(provider)
}

/// Cached, rate-limited, circuit-protected access to one upstream plus an
/// optional push feed
///
/// # Example
/// ```no_run
/// use market_data_sdk::{IngestConfig, IngestionLayer, ResourceId};
/// use market_data_sdk::ingest::default_provider;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let layer = IngestionLayer::init(IngestConfig::from_env()?, default_provider()?)?;
/// layer.watch_default(ResourceId::price("SOL"));
///
/// let sol = layer.get(&ResourceId::price("SOL")).await?;
/// println!("SOL: {:?}", sol.as_f64());
///
/// layer.shutdown();
/// # Ok(())
/// # }
/// ```
pub struct IngestionLayer {
    config: IngestConfig,
    client: Arc<Client>,
    batch: Arc<BatchOrchestrator>,
    refresher: BackgroundRefresher,
    stream: Option<StreamAggregator>,
}

impl IngestionLayer {
    /// Validates `config` and builds the shared components around `provider`
    pub fn init(
        config: IngestConfig,
        provider: Arc<dyn MarketDataProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
        let breaker = Arc::new(CircuitBreaker::from_config(
            provider.provider_name(),
            &config.circuit_breaker,
        ));
        let client = Arc::new(Client::new(provider, limiter, breaker, &config.client));
        let cache: Arc<MarketDataCache> = Arc::new(TtlCache::new(config.cache.capacity));
        let batch = Arc::new(BatchOrchestrator::new(client.clone(), cache, &config.batch));
        let refresher = BackgroundRefresher::new(config.refresh.clone());

        tracing::info!(
            provider = client.provider_name(),
            cache_capacity = config.cache.capacity,
            concurrency = config.batch.concurrency,
            "Ingestion layer initialized"
        );

        Ok(Self {
            config,
            client,
            batch,
            refresher,
            stream: None,
        })
    }

    /// Attaches a push feed and starts its connection loop
    ///
    /// Must be called from within a tokio runtime. Replaces (and stops) a
    /// previously attached feed.
    pub fn with_stream(mut self, connector: Arc<dyn FeedConnector>) -> Self {
        if let Some(previous) = self.stream.take() {
            previous.stop();
        }
        let aggregator = StreamAggregator::new(connector, self.config.stream.clone());
        aggregator.start();
        self.stream = Some(aggregator);
        self
    }

    /// Cache-first read of one resource
    pub async fn get(&self, resource: &ResourceId) -> Result<MarketData, FetchError> {
        self.batch.fetch_one(resource).await
    }

    /// Cache-first read of many resources; one result per input, in order
    pub async fn get_many(&self, resources: &[ResourceId]) -> Vec<BatchResult<MarketData>> {
        self.batch.fetch_all_default(resources).await
    }

    /// Keeps `resource` warm in the cache, refetching it every `every`
    ///
    /// The first refresh runs immediately. Watching a resource again
    /// replaces its schedule.
    pub fn watch(&self, resource: ResourceId, every: Duration) {
        let batch = self.batch.clone();
        let key = resource.to_string();
        self.refresher.start(
            key,
            move || {
                let batch = batch.clone();
                let resource = resource.clone();
                async move { batch.refresh(&resource).await }
            },
            every,
        );
    }

    /// [`IngestionLayer::watch`] at the configured refresh interval
    pub fn watch_default(&self, resource: ResourceId) {
        let every = Duration::from_millis(self.config.refresh.interval_ms);
        self.watch(resource, every);
    }

    /// Stops refreshing `resource`, returning whether it was watched
    pub fn unwatch(&self, resource: &ResourceId) -> bool {
        self.refresher.stop(&resource.to_string())
    }

    pub fn watched(&self) -> Vec<String> {
        self.refresher.active_keys()
    }

    /// Up to `limit` most recent feed events, newest first (empty without a feed)
    pub fn recent_events(&self, limit: usize) -> Vec<StreamEvent> {
        self.stream
            .as_ref()
            .map(|stream| stream.recent(limit))
            .unwrap_or_default()
    }

    pub fn stream_state(&self) -> Option<ConnectionState> {
        self.stream.as_ref().map(StreamAggregator::state)
    }

    pub fn provider_name(&self) -> &'static str {
        self.client.provider_name()
    }

    pub fn metrics(&self) -> ProviderMetrics {
        self.client.metrics()
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.client.circuit_state()
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        self.batch.cache()
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Perform a health check on the ingestion layer
    ///
    /// - `Unhealthy`: the upstream circuit is open
    /// - `Degraded`: recent upstream failures, or the feed is not connected
    /// - `Healthy`: otherwise
    pub fn health_check(&self) -> ComponentHealth {
        let mut details = HashMap::new();
        let breaker = self.client.breaker();
        let circuit = breaker.state();
        let failures = breaker.consecutive_failures();
        let stream_state = self.stream_state();
        let cache_stats = self.cache().stats();

        details.insert("provider_name".to_string(), json!(self.provider_name()));
        let provider_status = match (circuit, failures) {
            (CircuitState::Open, _) => ProviderStatus::Unavailable,
            (CircuitState::Closed, 0) => ProviderStatus::Healthy,
            (CircuitState::Closed, _) => ProviderStatus::Degraded,
        };
        details.insert("provider_status".to_string(), json!(provider_status));
        details.insert("circuit_state".to_string(), json!(circuit));
        details.insert("consecutive_failures".to_string(), json!(failures));
        details.insert("cached_entries".to_string(), json!(self.cache().len()));
        details.insert("cache_stats".to_string(), json!(cache_stats));
        details.insert("cache_hit_rate".to_string(), json!(cache_stats.hit_rate()));
        details.insert("watched".to_string(), json!(self.watched()));
        details.insert("metrics".to_string(), json!(self.metrics()));
        if let Some(state) = stream_state {
            details.insert("stream_state".to_string(), json!(state));
            let events = self.stream.as_ref().map_or(0, StreamAggregator::len);
            details.insert("stream_events".to_string(), json!(events));
        }

        let stream_down = stream_state.is_some_and(|state| state != ConnectionState::Connected);
        let (status, message) = if provider_status == ProviderStatus::Unavailable {
            (
                HealthStatus::Unhealthy,
                format!("Circuit open for {} after {} failures", self.provider_name(), failures),
            )
        } else if provider_status == ProviderStatus::Degraded {
            (
                HealthStatus::Degraded,
                format!("{} recent failures from {}", failures, self.provider_name()),
            )
        } else if stream_down {
            (HealthStatus::Degraded, "Push feed is not connected".to_string())
        } else {
            (HealthStatus::Healthy, "Ingestion layer is operational".to_string())
        };

        ComponentHealth {
            name: "market_data_ingestion".to_string(),
            status,
            message: Some(message),
            details,
            last_checked: chrono::Utc::now(),
        }
    }

    /// Stops every refresh task and the push feed; cached data stays readable
    pub fn shutdown(&self) {
        self.refresher.stop_all();
        if let Some(stream) = &self.stream {
            stream.stop();
        }
        tracing::info!(provider = self.provider_name(), "Ingestion layer shut down");
    }
}

impl Drop for IngestionLayer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::mock::MockProvider;
    use crate::stream::FeedStream;
    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::time::sleep;

    struct SilentFeed;

    #[async_trait]
    impl FeedConnector for SilentFeed {
        async fn connect(&self) -> Result<FeedStream, ProviderError> {
            Ok(futures::stream::iter(vec![Ok(r#"{"px": 142.3}"#.to_string())])
                .chain(futures::stream::pending())
                .boxed())
        }

        fn name(&self) -> &'static str {
            "silent"
        }
    }

    struct DeadFeed;

    #[async_trait]
    impl FeedConnector for DeadFeed {
        async fn connect(&self) -> Result<FeedStream, ProviderError> {
            Err(ProviderError::ApiError("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "dead"
        }
    }

    fn layer(provider: Arc<MockProvider>) -> IngestionLayer {
        IngestionLayer::init(IngestConfig::default(), provider).unwrap()
    }

    #[tokio::test]
    async fn test_get_is_cache_first() {
        let provider = Arc::new(MockProvider::new());
        let sol = ResourceId::price("SOL");
        provider.set_payload(sol.clone(), json!(142.0));
        let layer = layer(provider.clone());

        assert_eq!(layer.get(&sol).await.unwrap().as_f64(), Some(142.0));
        assert_eq!(layer.get(&sol).await.unwrap().as_f64(), Some(142.0));
        assert_eq!(provider.call_count(), 1);
        assert_eq!(layer.cache().stats().hits, 1);
    }

    #[tokio::test]
    async fn test_get_many_keeps_order() {
        let provider = Arc::new(MockProvider::new());
        provider.set_payload(ResourceId::price("SOL"), json!(142.0));
        provider.set_payload(ResourceId::price("BTC"), json!(64000.0));
        let layer = layer(provider);

        let ids = vec![
            ResourceId::price("BTC"),
            ResourceId::price("NOPE"),
            ResourceId::price("SOL"),
        ];
        let results = layer.get_many(&ids).await;

        let keys: Vec<_> = results.iter().map(|r| r.key.key.as_str()).collect();
        assert_eq!(keys, vec!["BTC", "NOPE", "SOL"]);
        let oks: Vec<_> = results.iter().map(|r| r.ok).collect();
        assert_eq!(oks, vec![true, false, true]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_ttl_is_served_from_cache() {
        let config = IngestConfig::from_lookup(|var| {
            (var == "MARKET_DATA_PRICE_TTL_SECS").then(|| u64::MAX.to_string())
        })
        .unwrap();
        let provider = Arc::new(MockProvider::new());
        let sol = ResourceId::price("SOL");
        provider.set_payload(sol.clone(), json!(142.0));
        let layer = IngestionLayer::init(config, provider.clone()).unwrap();

        assert_eq!(layer.get(&sol).await.unwrap().as_f64(), Some(142.0));
        sleep(Duration::from_secs(86_400)).await;
        assert_eq!(layer.get(&sol).await.unwrap().as_f64(), Some(142.0));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_refreshes_until_unwatched() {
        let provider = Arc::new(MockProvider::new());
        let book = ResourceId::order_book("SOL");
        provider.set_payload(book.clone(), json!({"bids": [], "asks": []}));
        let layer = layer(provider.clone());

        layer.watch(book.clone(), Duration::from_secs(10));
        sleep(Duration::from_secs(25)).await;

        // ticks at 0s, 10s and 20s
        assert_eq!(provider.calls_for(&book), 3);
        assert!(layer.cache().contains_key(&book));
        assert_eq!(layer.watched(), vec![book.to_string()]);

        assert!(layer.unwatch(&book));
        sleep(Duration::from_secs(30)).await;
        assert_eq!(provider.calls_for(&book), 3);
        assert!(!layer.unwatch(&book));
    }

    #[tokio::test]
    async fn test_open_circuit_is_unhealthy() {
        let provider = Arc::new(MockProvider::new());
        let eth = ResourceId::price("ETH");
        provider.set_error(eth.clone(), "HTTP 503");

        let mut config = IngestConfig::default();
        config.circuit_breaker.failure_threshold = 2;
        let layer = IngestionLayer::init(config, provider).unwrap();
        assert_eq!(layer.health_check().status, HealthStatus::Healthy);

        assert!(layer.get(&eth).await.is_err());
        assert_eq!(layer.health_check().status, HealthStatus::Degraded);

        assert!(layer.get(&eth).await.is_err());
        let health = layer.health_check();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.details["circuit_state"], json!("open"));
        assert_eq!(health.details["provider_status"], json!("unavailable"));

        let err = layer.get(&eth).await.unwrap_err();
        assert!(err.is_short_circuit());
    }

    #[tokio::test]
    async fn test_stream_state_drives_health() {
        let layer = layer(Arc::new(MockProvider::new())).with_stream(Arc::new(SilentFeed));
        let mut state = layer.stream.as_ref().unwrap().subscribe_state();
        state
            .wait_for(|s| *s == ConnectionState::Connected)
            .await
            .unwrap();
        tokio::task::yield_now().await;

        let health = layer.health_check();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.details["stream_events"], json!(1));
        assert_eq!(layer.recent_events(10).len(), 1);

        let degraded = layer.with_stream(Arc::new(DeadFeed));
        tokio::task::yield_now().await;
        assert_eq!(degraded.health_check().status, HealthStatus::Degraded);
        assert!(degraded.recent_events(10).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_everything() {
        let provider = Arc::new(MockProvider::new());
        let sol = ResourceId::price("SOL");
        provider.set_payload(sol.clone(), json!(142.0));
        let layer = layer(provider.clone()).with_stream(Arc::new(SilentFeed));

        layer.watch(sol.clone(), Duration::from_secs(5));
        sleep(Duration::from_millis(10)).await;
        layer.shutdown();

        let calls = provider.calls_for(&sol);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(provider.calls_for(&sol), calls);
        assert!(layer.watched().is_empty());
        assert_eq!(layer.stream_state(), Some(ConnectionState::Disconnected));
        // cached data outlives the tasks
        assert!(layer.cache().contains_key(&sol));
    }

    #[tokio::test]
    async fn test_init_rejects_invalid_config() {
        let mut config = IngestConfig::default();
        config.batch.concurrency = 0;
        assert!(IngestionLayer::init(config, Arc::new(MockProvider::new())).is_err());
    }

    #[tokio::test]
    async fn test_provider_selection() {
        let name = |selector: &str| provider_from_name(selector).unwrap().provider_name();
        assert_eq!(name("coingecko"), "coingecko");
        assert_eq!(name("HyperLiquid"), "hyperliquid");
        assert_eq!(name("failover"), "failover");
        assert_eq!(name(""), "failover");
    }
}
