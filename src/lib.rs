//! # Market Data Ingestion SDK
//!
//! Pulls live market data (prices, token metadata, discovery lists, order
//! books) from unreliable upstream providers and serves it to many
//! concurrent readers with bounded staleness and bounded memory.
//!
//! ## Building blocks
//!
//! - [`cache::TtlCache`]: bounded TTL + LRU cache
//! - [`rate_limiter::RateLimiter`]: token bucket shared by every call to one upstream
//! - [`circuit_breaker::CircuitBreaker`]: fails fast while an upstream is down
//! - [`client::Client`]: breaker check, token, deadline and validation around one provider
//! - [`refresher::BackgroundRefresher`]: keeps keys warm with exponential-backoff retries
//! - [`batch::BatchOrchestrator`]: cache-first bulk fetch with bounded concurrency
//! - [`stream::StreamAggregator`]: reconnecting push feed with a bounded event buffer
//!
//! [`IngestionLayer`] wires them together. There is no global instance:
//! create one per upstream and call [`IngestionLayer::shutdown`] when done.
//!
//! ## Usage
//!
//! ```no_run
//! use market_data_sdk::{IngestConfig, IngestionLayer, ResourceId};
//! use market_data_sdk::ingest::default_provider;
//! use market_data_sdk::providers::WebSocketConnector;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let layer = IngestionLayer::init(IngestConfig::from_env()?, default_provider()?)?
//!     .with_stream(Arc::new(WebSocketConnector::hyperliquid_trades("SOL")));
//!
//! let results = layer
//!     .get_many(&[ResourceId::price("SOL"), ResourceId::price("BTC")])
//!     .await;
//! for result in results {
//!     match result.data {
//!         Some(data) => println!("{}: {:?}", result.key, data.as_f64()),
//!         None => println!("{}: {:?}", result.key, result.error),
//!     }
//! }
//!
//! for event in layer.recent_events(5) {
//!     println!("{} {}", event.received_at, event.payload);
//! }
//!
//! layer.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod cache;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod constants;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod provider;
pub mod providers;
pub mod rate_limiter;
pub mod refresher;
pub mod stream;
pub mod types;

// Re-export commonly used types
pub use batch::{BatchOrchestrator, BatchResult};
pub use cache::TtlCache;
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::Client;
pub use config::IngestConfig;
pub use error::{ConfigError, FetchError, ProviderError};
pub use ingest::IngestionLayer;
pub use metrics::ProviderMetrics;
pub use provider::MarketDataProvider;
pub use rate_limiter::RateLimiter;
pub use refresher::BackgroundRefresher;
pub use stream::{FeedConnector, StreamAggregator};
pub use types::{
    ComponentHealth, ConnectionState, HealthStatus, MarketData, ResourceId, ResourceKind,
    StreamEvent,
};
