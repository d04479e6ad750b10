//! Provider abstraction for fetching market data from external APIs

use crate::{
    error::ProviderError,
    types::{MarketData, ResourceId},
};
use async_trait::async_trait;

/// Trait for market data upstreams
///
/// Implementations fetch one resource from one source (CoinGecko,
/// Hyperliquid, a generic JSON endpoint, ...). The only contract the
/// ingestion layer relies on is "can be called and returns parseable JSON or
/// an error"; deadlines, rate limits and circuit breaking are applied by
/// [`crate::client::Client`] around every call.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Fetches the current data for a single resource
    ///
    /// # Arguments
    /// * `resource` - Resource kind plus opaque key
    ///
    /// # Returns
    /// The narrowed JSON payload, or an error if the fetch fails
    async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, ProviderError>;

    /// Returns the name of this provider
    fn provider_name(&self) -> &'static str;
}
