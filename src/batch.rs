//! Cache-first bulk fetching with bounded concurrency and partial failure
//!
//! Identifiers are split into chunks of `concurrency`. Chunks run one after
//! another while the identifiers inside a chunk are fetched concurrently, so
//! the number of in-flight upstream calls never exceeds `concurrency` no
//! matter how large the batch is. Each identifier runs in its own task: one
//! failing (or panicking) fetch becomes a failed [`BatchResult`] and never
//! aborts its siblings or later chunks.

use crate::{
    cache::TtlCache,
    client::Client,
    config::{BatchConfig, ResourceTtls},
    error::FetchError,
    types::{MarketData, ResourceId},
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

/// Shared cache type used by the batch path
pub type MarketDataCache = TtlCache<ResourceId, MarketData>;

/// Outcome for one requested identifier
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchResult<T> {
    pub key: ResourceId,
    pub ok: bool,
    pub data: Option<T>,
    pub error: Option<FetchError>,
    /// True when served from cache without an upstream call
    pub cached: bool,
}

impl<T> BatchResult<T> {
    pub fn success(key: ResourceId, data: T, cached: bool) -> Self {
        Self {
            key,
            ok: true,
            data: Some(data),
            error: None,
            cached,
        }
    }

    pub fn failure(key: ResourceId, error: FetchError) -> Self {
        Self {
            key,
            ok: false,
            data: None,
            error: Some(error),
            cached: false,
        }
    }

    /// Converts back into a plain result
    pub fn into_result(self) -> Result<T, FetchError> {
        match (self.data, self.error) {
            (Some(data), _) => Ok(data),
            (None, Some(error)) => Err(error),
            (None, None) => Err(FetchError::upstream("batch result without data")),
        }
    }
}

/// Bulk fetcher layered over a [`Client`] and the shared cache
pub struct BatchOrchestrator {
    client: Arc<Client>,
    cache: Arc<MarketDataCache>,
    ttls: ResourceTtls,
    default_concurrency: usize,
}

impl BatchOrchestrator {
    pub fn new(client: Arc<Client>, cache: Arc<MarketDataCache>, config: &BatchConfig) -> Self {
        Self {
            client,
            cache,
            ttls: config.ttls.clone(),
            default_concurrency: config.concurrency.max(1),
        }
    }

    /// Fetches every identifier, returning exactly one result per input, in input order
    ///
    /// Dropping the returned future aborts the fetches still in flight.
    pub async fn fetch_all(
        &self,
        ids: &[ResourceId],
        concurrency: usize,
    ) -> Vec<BatchResult<MarketData>> {
        let concurrency = concurrency.max(1);
        let mut results = Vec::with_capacity(ids.len());

        for (index, chunk) in ids.chunks(concurrency).enumerate() {
            // A slot keeps its placeholder only if its task dies before reporting
            let mut slots: Vec<BatchResult<MarketData>> = chunk
                .iter()
                .map(|id| {
                    BatchResult::failure(id.clone(), FetchError::upstream("fetch task failed"))
                })
                .collect();

            let mut tasks = JoinSet::new();
            for (slot, id) in chunk.iter().enumerate() {
                let client = self.client.clone();
                let cache = self.cache.clone();
                let ttls = self.ttls.clone();
                let id = id.clone();
                tasks.spawn(async move { (slot, fetch_cached(&client, &cache, &ttls, &id).await) });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((slot, result)) => slots[slot] = result,
                    Err(e) => tracing::warn!(chunk = index, error = %e, "Batch fetch task failed"),
                }
            }

            results.extend(slots);
            tracing::debug!(chunk = index, size = chunk.len(), "Batch chunk complete");
        }

        let failed = results.iter().filter(|r| !r.ok).count();
        if failed > 0 {
            tracing::warn!(total = results.len(), failed, "Batch completed with failures");
        }

        results
    }

    /// [`BatchOrchestrator::fetch_all`] at the configured concurrency
    pub async fn fetch_all_default(&self, ids: &[ResourceId]) -> Vec<BatchResult<MarketData>> {
        self.fetch_all(ids, self.default_concurrency).await
    }

    /// Cache-first fetch of a single identifier
    pub async fn fetch_one(&self, id: &ResourceId) -> Result<MarketData, FetchError> {
        fetch_cached(&self.client, &self.cache, &self.ttls, id)
            .await
            .into_result()
    }

    /// Fetches `id` from upstream regardless of the cache, then stores the result
    pub async fn refresh(&self, id: &ResourceId) -> Result<MarketData, FetchError> {
        let data = self.client.fetch(id).await?;
        self.cache.set(id.clone(), data.clone(), self.ttls.ttl_for(id.kind));
        Ok(data)
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }
}

async fn fetch_cached(
    client: &Client,
    cache: &MarketDataCache,
    ttls: &ResourceTtls,
    id: &ResourceId,
) -> BatchResult<MarketData> {
    if let Some(data) = cache.get(id) {
        return BatchResult::success(id.clone(), data, true);
    }

    match client.fetch(id).await {
        Ok(data) => {
            cache.set(id.clone(), data.clone(), ttls.ttl_for(id.kind));
            BatchResult::success(id.clone(), data, false)
        }
        Err(e) => BatchResult::failure(id.clone(), e),
    }
}
