//! Constants for the market data ingestion layer
//!
//! These are the compile-time defaults. Every value can be overridden at
//! runtime through [`crate::config::IngestConfig`], either programmatically or
//! via `MARKET_DATA_*` environment variables.

/// Deadline for a single outbound upstream call (in milliseconds)
pub const REQUEST_TIMEOUT_MS: u64 = 5_000;

/// Token bucket burst capacity per upstream
pub const RATE_LIMIT_CAPACITY: f64 = 10.0;

/// Token bucket refill rate per upstream (tokens per second)
pub const RATE_LIMIT_REFILL_PER_SEC: f64 = 5.0;

/// Consecutive failures before the circuit opens
pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit rejects calls (in milliseconds)
pub const CIRCUIT_COOLDOWN_MS: u64 = 30_000;

/// Maximum number of extra backed-off retries after consecutive failures
pub const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base backoff delay for retries (in milliseconds)
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff delay for retries (in milliseconds)
pub const MAX_BACKOFF_MS: u64 = 30_000;

/// Default interval between scheduled background refreshes (in milliseconds)
pub const REFRESH_INTERVAL_MS: u64 = 25_000;

/// Number of identifiers fetched concurrently inside one batch chunk
pub const BATCH_CONCURRENCY: usize = 8;

/// TTL for volatile price data (in seconds)
pub const PRICE_TTL_SECS: u64 = 15;

/// TTL for slow-changing token metadata (in seconds)
pub const METADATA_TTL_SECS: u64 = 60;

/// TTL for discovery listings such as trending tokens (in seconds)
pub const DISCOVERY_TTL_SECS: u64 = 60;

/// TTL for order book snapshots (in seconds)
pub const ORDER_BOOK_TTL_SECS: u64 = 5;

/// Maximum number of entries held by the shared cache
pub const CACHE_CAPACITY: usize = 256;

/// Number of stream events retained in memory
pub const STREAM_BUFFER_SIZE: usize = 200;

/// Fixed delay before reconnecting a dropped stream (in milliseconds)
pub const STREAM_RECONNECT_DELAY_MS: u64 = 3_000;

/// Silence after which a stream connection is considered dead (in milliseconds)
pub const STREAM_IDLE_TIMEOUT_MS: u64 = 60_000;

/// Stand-in expiry for durations too large to add to an `Instant` (30 years)
pub const FAR_FUTURE_SECS: u64 = 86_400 * 365 * 30;

/// CoinGecko API base URL
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";

/// Hyperliquid API base URL
pub const HYPERLIQUID_API_URL: &str = "https://api.hyperliquid.xyz/info";

/// User agent for HTTP requests
pub const USER_AGENT: &str = "market-data-sdk/0.1.0";
