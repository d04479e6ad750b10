//! Upstream implementations: request/response providers and push feed connectors

pub mod coingecko;
pub mod failover;
pub mod http;
pub mod hyperliquid;
pub mod sse;
pub mod websocket;

pub use coingecko::CoinGeckoProvider;
pub use failover::FailoverProvider;
pub use http::{Endpoint, HttpJsonProvider};
pub use hyperliquid::HyperliquidProvider;
pub use sse::SseConnector;
pub use websocket::WebSocketConnector;
