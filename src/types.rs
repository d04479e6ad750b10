//! Types for the market data ingestion layer

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Kinds of resources the layer knows how to fetch
///
/// The kind only decides caching policy and which upstream endpoint serves
/// the request; the key itself stays opaque.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Spot price of a coin or token
    Price,
    /// Token metadata (name, decimals, links)
    Metadata,
    /// Discovery listings (trending, new pairs)
    Discovery,
    /// Order book snapshot
    OrderBook,
}

impl ResourceKind {
    /// Get the kind name as used in URLs and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Price => "price",
            ResourceKind::Metadata => "metadata",
            ResourceKind::Discovery => "discovery",
            ResourceKind::OrderBook => "order_book",
        }
    }

    /// Get all resource kinds
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Price,
            ResourceKind::Metadata,
            ResourceKind::Discovery,
            ResourceKind::OrderBook,
        ]
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one fetchable resource: a kind plus an opaque key
/// (coin id, token address, symbol)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: ResourceKind,
    pub key: String,
}

impl ResourceId {
    pub fn new(kind: ResourceKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }

    pub fn price(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Price, key)
    }

    pub fn metadata(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Metadata, key)
    }

    pub fn discovery(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::Discovery, key)
    }

    pub fn order_book(key: impl Into<String>) -> Self {
        Self::new(ResourceKind::OrderBook, key)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Data returned by an upstream for one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketData {
    /// The resource this payload answers
    pub resource: ResourceId,

    /// Upstream JSON payload, already narrowed to the resource
    pub payload: serde_json::Value,

    /// Data source
    pub source: String,

    /// When the upstream answered
    pub fetched_at: DateTime<Utc>,
}

impl MarketData {
    /// Create new market data stamped with the current time
    pub fn new(
        resource: ResourceId,
        payload: serde_json::Value,
        source: impl Into<String>,
    ) -> Self {
        Self {
            resource,
            payload,
            source: source.into(),
            fetched_at: Utc::now(),
        }
    }

    /// Get the age of the data
    pub fn age(&self) -> Duration {
        let duration = Utc::now().signed_duration_since(self.fetched_at);
        duration.to_std().unwrap_or(Duration::ZERO)
    }

    /// Reads the payload as a number, accepting JSON numbers and numeric strings
    pub fn as_f64(&self) -> Option<f64> {
        match &self.payload {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// One message accepted from a push feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub id: Uuid,
    pub received_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

impl StreamEvent {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            received_at: Utc::now(),
            payload,
        }
    }
}

/// Connection state of a stream aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Provider status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderStatus {
    /// Provider is healthy
    Healthy,
    /// Provider is experiencing issues
    Degraded,
    /// Provider is unavailable (circuit open)
    Unavailable,
}

/// Overall system health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// System is healthy and all components are operational
    Healthy,
    /// System is degraded but still functional
    Degraded,
    /// System is unhealthy and requires attention
    Unhealthy,
}

/// Component health information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional status message
    pub message: Option<String>,
    /// Component-specific details
    pub details: std::collections::HashMap<String, serde_json::Value>,
    /// Last checked timestamp
    pub last_checked: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_id_display() {
        assert_eq!(ResourceId::price("solana").to_string(), "price:solana");
        assert_eq!(ResourceId::order_book("BTC").to_string(), "order_book:BTC");
    }

    #[test]
    fn test_market_data_as_f64() {
        let numeric = MarketData::new(ResourceId::price("solana"), json!(142.5), "test");
        assert_eq!(numeric.as_f64(), Some(142.5));

        let string = MarketData::new(ResourceId::price("BTC"), json!("64000.1"), "test");
        assert_eq!(string.as_f64(), Some(64000.1));

        let object =
            MarketData::new(ResourceId::metadata("solana"), json!({"name": "Solana"}), "test");
        assert_eq!(object.as_f64(), None);
    }
}
