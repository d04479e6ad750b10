//! Hyperliquid market data provider implementation

use crate::{
    constants::HYPERLIQUID_API_URL,
    error::ProviderError,
    provider::MarketDataProvider,
    providers::http::{build_http_client, post_json},
    types::{MarketData, ResourceId, ResourceKind},
};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

/// Hyperliquid API request for info
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum HyperliquidRequest<'a> {
    AllMids,
    Meta,
    L2Book { coin: &'a str },
}

/// Hyperliquid provider
///
/// - `Price`: mid price for a perp symbol (`SOL`, `BTC`)
/// - `Metadata`: universe entry for the symbol (size decimals, max leverage)
/// - `OrderBook`: L2 snapshot, bids then asks
pub struct HyperliquidProvider {
    client: Client,
    url: String,
}

impl HyperliquidProvider {
    /// Creates a new Hyperliquid provider
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self::with_url(build_http_client()?, HYPERLIQUID_API_URL))
    }

    pub fn with_url(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    fn request_for<'a>(resource: &'a ResourceId) -> Result<HyperliquidRequest<'a>, ProviderError> {
        match resource.kind {
            ResourceKind::Price => Ok(HyperliquidRequest::AllMids),
            ResourceKind::Metadata => Ok(HyperliquidRequest::Meta),
            ResourceKind::OrderBook => Ok(HyperliquidRequest::L2Book { coin: &resource.key }),
            ResourceKind::Discovery => {
                Err(ProviderError::UnsupportedResource(resource.to_string()))
            }
        }
    }

    /// Narrows the Hyperliquid response to the requested resource
    fn parse_response(resource: &ResourceId, body: Value) -> Result<Value, ProviderError> {
        let symbol = resource.key.as_str();
        match resource.kind {
            ResourceKind::Price => {
                // allMids returns symbol -> mid price as a string
                let price_usd = body
                    .get(symbol)
                    .and_then(Value::as_str)
                    .and_then(|mid| mid.parse::<f64>().ok())
                    .ok_or_else(|| {
                        let message = format!("No mid price returned for {}", symbol);
                        ProviderError::InvalidResponse(message)
                    })?;
                Ok(json!({ "price_usd": price_usd, "price_change_24h": null }))
            }
            ResourceKind::Metadata => body
                .get("universe")
                .and_then(Value::as_array)
                .and_then(|universe| {
                    universe
                        .iter()
                        .find(|asset| asset.get("name").and_then(Value::as_str) == Some(symbol))
                })
                .cloned()
                .ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("{} not found in universe", symbol))
                }),
            ResourceKind::OrderBook => {
                let levels = body.get("levels").and_then(Value::as_array).ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("No order book returned for {}", symbol))
                })?;
                if levels.len() != 2 {
                    return Err(ProviderError::InvalidResponse(format!(
                        "Expected bids and asks for {}, got {} sides",
                        symbol,
                        levels.len()
                    )));
                }
                Ok(json!({
                    "coin": symbol,
                    "time": body.get("time").cloned().unwrap_or(Value::Null),
                    "bids": levels[0],
                    "asks": levels[1],
                }))
            }
            ResourceKind::Discovery => {
                Err(ProviderError::UnsupportedResource(resource.to_string()))
            }
        }
    }
}

#[async_trait]
impl MarketDataProvider for HyperliquidProvider {
    async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, ProviderError> {
        let request = Self::request_for(resource)?;
        let body = post_json(&self.client, &self.url, &request).await?;
        let payload = Self::parse_response(resource, body)?;
        Ok(MarketData::new(resource.clone(), payload, self.provider_name()))
    }

    fn provider_name(&self) -> &'static str {
        "hyperliquid"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_bodies() {
        let book = ResourceId::order_book("SOL");
        let body = serde_json::to_value(HyperliquidProvider::request_for(&book).unwrap()).unwrap();
        assert_eq!(body, json!({"type": "l2Book", "coin": "SOL"}));

        let price = ResourceId::price("SOL");
        let mids = serde_json::to_value(HyperliquidProvider::request_for(&price).unwrap()).unwrap();
        assert_eq!(mids, json!({"type": "allMids"}));

        assert!(HyperliquidProvider::request_for(&ResourceId::discovery("trending")).is_err());
    }

    #[test]
    fn test_parse_mid_price() {
        let body = json!({"SOL": "142.35", "BTC": "64000.5"});
        let payload = HyperliquidProvider::parse_response(&ResourceId::price("BTC"), body).unwrap();
        assert_eq!(payload["price_usd"], json!(64000.5));

        let bad =
            HyperliquidProvider::parse_response(&ResourceId::price("ETH"), json!({"SOL": "1"}));
        assert!(matches!(bad, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_order_book() {
        let body = json!({
            "coin": "SOL",
            "time": 1700000000000u64,
            "levels": [[{"px": "142.3", "sz": "10", "n": 2}], [{"px": "142.4", "sz": "4", "n": 1}]]
        });
        let book = ResourceId::order_book("SOL");
        let payload = HyperliquidProvider::parse_response(&book, body).unwrap();
        assert_eq!(payload["bids"][0]["px"], json!("142.3"));
        assert_eq!(payload["asks"][0]["sz"], json!("4"));

        let one_sided = json!({"levels": [[]]});
        assert!(HyperliquidProvider::parse_response(&book, one_sided).is_err());
    }

    #[test]
    fn test_parse_metadata() {
        let body = json!({
            "universe": [{"name": "BTC", "szDecimals": 5}, {"name": "SOL", "szDecimals": 2}]
        });
        let meta = ResourceId::metadata("SOL");
        let payload = HyperliquidProvider::parse_response(&meta, body).unwrap();
        assert_eq!(payload["szDecimals"], json!(2));
    }
}
