//! CoinGecko market data provider implementation

use crate::{
    constants::COINGECKO_API_URL,
    error::ProviderError,
    provider::MarketDataProvider,
    providers::http::{build_http_client, get_json},
    types::{MarketData, ResourceId, ResourceKind},
};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

/// Discovery key served by the trending endpoint
pub const TRENDING_KEY: &str = "trending";

/// Coin profile without the heavy sections
const METADATA_QUERY: &str =
    "localization=false&tickers=false&market_data=false&community_data=false&developer_data=false";

/// CoinGecko provider
///
/// - `Price`: USD spot price for a CoinGecko coin id (`solana`, `bitcoin`)
/// - `Metadata`: coin profile (name, symbol, platforms, links)
/// - `Discovery`: trending coins, key `"trending"`
pub struct CoinGeckoProvider {
    client: Client,
    base_url: String,
}

impl CoinGeckoProvider {
    /// Creates a new CoinGecko provider
    pub fn new() -> Result<Self, ProviderError> {
        Ok(Self::with_base_url(build_http_client()?, COINGECKO_API_URL))
    }

    /// Points the provider at another deployment (pro API, proxy)
    pub fn with_base_url(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Builds the CoinGecko API URL for a resource
    fn build_url(&self, resource: &ResourceId) -> Result<String, ProviderError> {
        let key = urlencoding::encode(&resource.key);
        let url = match resource.kind {
            ResourceKind::Price => format!(
                "{}/simple/price?ids={}&vs_currencies=usd&include_24hr_change=true",
                self.base_url, key
            ),
            ResourceKind::Metadata => {
                format!("{}/coins/{}?{}", self.base_url, key, METADATA_QUERY)
            }
            ResourceKind::Discovery if resource.key == TRENDING_KEY => {
                format!("{}/search/trending", self.base_url)
            }
            _ => return Err(ProviderError::UnsupportedResource(resource.to_string())),
        };
        Ok(url)
    }

    /// Narrows the CoinGecko response to the requested resource
    fn parse_response(&self, resource: &ResourceId, body: Value) -> Result<Value, ProviderError> {
        match resource.kind {
            ResourceKind::Price => {
                let key = &resource.key;
                let entry = body.get(key).ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("No price returned for {}", key))
                })?;
                let usd = entry.get("usd").and_then(Value::as_f64).ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("Missing usd price for {}", key))
                })?;
                Ok(json!({
                    "price_usd": usd,
                    "price_change_24h": entry.get("usd_24h_change").and_then(Value::as_f64),
                }))
            }
            ResourceKind::Metadata => {
                if body.get("id").is_none() {
                    return Err(ProviderError::InvalidResponse(format!(
                        "No metadata returned for {}",
                        resource.key
                    )));
                }
                Ok(json!({
                    "id": body["id"],
                    "symbol": body["symbol"],
                    "name": body["name"],
                    "platforms": body["platforms"],
                    "links": body["links"],
                }))
            }
            _ => {
                let coins = body.get("coins").and_then(Value::as_array).ok_or_else(|| {
                    ProviderError::InvalidResponse("No trending coins returned".to_string())
                })?;
                let items: Vec<Value> = coins
                    .iter()
                    .filter_map(|coin| coin.get("item").cloned())
                    .collect();
                Ok(Value::Array(items))
            }
        }
    }
}

#[async_trait]
impl MarketDataProvider for CoinGeckoProvider {
    async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, ProviderError> {
        let url = self.build_url(resource)?;
        let body = get_json(&self.client, &url).await?;
        let payload = self.parse_response(resource, body)?;
        Ok(MarketData::new(resource.clone(), payload, self.provider_name()))
    }

    fn provider_name(&self) -> &'static str {
        "coingecko"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CoinGeckoProvider {
        CoinGeckoProvider::with_base_url(Client::new(), "https://cg.test")
    }

    #[test]
    fn test_build_url() {
        let provider = provider();
        assert_eq!(
            provider.build_url(&ResourceId::price("solana")).unwrap(),
            "https://cg.test/simple/price?ids=solana&vs_currencies=usd&include_24hr_change=true"
        );
        assert_eq!(
            provider.build_url(&ResourceId::discovery(TRENDING_KEY)).unwrap(),
            "https://cg.test/search/trending"
        );
        assert_eq!(
            provider.build_url(&ResourceId::price("a&b")).unwrap(),
            "https://cg.test/simple/price?ids=a%26b&vs_currencies=usd&include_24hr_change=true"
        );
        assert!(provider
            .build_url(&ResourceId::metadata("../admin?x=1"))
            .unwrap()
            .starts_with("https://cg.test/coins/..%2Fadmin%3Fx%3D1?localization=false"));
        assert!(provider.build_url(&ResourceId::order_book("SOL")).is_err());
        assert!(provider.build_url(&ResourceId::discovery("gainers")).is_err());
    }

    #[test]
    fn test_parse_price() {
        let body = json!({"solana": {"usd": 142.5, "usd_24h_change": -1.25}});
        let payload = provider()
            .parse_response(&ResourceId::price("solana"), body)
            .unwrap();
        assert_eq!(payload["price_usd"], json!(142.5));
        assert_eq!(payload["price_change_24h"], json!(-1.25));

        let missing = provider().parse_response(&ResourceId::price("bitcoin"), json!({}));
        assert!(matches!(missing, Err(ProviderError::InvalidResponse(_))));
    }

    #[test]
    fn test_parse_trending() {
        let body = json!({"coins": [{"item": {"id": "pepe"}}, {"item": {"id": "bonk"}}]});
        let payload = provider()
            .parse_response(&ResourceId::discovery(TRENDING_KEY), body)
            .unwrap();
        assert_eq!(payload, json!([{"id": "pepe"}, {"id": "bonk"}]));
    }

    #[test]
    fn test_parse_metadata() {
        let body = json!({
            "id": "solana",
            "symbol": "sol",
            "name": "Solana",
            "platforms": {},
            "links": {},
            "extra": 1
        });
        let payload = provider()
            .parse_response(&ResourceId::metadata("solana"), body)
            .unwrap();
        assert_eq!(payload["name"], json!("Solana"));
        assert!(payload.get("extra").is_none());
    }
}
