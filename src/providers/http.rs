//! Generic JSON-over-HTTP provider and the request helpers shared by the
//! concrete providers

use crate::{
    constants::{REQUEST_TIMEOUT_MS, USER_AGENT},
    error::ProviderError,
    provider::MarketDataProvider,
    types::{MarketData, ResourceId, ResourceKind},
};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// Builds the HTTP client every provider uses
///
/// The client-side timeout is a backstop; the per-call deadline is enforced
/// by [`crate::client::Client`].
pub fn build_http_client() -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(Duration::from_millis(REQUEST_TIMEOUT_MS * 2))
        .user_agent(USER_AGENT)
        .build()
        .map_err(ProviderError::NetworkError)
}

/// Builds a client for long-lived streaming responses (no overall timeout)
pub fn build_stream_client() -> Result<Client, ProviderError> {
    Client::builder()
        .connect_timeout(Duration::from_millis(REQUEST_TIMEOUT_MS))
        .user_agent(USER_AGENT)
        .build()
        .map_err(ProviderError::NetworkError)
}

/// GETs `url` and parses the body as JSON
pub(crate) async fn get_json(client: &Client, url: &str) -> Result<Value, ProviderError> {
    tracing::debug!(url, "GET");
    let response = client.get(url).send().await.map_err(ProviderError::NetworkError)?;
    read_json(response).await
}

/// POSTs `body` as JSON to `url` and parses the body as JSON
pub(crate) async fn post_json<B: Serialize + ?Sized>(
    client: &Client,
    url: &str,
    body: &B,
) -> Result<Value, ProviderError> {
    tracing::debug!(url, "POST");
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(ProviderError::NetworkError)?;
    read_json(response).await
}

async fn read_json(response: Response) -> Result<Value, ProviderError> {
    // Check for rate limiting
    if response.status().as_u16() == 429 {
        return Err(ProviderError::RateLimitExceeded);
    }

    // Check for other errors
    if !response.status().is_success() {
        return Err(ProviderError::ApiError(format!(
            "HTTP {}: {}",
            response.status(),
            response.text().await.unwrap_or_default()
        )));
    }

    let response_text = response.text().await.map_err(ProviderError::NetworkError)?;
    parse_json(&response_text)
}

pub(crate) fn parse_json(text: &str) -> Result<Value, ProviderError> {
    serde_json::from_str(text).map_err(|e| {
        ProviderError::InvalidResponse(format!(
            "Failed to parse response: {}. Response: {}",
            e,
            truncate(text, 200)
        ))
    })
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// How to reach one resource kind: a URL template and an optional JSON
/// pointer narrowing the response. Both may contain a `{key}` placeholder,
/// filled with the key percent-encoded (URL) or pointer-escaped (pointer).
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub url_template: String,
    pub pointer_template: Option<String>,
}

impl Endpoint {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
            pointer_template: None,
        }
    }

    pub fn with_pointer(mut self, pointer_template: impl Into<String>) -> Self {
        self.pointer_template = Some(pointer_template.into());
        self
    }

    fn url(&self, key: &str) -> String {
        self.url_template.replace("{key}", &urlencoding::encode(key))
    }

    fn narrow(&self, key: &str, body: Value) -> Result<Value, ProviderError> {
        match &self.pointer_template {
            None => Ok(body),
            Some(template) => {
                let pointer = template.replace("{key}", &escape_pointer_token(key));
                body.pointer(&pointer).cloned().ok_or_else(|| {
                    ProviderError::InvalidResponse(format!("No value at {} in response", pointer))
                })
            }
        }
    }
}

/// Escapes `~` and `/` inside a key used as a JSON pointer token (RFC 6901)
fn escape_pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

/// Provider for any upstream that answers one JSON document per resource
pub struct HttpJsonProvider {
    name: &'static str,
    client: Client,
    endpoints: HashMap<ResourceKind, Endpoint>,
}

impl HttpJsonProvider {
    pub fn new(name: &'static str) -> Result<Self, ProviderError> {
        Ok(Self::with_client(name, build_http_client()?))
    }

    pub fn with_client(name: &'static str, client: Client) -> Self {
        Self {
            name,
            client,
            endpoints: HashMap::new(),
        }
    }

    /// Registers the endpoint serving `kind`
    pub fn endpoint(mut self, kind: ResourceKind, endpoint: Endpoint) -> Self {
        self.endpoints.insert(kind, endpoint);
        self
    }
}

#[async_trait]
impl MarketDataProvider for HttpJsonProvider {
    async fn fetch(&self, resource: &ResourceId) -> Result<MarketData, ProviderError> {
        let endpoint = self
            .endpoints
            .get(&resource.kind)
            .ok_or_else(|| ProviderError::UnsupportedResource(resource.to_string()))?;

        let body = get_json(&self.client, &endpoint.url(&resource.key)).await?;
        let payload = endpoint.narrow(&resource.key, body)?;
        Ok(MarketData::new(resource.clone(), payload, self.name))
    }

    fn provider_name(&self) -> &'static str {
        self.name
    }
}
