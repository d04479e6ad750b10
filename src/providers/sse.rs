//! Server-sent events push feed connector

use crate::{
    error::ProviderError,
    providers::http::build_stream_client,
    stream::{FeedConnector, FeedStream},
};
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::stream::StreamExt;
use reqwest::Client;

/// Opens an SSE stream and yields the `data` of matching events
///
/// The subscription is encoded in the URL, so reconnecting re-subscribes.
pub struct SseConnector {
    name: &'static str,
    client: Client,
    url: String,
    event_names: Vec<String>,
}

impl SseConnector {
    pub fn new(name: &'static str, url: impl Into<String>) -> Result<Self, ProviderError> {
        Ok(Self::with_client(name, build_stream_client()?, url))
    }

    pub fn with_client(name: &'static str, client: Client, url: impl Into<String>) -> Self {
        Self {
            name,
            client,
            url: url.into(),
            event_names: Vec::new(),
        }
    }

    /// Only yields events with one of these names (all events when empty)
    pub fn events(mut self, names: &[&str]) -> Self {
        self.event_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Pyth Hermes price stream for the given feed ids
    pub fn pyth_hermes(feed_ids: &[&str]) -> Result<Self, ProviderError> {
        let query = feed_ids
            .iter()
            .map(|id| format!("ids[]={}", id))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("https://hermes.pyth.network/v2/updates/price/stream?{}", query);
        Ok(Self::new("hermes-sse", url)?.events(&["price_update", "message"]))
    }
}

fn accepts(event_names: &[String], event_name: &str) -> bool {
    event_names.is_empty() || event_names.iter().any(|n| n == event_name)
}

#[async_trait]
impl FeedConnector for SseConnector {
    async fn connect(&self) -> Result<FeedStream, ProviderError> {
        tracing::info!(feed = self.name, url = %self.url, "Connecting SSE stream");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(ProviderError::NetworkError)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError(format!("HTTP {}: {}", status, text)));
        }

        let event_names = self.event_names.clone();
        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(move |event| {
                let item = match event {
                    Ok(event) => {
                        accepts(&event_names, &event.event).then(|| Ok(event.data))
                    }
                    Err(e) => {
                        let message = format!("SSE error: {}", e);
                        Some(Err(ProviderError::InvalidResponse(message)))
                    }
                };
                futures::future::ready(item)
            });

        Ok(stream.boxed())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_filter() {
        let connector = SseConnector::with_client("test", Client::new(), "http://localhost/stream");
        assert!(accepts(&connector.event_names, "anything"));

        let connector = connector.events(&["price_update"]);
        assert!(accepts(&connector.event_names, "price_update"));
        assert!(!accepts(&connector.event_names, "heartbeat"));
    }

    #[test]
    fn test_pyth_url() {
        let connector = SseConnector::pyth_hermes(&["0xabc", "0xdef"]).unwrap();
        assert_eq!(
            connector.url,
            "https://hermes.pyth.network/v2/updates/price/stream?ids[]=0xabc&ids[]=0xdef"
        );
        assert_eq!(connector.name(), "hermes-sse");
    }
}
