//! WebSocket push feed connector

use crate::{
    error::ProviderError,
    stream::{FeedConnector, FeedStream},
};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Connects to a WebSocket endpoint and sends the subscription messages
/// after every handshake
///
/// Text frames (and UTF-8 binary frames) are yielded as raw messages; a close
/// frame ends the stream. Pings are answered by the underlying socket while
/// it is being read.
pub struct WebSocketConnector {
    name: &'static str,
    url: String,
    subscriptions: Vec<serde_json::Value>,
}

impl WebSocketConnector {
    pub fn new(name: &'static str, url: impl Into<String>) -> Self {
        Self {
            name,
            url: url.into(),
            subscriptions: Vec::new(),
        }
    }

    /// Adds a message to send on every (re)connect
    pub fn subscribe(mut self, message: serde_json::Value) -> Self {
        self.subscriptions.push(message);
        self
    }

    /// Hyperliquid trades feed for one coin
    pub fn hyperliquid_trades(coin: &str) -> Self {
        Self::new("hyperliquid-ws", "wss://api.hyperliquid.xyz/ws").subscribe(serde_json::json!({
            "method": "subscribe",
            "subscription": { "type": "trades", "coin": coin },
        }))
    }
}

#[async_trait]
impl FeedConnector for WebSocketConnector {
    async fn connect(&self) -> Result<FeedStream, ProviderError> {
        tracing::info!(feed = self.name, url = %self.url, "Connecting WebSocket");
        let (socket, _response) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ProviderError::ApiError(format!("WebSocket connect failed: {}", e)))?;

        let (mut sink, stream) = socket.split();
        for subscription in &self.subscriptions {
            sink.send(Message::Text(subscription.to_string()))
                .await
                .map_err(|e| {
                    ProviderError::ApiError(format!("WebSocket subscribe failed: {}", e))
                })?;
        }

        // The sink travels with the stream so the socket lives as long as the reader
        let frames = futures::stream::unfold((stream, sink), |(mut stream, sink)| async move {
            loop {
                match stream.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text), (stream, sink))),
                    Ok(Message::Binary(bytes)) => {
                        if let Ok(text) = String::from_utf8(bytes) {
                            return Some((Ok(text), (stream, sink)));
                        }
                    }
                    Ok(Message::Close(_)) => return None,
                    Ok(_) => {}
                    Err(e) => {
                        let err = ProviderError::ApiError(format!("WebSocket error: {}", e));
                        return Some((Err(err), (stream, sink)));
                    }
                }
            }
        });

        Ok(frames.boxed())
    }

    fn name(&self) -> &'static str {
        self.name
    }
}
