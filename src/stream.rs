//! Long-lived push feed subscription with a bounded in-memory event buffer
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected
//!      ▲               │              │
//!      └── fixed delay ┴── error ─────┴── close / error
//! ```
//!
//! Connection errors, clean closes, a connect that misses its deadline and a
//! connection that stays silent past the idle timeout all take the same path:
//! wait the fixed reconnect delay, then connect again. The delay does not grow, so recovery
//! is quick, at the price of retrying a dead endpoint every few seconds.
//! Only [`StreamAggregator::stop`] (or dropping the aggregator) ends the loop.

use crate::{
    config::StreamConfig,
    error::ProviderError,
    types::{ConnectionState, StreamEvent},
};
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;

/// Raw text messages from one live connection
pub type FeedStream = BoxStream<'static, Result<String, ProviderError>>;

/// Opens connections to a push feed
///
/// Implementations (re)issue their subscription on every successful
/// connect, so a reconnect resumes the same feed.
#[async_trait]
pub trait FeedConnector: Send + Sync {
    async fn connect(&self) -> Result<FeedStream, ProviderError>;

    fn name(&self) -> &'static str;
}

/// Fixed-capacity, insertion-ordered event buffer (oldest evicted first)
#[derive(Debug)]
pub struct StreamBuffer {
    events: VecDeque<StreamEvent>,
    max_size: usize,
}

impl StreamBuffer {
    pub fn new(max_size: usize) -> Self {
        let max_size = max_size.max(1);
        Self {
            events: VecDeque::with_capacity(max_size),
            max_size,
        }
    }

    pub fn push(&mut self, event: StreamEvent) {
        if self.events.len() == self.max_size {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Up to `limit` most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<StreamEvent> {
        self.events.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

/// State shared between the aggregator handle and its connection task
struct StreamShared {
    name: &'static str,
    buffer: RwLock<StreamBuffer>,
    matcher: Option<(String, serde_json::Value)>,
    state: watch::Sender<ConnectionState>,
    /// Bumped by every stop; a task only writes state for the epoch it was started in
    epoch: Mutex<u64>,
}

impl StreamShared {
    fn lock_epoch(&self) -> MutexGuard<'_, u64> {
        self.epoch.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current_epoch(&self) -> u64 {
        *self.lock_epoch()
    }

    /// Publishes `state` unless the task of `epoch` has been stopped
    fn set_state(&self, epoch: u64, state: ConnectionState) -> bool {
        let current = self.lock_epoch();
        if *current != epoch {
            return false;
        }
        self.state.send_replace(state);
        true
    }

    /// Invalidates the running task's epoch and publishes `Disconnected`
    fn retire(&self) {
        let mut current = self.lock_epoch();
        *current += 1;
        self.state.send_replace(ConnectionState::Disconnected);
    }

    /// Parses one raw message; malformed or non-matching messages are dropped
    fn ingest(&self, raw: &str) -> bool {
        let payload: serde_json::Value = match serde_json::from_str(raw) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(feed = self.name, error = %e, "Dropping malformed stream message");
                return false;
            }
        };

        if let Some((field, expected)) = &self.matcher {
            if payload.get(field) != Some(expected) {
                tracing::trace!(feed = self.name, "Ignoring message of another shape");
                return false;
            }
        }

        self.buffer
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(StreamEvent::new(payload));
        true
    }
}

/// Maintains one subscription and keeps the most recent events for pull reads
pub struct StreamAggregator {
    connector: Arc<dyn FeedConnector>,
    config: StreamConfig,
    shared: Arc<StreamShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamAggregator {
    pub fn new(connector: Arc<dyn FeedConnector>, config: StreamConfig) -> Self {
        let matcher = match (&config.match_field, &config.match_value) {
            (Some(field), Some(value)) => Some((field.clone(), value.clone())),
            _ => None,
        };
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(StreamShared {
            name: connector.name(),
            buffer: RwLock::new(StreamBuffer::new(config.buffer_size)),
            matcher,
            state,
            epoch: Mutex::new(0),
        });
        Self {
            connector,
            config,
            shared,
            task: Mutex::new(None),
        }
    }

    /// Spawns the connection task; a second call while running is a no-op
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        tracing::info!(feed = self.shared.name, "Starting stream aggregator");
        *task = Some(tokio::spawn(run_connection(
            self.connector.clone(),
            self.shared.clone(),
            self.config.clone(),
            self.shared.current_epoch(),
        )));
    }

    /// Tears down the connection and any pending reconnect
    pub fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.shared.retire();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!(feed = self.shared.name, "Stopped stream aggregator");
        }
    }

    /// Snapshot of up to `limit` most recent events, newest first
    pub fn recent(&self, limit: usize) -> Vec<StreamEvent> {
        self.shared
            .buffer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .recent(limit)
    }

    pub fn len(&self) -> usize {
        self.shared
            .buffer
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Watch channel following every state transition
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn name(&self) -> &'static str {
        self.shared.name
    }
}

impl Drop for StreamAggregator {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_connection(
    connector: Arc<dyn FeedConnector>,
    shared: Arc<StreamShared>,
    config: StreamConfig,
    epoch: u64,
) {
    let reconnect_delay = config.reconnect_delay();
    let connect_timeout = config.connect_timeout();
    let idle_timeout = config.idle_timeout();
    loop {
        if !shared.set_state(epoch, ConnectionState::Connecting) {
            return;
        }
        match timeout(connect_timeout, connector.connect()).await {
            Ok(Ok(messages)) => {
                if !shared.set_state(epoch, ConnectionState::Connected) {
                    return;
                }
                tracing::info!(feed = shared.name, "Stream connected");
                let accepted = read_messages(&shared, messages, idle_timeout).await;
                tracing::info!(feed = shared.name, accepted, "Stream disconnected");
            }
            Ok(Err(e)) => {
                tracing::warn!(feed = shared.name, error = %e, "Stream connect failed");
            }
            Err(_) => {
                tracing::warn!(
                    feed = shared.name,
                    timeout_ms = connect_timeout.as_millis() as u64,
                    "Stream connect timed out"
                );
            }
        }

        if !shared.set_state(epoch, ConnectionState::Disconnected) {
            return;
        }
        tracing::info!(
            feed = shared.name,
            reconnect_in_ms = reconnect_delay.as_millis() as u64,
            "Reconnecting stream"
        );
        tokio::time::sleep(reconnect_delay).await;
    }
}

/// Drains one connection until it closes, errors or goes idle; returns accepted events
async fn read_messages(shared: &StreamShared, mut messages: FeedStream, idle: Duration) -> u64 {
    let mut accepted = 0u64;
    loop {
        match timeout(idle, messages.next()).await {
            Ok(Some(Ok(raw))) => {
                if shared.ingest(&raw) {
                    accepted += 1;
                }
            }
            Ok(Some(Err(e))) => {
                tracing::warn!(feed = shared.name, error = %e, "Stream error");
                return accepted;
            }
            Ok(None) => return accepted,
            Err(_) => {
                tracing::warn!(
                    feed = shared.name,
                    idle_ms = idle.as_millis() as u64,
                    "Stream idle, dropping connection"
                );
                return accepted;
            }
        }
    }
}
