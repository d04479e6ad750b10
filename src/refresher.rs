//! Background refresh of hot keys with exponential-backoff retries
//!
//! Every started key owns two tasks:
//!
//! ```text
//! interval task ── tick every `interval` ──► attempt ──(failure)──┐
//!                                                                 │ retry delay
//! retry task   ◄──────────────────────────────────────────────────┘
//!              └─ sleep(delay) ──► attempt ──(failure)──► reschedule itself
//! ```
//!
//! A failure schedules one extra, faster retry after
//! `min(initial * 2^n, max)` on top of the regular cadence. After
//! `max_retries` consecutive failures no more extra retries are scheduled;
//! the key still gets its regular interval attempts. Any success resets the
//! counter. Nothing stops the two tasks from running the fetch at the same
//! time, so fetch functions must be idempotent and safe to overlap.

use crate::{config::RefreshConfig, constants::FAR_FUTURE_SECS, error::FetchError};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

type RefreshFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

/// Shared state of one refreshed key
struct RefreshState {
    key: String,
    fetch: RefreshFn,
    retry_attempts: AtomicU32,
    config: RefreshConfig,
}

impl RefreshState {
    /// Runs the fetch once, returning the delay of the extra retry to schedule
    async fn attempt(&self) -> Option<Duration> {
        match (self.fetch)().await {
            Ok(()) => {
                let previous = self.retry_attempts.swap(0, Ordering::SeqCst);
                if previous > 0 {
                    tracing::info!(
                        key = %self.key,
                        previous_failures = previous,
                        "Refresh recovered"
                    );
                } else {
                    tracing::debug!(key = %self.key, "Refreshed");
                }
                None
            }
            Err(e) => {
                let max_retries = self.config.max_retries;
                let claimed = self.retry_attempts.fetch_update(
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                    |n| (n < max_retries).then_some(n + 1),
                );
                match claimed {
                    Ok(previous) => {
                        let attempt = previous + 1;
                        let delay = self.config.backoff_delay(attempt);
                        tracing::warn!(
                            key = %self.key,
                            attempt,
                            max_retries,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Refresh failed, scheduling retry"
                        );
                        Some(delay)
                    }
                    Err(_) => {
                        tracing::warn!(
                            key = %self.key,
                            max_retries,
                            error = %e,
                            "Refresh failed, retries exhausted until next interval"
                        );
                        None
                    }
                }
            }
        }
    }
}

/// Handles of the two scheduled tasks owned by one key
struct RefreshTask {
    state: Arc<RefreshState>,
    interval_task: JoinHandle<()>,
    retry_task: JoinHandle<()>,
}

impl RefreshTask {
    fn abort(&self) {
        self.interval_task.abort();
        self.retry_task.abort();
    }
}

/// Keeps a set of keys warm by re-running their fetch on a fixed cadence
pub struct BackgroundRefresher {
    config: RefreshConfig,
    tasks: Mutex<HashMap<String, RefreshTask>>,
}

impl BackgroundRefresher {
    pub fn new(config: RefreshConfig) -> Self {
        Self {
            config,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, RefreshTask>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts refreshing `key` every `every`, running the first attempt right away
    ///
    /// Starting a key that is already running replaces its tasks.
    /// Must be called from within a tokio runtime.
    pub fn start<F, Fut, T>(&self, key: impl Into<String>, fetch: F, every: Duration)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let key = key.into();
        let fetch: RefreshFn =
            Arc::new(move || fetch().map(|result| result.map(|_| ())).boxed());
        let state = Arc::new(RefreshState {
            key: key.clone(),
            fetch,
            retry_attempts: AtomicU32::new(0),
            config: self.config.clone(),
        });

        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let retry_task = tokio::spawn(run_retries(state.clone(), retry_rx));
        let interval_task = tokio::spawn(run_interval(state.clone(), every, retry_tx));

        tracing::info!(
            key = %key,
            interval_ms = every.as_millis() as u64,
            "Starting background refresh"
        );

        let task = RefreshTask {
            state,
            interval_task,
            retry_task,
        };
        if let Some(previous) = self.lock().insert(key, task) {
            previous.abort();
        }
    }

    /// Cancels both scheduled tasks of `key`, returning whether it was running
    pub fn stop(&self, key: &str) -> bool {
        match self.lock().remove(key) {
            Some(task) => {
                task.abort();
                tracing::info!(key, "Stopped background refresh");
                true
            }
            None => false,
        }
    }

    /// Cancels every scheduled task
    pub fn stop_all(&self) {
        let tasks: Vec<(String, RefreshTask)> = self.lock().drain().collect();
        for (_, task) in &tasks {
            task.abort();
        }
        if !tasks.is_empty() {
            tracing::info!(count = tasks.len(), "Stopped all background refreshes");
        }
    }

    pub fn is_running(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    pub fn active_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Consecutive failures of `key` since its last success
    pub fn retry_attempts(&self, key: &str) -> Option<u32> {
        self.lock()
            .get(key)
            .map(|task| task.state.retry_attempts.load(Ordering::SeqCst))
    }
}

impl Drop for BackgroundRefresher {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// Regular cadence: one attempt per tick, failures hand a delay to the retry task
async fn run_interval(
    state: Arc<RefreshState>,
    every: Duration,
    retry_tx: mpsc::UnboundedSender<Duration>,
) {
    let mut ticker = interval(every.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Some(delay) = state.attempt().await {
            if retry_tx.send(delay).is_err() {
                break;
            }
        }
    }
}

/// Extra backed-off retries; a newer request replaces a pending one
async fn run_retries(state: Arc<RefreshState>, mut retry_rx: mpsc::UnboundedReceiver<Duration>) {
    let mut pending: Option<Instant> = None;
    loop {
        tokio::select! {
            request = retry_rx.recv() => match request {
                Some(delay) => pending = Some(deadline_after(delay)),
                None => break,
            },
            _ = sleep_until(pending.unwrap_or_else(Instant::now)), if pending.is_some() => {
                pending = None;
                if let Some(delay) = state.attempt().await {
                    pending = Some(deadline_after(delay));
                }
            }
        }
    }
}

/// `now + delay`, clamped for delays too large to represent as an instant
fn deadline_after(delay: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(delay)
        .unwrap_or_else(|| now + Duration::from_secs(FAR_FUTURE_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    type ScriptedFetch = Box<dyn Fn() -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

    /// Fetch function that fails `failures` times, then succeeds, recording call times
    fn scripted(failures: usize) -> (Arc<Mutex<Vec<Instant>>>, ScriptedFetch) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recorded = calls.clone();
        let fetch = move || {
            let recorded = recorded.clone();
            async move {
                let mut calls = recorded.lock().unwrap();
                calls.push(Instant::now());
                if calls.len() <= failures {
                    Err(FetchError::upstream("HTTP 503"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        };
        (calls, Box::new(fetch))
    }

    fn gaps(calls: &[Instant]) -> Vec<u64> {
        calls
            .windows(2)
            .map(|pair| (pair[1] - pair[0]).as_millis() as u64)
            .collect()
    }

    fn assert_close(actual: u64, expected: u64) {
        assert!(
            actual.abs_diff(expected) <= 50,
            "expected ~{}ms, got {}ms",
            expected,
            actual
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_delays_then_retries_stop() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls, fetch) = scripted(usize::MAX);

        refresher.start("price:solana", fetch, Duration::from_secs(600));
        sleep(Duration::from_secs(100)).await;

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 4, "initial attempt plus three retries");
        let gaps = gaps(&calls);
        assert_close(gaps[0], 2_000);
        assert_close(gaps[1], 4_000);
        assert_close(gaps[2], 8_000);
        assert_eq!(refresher.retry_attempts("price:solana"), Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_key_still_gets_interval_attempts() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls, fetch) = scripted(usize::MAX);

        refresher.start("k", fetch, Duration::from_secs(60));
        sleep(Duration::from_secs(61)).await;

        // 0s, 2s, 6s, 14s, then the 60s tick with no extra retry after it
        assert_eq!(calls.lock().unwrap().len(), 5);
        sleep(Duration::from_secs(30)).await;
        assert_eq!(calls.lock().unwrap().len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_counter() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls, fetch) = scripted(2);

        refresher.start("k", fetch, Duration::from_secs(600));
        sleep(Duration::from_secs(100)).await;

        let calls = calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        let gaps = gaps(&calls);
        assert_close(gaps[0], 2_000);
        assert_close(gaps[1], 4_000);
        assert_eq!(refresher.retry_attempts("k"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_regular_cadence() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls, fetch) = scripted(0);

        refresher.start("k", fetch, Duration::from_secs(10));
        sleep(Duration::from_secs(35)).await;

        assert_eq!(calls.lock().unwrap().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrepresentable_backoff_keeps_interval_running() {
        let refresher = BackgroundRefresher::new(RefreshConfig {
            initial_backoff_ms: u64::MAX,
            max_backoff_ms: u64::MAX,
            ..RefreshConfig::default()
        });
        let (calls, fetch) = scripted(usize::MAX);

        refresher.start("k", fetch, Duration::from_secs(10));
        sleep(Duration::from_secs(25)).await;

        // The retry never comes due; the regular ticks at 0s, 10s, 20s still run
        assert_eq!(calls.lock().unwrap().len(), 3);
        assert!(refresher.is_running("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls, fetch) = scripted(usize::MAX);

        refresher.start("k", fetch, Duration::from_secs(600));
        sleep(Duration::from_millis(500)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);

        assert!(refresher.stop("k"));
        assert!(!refresher.is_running("k"));
        assert!(!refresher.stop("k"));

        sleep(Duration::from_secs(1_000)).await;
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_and_drop_leave_no_tasks() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (calls_a, fetch_a) = scripted(0);
        let (calls_b, fetch_b) = scripted(usize::MAX);

        refresher.start("a", fetch_a, Duration::from_secs(5));
        refresher.start("b", fetch_b, Duration::from_secs(5));
        assert_eq!(refresher.active_keys(), vec!["a".to_string(), "b".to_string()]);
        sleep(Duration::from_millis(100)).await;

        refresher.stop_all();
        assert!(refresher.active_keys().is_empty());
        sleep(Duration::from_secs(60)).await;
        assert_eq!(calls_a.lock().unwrap().len(), 1);
        assert_eq!(calls_b.lock().unwrap().len(), 1);

        let (calls_c, fetch_c) = scripted(0);
        refresher.start("c", fetch_c, Duration::from_secs(5));
        sleep(Duration::from_millis(100)).await;
        drop(refresher);
        sleep(Duration::from_secs(60)).await;
        assert_eq!(calls_c.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_tasks() {
        let refresher = BackgroundRefresher::new(RefreshConfig::default());
        let (first, fetch_first) = scripted(0);
        let (second, fetch_second) = scripted(0);

        refresher.start("k", fetch_first, Duration::from_secs(10));
        sleep(Duration::from_millis(100)).await;
        refresher.start("k", fetch_second, Duration::from_secs(10));
        sleep(Duration::from_secs(25)).await;

        assert_eq!(first.lock().unwrap().len(), 1);
        assert_eq!(second.lock().unwrap().len(), 3);
        assert_eq!(refresher.active_keys(), vec!["k".to_string()]);
    }
}
