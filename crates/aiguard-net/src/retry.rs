//! Exponential backoff retry scheduler.
//!
//! Computes backoff delays from a fixed ascending table and arms one-shot
//! deferred callbacks keyed by an operation identity.
//!
//! # Invariants
//!
//! - At most one pending callback per key. Arming a key that already has a
//!   pending callback cancels the older one first.
//! - A fired callback removes its own bookkeeping before it runs, so it may
//!   re-schedule the same key.
//! - `cancel`/`cancel_all` synchronously prevent any not-yet-fired callback
//!   from running. A callback that is already executing is not interrupted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aiguard_core::now_ms;
use aiguard_telemetry::Metrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{NetError, NetResult};

/// Default backoff table: 2s, 4s, 8s, 16s, 32s.
pub const DEFAULT_BACKOFF_MS: [u64; 5] = [2_000, 4_000, 8_000, 16_000, 32_000];

/// Default maximum number of retry attempts per key.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Retry scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Ascending backoff table in milliseconds. Attempts past the end of the
    /// table reuse the last entry.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: Vec<u64>,

    /// Maximum number of attempts before a key is reported terminal.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_backoff_ms() -> Vec<u64> {
    DEFAULT_BACKOFF_MS.to_vec()
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_ms: default_backoff_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Check that the backoff table is non-empty and non-decreasing.
    pub fn validate(&self) -> NetResult<()> {
        if self.backoff_ms.is_empty() {
            return Err(NetError::InvalidRetryConfig(
                "backoff_ms must not be empty".to_string(),
            ));
        }
        if self.backoff_ms.windows(2).any(|w| w[1] < w[0]) {
            return Err(NetError::InvalidRetryConfig(format!(
                "backoff_ms must be ascending, got {:?}",
                self.backoff_ms
            )));
        }
        Ok(())
    }
}

/// Observable state of a retry key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTask {
    /// Operation identity.
    pub key: String,
    /// Number of retries armed so far for this key.
    pub attempt: u32,
    /// Deadline of the pending callback (Unix milliseconds), if armed.
    pub deadline_ms: Option<i64>,
    /// Whether a callback is currently armed.
    pub pending: bool,
}

/// Result of asking the scheduler to retry a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryOutcome {
    /// A retry was armed.
    Scheduled {
        /// 1-based attempt number that was armed.
        attempt: u32,
        /// Delay until the callback fires.
        delay: Duration,
    },
    /// Attempt budget exhausted. The caller must surface a terminal failure.
    Terminal {
        /// Attempts made before giving up.
        attempts: u32,
    },
}

impl RetryOutcome {
    /// True if a retry was armed.
    pub fn is_scheduled(&self) -> bool {
        matches!(self, Self::Scheduled { .. })
    }
}

/// A pending one-shot timer.
struct Armed {
    generation: u64,
    token: CancellationToken,
    deadline_ms: i64,
}

/// Bookkeeping for one key.
#[derive(Default)]
struct Entry {
    attempt: u32,
    armed: Option<Armed>,
}

type Entries = Arc<Mutex<HashMap<String, Entry>>>;

/// Exponential backoff retry scheduler with per-key de-duplication.
///
/// Cheap to share via `Arc<RetryScheduler>`. Requires a Tokio runtime for
/// `schedule*` calls.
pub struct RetryScheduler {
    config: RetryConfig,
    entries: Entries,
    next_generation: AtomicU64,
}

impl RetryScheduler {
    /// Create a new scheduler.
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff delay for a 0-based attempt index, clamped to the last table
    /// entry.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let table = &self.config.backoff_ms;
        let ms = match table.last() {
            Some(&last) => table.get(attempt as usize).copied().unwrap_or(last),
            None => 0,
        };
        Duration::from_millis(ms)
    }

    /// Backoff delay that never undercuts a server-mandated wait.
    #[must_use]
    pub fn rate_limit_delay(&self, attempt: u32, retry_after_secs: u64) -> Duration {
        let server = Duration::from_secs(retry_after_secs);
        self.next_delay(attempt).max(server)
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    #[must_use]
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.config.max_attempts
    }

    /// Arm `callback` to run after `delay`, replacing any pending callback
    /// for `key`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn schedule<F>(&self, key: impl Into<String>, delay: Duration, callback: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let key = key.into();
        let mut entries = self.entries.lock();
        self.arm_locked(&mut entries, key, delay, callback);
    }

    /// Advance the attempt counter for `key` and arm `callback` at the
    /// standard backoff for that attempt.
    pub fn schedule_retry<F>(&self, key: impl Into<String>, callback: F) -> RetryOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_with(key.into(), None, callback)
    }

    /// Like [`schedule_retry`](Self::schedule_retry), but honours a
    /// server-mandated wait as a floor on the delay.
    pub fn schedule_rate_limited<F>(
        &self,
        key: impl Into<String>,
        retry_after_secs: u64,
        callback: F,
    ) -> RetryOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.schedule_with(key.into(), Some(retry_after_secs), callback)
    }

    fn schedule_with<F>(
        &self,
        key: String,
        retry_after_secs: Option<u64>,
        callback: F,
    ) -> RetryOutcome
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut entries = self.entries.lock();
        let attempt = entries.get(&key).map_or(0, |e| e.attempt);

        if !self.can_retry(attempt) {
            warn!(key = %key, attempts = attempt, "Retry budget exhausted");
            Metrics::retry_exhausted();
            return RetryOutcome::Terminal { attempts: attempt };
        }

        let delay = match retry_after_secs {
            Some(secs) => self.rate_limit_delay(attempt, secs),
            None => self.next_delay(attempt),
        };

        entries.entry(key.clone()).or_default().attempt = attempt + 1;
        self.arm_locked(&mut entries, key, delay, callback);

        RetryOutcome::Scheduled {
            attempt: attempt + 1,
            delay,
        }
    }

    fn arm_locked<F>(
        &self,
        entries: &mut HashMap<String, Entry>,
        key: String,
        delay: Duration,
        callback: F,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let deadline_ms = now_ms().saturating_add(delay.as_millis() as i64);

        let entry = entries.entry(key.clone()).or_default();
        if let Some(previous) = entry.armed.take() {
            previous.token.cancel();
            trace!(key = %key, "Replaced pending retry");
        }
        entry.armed = Some(Armed {
            generation,
            token: token.clone(),
            deadline_ms,
        });

        debug!(
            key = %key,
            attempt = entry.attempt,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        Metrics::retry_scheduled();

        let entries = Arc::clone(&self.entries);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = token.cancelled() => return,
            }

            // Disarm under the lock; a concurrent cancel or re-arm wins.
            let still_armed = {
                let mut entries = entries.lock();
                match entries.get_mut(&key) {
                    Some(entry)
                        if entry
                            .armed
                            .as_ref()
                            .is_some_and(|a| a.generation == generation) =>
                    {
                        entry.armed = None;
                        true
                    }
                    _ => false,
                }
            };

            if still_armed {
                trace!(key = %key, "Retry firing");
                callback.await;
            }
        });
    }

    /// Cancel the pending callback for `key` and forget its attempts.
    ///
    /// Returns true if anything was tracked for the key.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        match removed {
            Some(entry) => {
                if let Some(armed) = entry.armed {
                    armed.token.cancel();
                    debug!(key = %key, "Retry cancelled");
                }
                true
            }
            None => false,
        }
    }

    /// Success path: forget attempts for `key` and cancel anything pending.
    pub fn reset(&self, key: &str) {
        self.cancel(key);
    }

    /// Cancel every key starting with `prefix`. Returns the number removed.
    pub fn cancel_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        let keys: Vec<String> = entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(Entry {
                armed: Some(armed), ..
            }) = entries.remove(key)
            {
                armed.token.cancel();
            }
        }
        if !keys.is_empty() {
            debug!(prefix = %prefix, count = keys.len(), "Retries cancelled by prefix");
        }
        keys.len()
    }

    /// Cancel every pending callback and forget all attempts.
    pub fn cancel_all(&self) {
        let drained: Vec<Entry> = self.entries.lock().drain().map(|(_, e)| e).collect();
        for armed in drained.into_iter().filter_map(|e| e.armed) {
            armed.token.cancel();
        }
    }

    /// Attempts recorded for `key`.
    pub fn attempts(&self, key: &str) -> u32 {
        self.entries.lock().get(key).map_or(0, |e| e.attempt)
    }

    /// Observable state of `key`.
    pub fn task(&self, key: &str) -> Option<RetryTask> {
        self.entries.lock().get(key).map(|e| RetryTask {
            key: key.to_string(),
            attempt: e.attempt,
            deadline_ms: e.armed.as_ref().map(|a| a.deadline_ms),
            pending: e.armed.is_some(),
        })
    }

    /// Whether `key` has an armed callback.
    pub fn is_pending(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .is_some_and(|e| e.armed.is_some())
    }

    /// Number of armed callbacks across all keys.
    pub fn pending_count(&self) -> usize {
        self.entries
            .lock()
            .values()
            .filter(|e| e.armed.is_some())
            .count()
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_next_delay_follows_table_and_clamps() {
        let scheduler = RetryScheduler::default();

        assert_eq!(scheduler.next_delay(0), Duration::from_secs(2));
        assert_eq!(scheduler.next_delay(1), Duration::from_secs(4));
        assert_eq!(scheduler.next_delay(4), Duration::from_secs(32));
        assert_eq!(scheduler.next_delay(5), Duration::from_secs(32));
        assert_eq!(scheduler.next_delay(1_000), Duration::from_secs(32));
    }

    #[test]
    fn test_next_delay_non_decreasing() {
        let scheduler = RetryScheduler::default();
        let delays: Vec<Duration> = (0..20).map(|a| scheduler.next_delay(a)).collect();
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_rate_limit_delay_is_floor() {
        let scheduler = RetryScheduler::default();
        for attempt in 0..8 {
            for retry_after in [0, 1, 3, 10, 60, 120] {
                let delay = scheduler.rate_limit_delay(attempt, retry_after);
                assert!(delay >= scheduler.next_delay(attempt));
                assert!(delay >= Duration::from_secs(retry_after));
            }
        }
        assert_eq!(scheduler.rate_limit_delay(0, 60), Duration::from_secs(60));
        assert_eq!(scheduler.rate_limit_delay(3, 1), Duration::from_secs(16));
    }

    #[test]
    fn test_can_retry_enforces_max_attempts() {
        let scheduler = RetryScheduler::default();
        assert!(scheduler.can_retry(0));
        assert!(scheduler.can_retry(4));
        assert!(!scheduler.can_retry(5));
        assert!(!scheduler.can_retry(6));
    }

    #[test]
    fn test_config_validation() {
        assert!(RetryConfig::default().validate().is_ok());

        let empty = RetryConfig {
            backoff_ms: vec![],
            max_attempts: 3,
        };
        assert!(empty.validate().is_err());

        let descending = RetryConfig {
            backoff_ms: vec![4_000, 2_000],
            max_attempts: 3,
        };
        assert!(descending.validate().is_err());
    }

    #[test]
    fn test_config_from_toml_defaults() {
        let config: RetryConfig = toml::from_str("max_attempts = 3").unwrap();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.backoff_ms, DEFAULT_BACKOFF_MS.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reschedule_same_key_keeps_single_pending() {
        let scheduler = RetryScheduler::default();
        let fired = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&fired);
        scheduler.schedule("portfolio", Duration::from_secs(2), async move {
            first.lock().push("first");
        });
        let second = Arc::clone(&fired);
        scheduler.schedule("portfolio", Duration::from_secs(4), async move {
            second.lock().push("second");
        });

        assert_eq!(scheduler.pending_count(), 1);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(fired.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(*fired.lock(), vec!["second"]);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_firing() {
        let scheduler = RetryScheduler::default();
        let count = Arc::new(AtomicU32::new(0));

        let c = Arc::clone(&count);
        scheduler.schedule("signal:BTC", Duration::from_secs(1), async move {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert!(scheduler.cancel("signal:BTC"));
        assert!(!scheduler.cancel("signal:BTC"));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(scheduler.task("signal:BTC").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_all_and_prefix() {
        let scheduler = RetryScheduler::default();
        let count = Arc::new(AtomicU32::new(0));

        for key in ["exit:1", "exit:2", "portfolio"] {
            let c = Arc::clone(&count);
            scheduler.schedule(key, Duration::from_secs(1), async move {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(scheduler.cancel_prefix("exit:"), 2);
        assert_eq!(scheduler.pending_count(), 1);

        scheduler.cancel_all();
        scheduler.cancel_all();
        assert_eq!(scheduler.pending_count(), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_can_reschedule_itself() {
        let scheduler = Arc::new(RetryScheduler::default());
        let count = Arc::new(AtomicU32::new(0));

        fn arm(scheduler: Arc<RetryScheduler>, count: Arc<AtomicU32>) {
            let next = Arc::clone(&scheduler);
            scheduler.schedule("probe", Duration::from_secs(1), async move {
                let fired = count.fetch_add(1, Ordering::SeqCst) + 1;
                if fired < 3 {
                    arm(next, count);
                }
            });
        }

        arm(Arc::clone(&scheduler), Arc::clone(&count));

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_retry_until_terminal() {
        let scheduler = RetryScheduler::default();

        let mut delays = Vec::new();
        for _ in 0..5 {
            match scheduler.schedule_retry("fetch", async {}) {
                RetryOutcome::Scheduled { delay, .. } => delays.push(delay.as_secs()),
                RetryOutcome::Terminal { .. } => panic!("terminal too early"),
            }
        }
        assert_eq!(delays, vec![2, 4, 8, 16, 32]);
        assert_eq!(scheduler.attempts("fetch"), 5);
        assert_eq!(scheduler.pending_count(), 1);

        assert_eq!(
            scheduler.schedule_retry("fetch", async {}),
            RetryOutcome::Terminal { attempts: 5 }
        );

        scheduler.reset("fetch");
        assert_eq!(scheduler.attempts("fetch"), 0);
        assert_eq!(scheduler.pending_count(), 0);
        assert!(scheduler.schedule_retry("fetch", async {}).is_scheduled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_rate_limited_honours_server_wait() {
        let scheduler = RetryScheduler::default();

        let outcome = scheduler.schedule_rate_limited("signal:ETH", 45, async {});
        assert_eq!(
            outcome,
            RetryOutcome::Scheduled {
                attempt: 1,
                delay: Duration::from_secs(45)
            }
        );

        let task = scheduler.task("signal:ETH").unwrap();
        assert!(task.pending);
        assert_eq!(task.attempt, 1);
        assert!(task.deadline_ms.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fired_task_keeps_attempt_count() {
        let scheduler = RetryScheduler::default();

        tokio_test::assert_ok!(match scheduler.schedule_retry("fetch", async {}) {
            RetryOutcome::Scheduled { .. } => Ok(()),
            RetryOutcome::Terminal { attempts } => Err(attempts),
        });

        tokio::time::sleep(Duration::from_secs(3)).await;

        let task = scheduler.task("fetch").unwrap();
        assert!(!task.pending);
        assert_eq!(task.attempt, 1);
        assert_eq!(scheduler.next_delay(task.attempt), Duration::from_secs(4));
    }
}
