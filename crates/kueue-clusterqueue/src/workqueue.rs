//! Keyed reconcile work queue
//!
//! Guarantees:
//! - a key is queued at most once, however many times it is added
//! - a key handed to a worker is not handed to another until `done`
//! - a key added while being processed is queued again on `done`
//! - `add_after` keeps the earliest pending deadline per key, so a burst of
//!   delayed adds collapses into one
//!
//! Failed keys are retried with per-key exponential backoff.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// First retry delay after a failed reconcile
const BACKOFF_BASE: Duration = Duration::from_millis(5);

/// Upper bound for the retry delay
const BACKOFF_MAX: Duration = Duration::from_secs(1000);

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    waiting: HashMap<String, Instant>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Deduplicating, delay-capable queue of reconcile keys
#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    /// Create an empty queue
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a key now
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock();
        if state.shutting_down || !state.dirty.insert(key.to_string()) {
            return;
        }
        // Re-queued by `done` once the current worker finishes
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Queue a key once `delay` has elapsed.
    ///
    /// If the key is already waiting with an earlier or equal deadline the
    /// call is absorbed.
    pub fn add_after(self: &Arc<Self>, key: &str, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let deadline = Instant::now() + delay;
        {
            let mut state = self.state.lock();
            if state.shutting_down {
                return;
            }
            match state.waiting.get(key) {
                Some(existing) if *existing <= deadline => return,
                _ => {
                    state.waiting.insert(key.to_string(), deadline);
                }
            }
        }

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let ours = {
                let mut state = queue.state.lock();
                if state.waiting.get(&key) == Some(&deadline) {
                    state.waiting.remove(&key);
                    true
                } else {
                    false
                }
            };
            if ours {
                queue.add(&key);
            }
        });
    }

    /// Queue a key after its backoff delay, doubling the delay for the next failure
    pub fn add_rate_limited(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut state = self.state.lock();
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = backoff_delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
    }

    /// Reset the backoff of a key
    pub fn forget(&self, key: &str) {
        self.state.lock().failures.remove(key);
    }

    /// Number of failures recorded for a key since it was last forgotten
    pub fn failures(&self, key: &str) -> u32 {
        self.state.lock().failures.get(key).copied().unwrap_or(0)
    }

    /// Wait for the next key; `None` once the queue is shut down
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock();
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark a key as finished, re-queueing it if it was added meanwhile
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.state.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether no key is ready to be handed out
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn backoff_delay(failures: u32) -> Duration {
    BACKOFF_BASE
        .checked_mul(2u32.saturating_pow(failures))
        .map_or(BACKOFF_MAX, |d| d.min(BACKOFF_MAX))
}
