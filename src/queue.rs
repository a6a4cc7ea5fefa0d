//! # Work queue
//!
//! A rate-limited, deduplicating work queue for Secret keys.
//!
//! The queue guarantees that a key is never handed to two workers at
//! once: adding a key that is already queued is a no-op, and adding a
//! key that is currently being processed defers the re-enqueue until
//! [`WorkQueue::done`] releases it. Each key also carries a requeue
//! counter driving a per-item exponential backoff, reset by
//! [`WorkQueue::forget`] on success.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tracing::trace;

use crate::constants::{BACKOFF_BASE, BACKOFF_MAX};

/// The minimal interface needed for rate limited enqueueing.
///
/// Implemented for [`Arc<WorkQueue>`] because a delayed add holds the
/// queue alive across its backoff sleep.
pub trait RateLimiter {
    /// Enqueues a key after its per-item backoff delay.
    fn add_rate_limited(&self, key: &str);
}

#[derive(Default)]
struct State {
    queue: VecDeque<String>,
    dirty: HashSet<String>,
    processing: HashSet<String>,
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Rate limited work queue of `namespace/name` keys
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
    backoff_base: Duration,
    backoff_max: Duration,
}

impl WorkQueue {
    /// Creates a queue with the default per-item backoff
    pub fn new() -> Arc<Self> {
        Self::with_backoff(BACKOFF_BASE, BACKOFF_MAX)
    }

    /// Creates a queue with a custom per-item exponential backoff
    pub fn with_backoff(base: Duration, max: Duration) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            backoff_base: base,
            backoff_max: max,
        })
    }

    /// Enqueues a key immediately.
    ///
    /// No-op if the key is already queued or the queue is shutting
    /// down. A key that is currently being processed is marked dirty
    /// and re-enqueued when its worker calls [`WorkQueue::done`].
    pub fn add(&self, key: &str) {
        let mut state = self.state.lock().expect("work queue lock poisoned");
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_one();
    }

    /// Bumps the requeue counter for a key and returns the backoff
    /// delay to wait before adding it again.
    fn next_delay(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock().expect("work queue lock poisoned");
        if state.shutting_down {
            return None;
        }
        let failures = state.failures.entry(key.to_string()).or_insert(0);
        let exponent = (*failures).min(31);
        *failures += 1;
        Some(std::cmp::min(
            self.backoff_base.saturating_mul(1 << exponent),
            self.backoff_max,
        ))
    }

    /// Blocks until a key is available and marks it as in-process.
    ///
    /// Returns `None` once the queue has shut down and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let mut state = self.state.lock().expect("work queue lock poisoned");
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

    /// Releases the in-process mark for a key.
    ///
    /// If the key was re-added while it was being processed it becomes
    /// available to workers again.
    pub fn done(&self, key: &str) {
        let requeued = {
            let mut state = self.state.lock().expect("work queue lock poisoned");
            state.processing.remove(key);
            if state.dirty.contains(key) {
                state.queue.push_back(key.to_string());
                true
            } else {
                false
            }
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Resets the requeue counter and backoff for a key
    pub fn forget(&self, key: &str) {
        let mut state = self.state.lock().expect("work queue lock poisoned");
        state.failures.remove(key);
    }

    /// Current requeue count for a key
    pub fn num_requeues(&self, key: &str) -> u32 {
        let state = self.state.lock().expect("work queue lock poisoned");
        state.failures.get(key).copied().unwrap_or(0)
    }

    /// Stops the queue.
    ///
    /// New adds are ignored, already queued keys drain to workers, and
    /// `get` returns `None` once the queue is empty.
    pub fn shut_down(&self) {
        {
            let mut state = self.state.lock().expect("work queue lock poisoned");
            state.shutting_down = true;
        }
        self.notify.notify_waiters();
    }

    /// Number of keys waiting in the queue
    pub fn len(&self) -> usize {
        let state = self.state.lock().expect("work queue lock poisoned");
        state.queue.len()
    }

    /// True when no keys are waiting
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RateLimiter for Arc<WorkQueue> {
    fn add_rate_limited(&self, key: &str) {
        let Some(delay) = self.next_delay(key) else {
            return;
        };
        trace!(key, delay_ms = delay.as_millis() as u64, "rate limited add");
        if delay.is_zero() {
            self.add(key);
            return;
        }

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(&key);
        });
    }
}
