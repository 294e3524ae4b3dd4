//! Per-key debounce timers.
//!
//! [`DebounceScheduler::arm`] (re)starts a quiet period for a key. When the
//! period elapses with no further `arm` for that key, the callback runs
//! once. Re-arming aborts the previous timer task; each timer also carries a
//! generation number so a task that already woke up but lost the race to a
//! newer `arm` exits without running its callback.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Identifies one armed timer. Returned by `arm` and passed to the callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    generation: u64,
}

impl TimerHandle {
    pub fn generation(self) -> u64 {
        self.generation
    }
}

struct PendingTimer {
    handle: TimerHandle,
    task: JoinHandle<()>,
}

type TimerTable = Arc<Mutex<HashMap<String, PendingTimer>>>;

/// Debounce timers keyed by string (photo group id).
pub struct DebounceScheduler {
    timers: TimerTable,
    next_generation: AtomicU64,
}

impl DebounceScheduler {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Schedule `callback(key, handle)` after `delay`, cancelling any timer
    /// already pending for `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm<F, Fut>(&self, key: &str, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce(String, TimerHandle) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = TimerHandle {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
        };

        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);

        let table = Arc::clone(&self.timers);
        let owned_key = key.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let still_current = {
                let mut timers = table.lock().unwrap_or_else(PoisonError::into_inner);
                match timers.get(&owned_key) {
                    Some(pending) if pending.handle == handle => {
                        timers.remove(&owned_key);
                        true
                    }
                    _ => false,
                }
            };

            if still_current {
                debug!(key = %owned_key, generation = handle.generation, "Debounce timer fired");
                callback(owned_key, handle).await;
            }
        });

        if let Some(previous) = timers.insert(key.to_string(), PendingTimer { handle, task }) {
            previous.task.abort();
            debug!(
                key = %key,
                superseded = previous.handle.generation,
                generation = handle.generation,
                "Debounce timer re-armed"
            );
        }

        handle
    }

    /// Cancel the pending timer for `key`. Returns whether one was pending.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self
            .timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        match removed {
            Some(pending) => {
                pending.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_armed(&self, key: &str) -> bool {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.timers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Abort every pending timer.
    pub fn cancel_all(&self) {
        let mut timers = self.timers.lock().unwrap_or_else(PoisonError::into_inner);
        for (_, pending) in timers.drain() {
            pending.task.abort();
        }
    }
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DebounceScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
