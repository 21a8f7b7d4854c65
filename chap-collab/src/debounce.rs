//! Latest-wins delayed tasks, one pending task per key.
//!
//! Every [`Debouncer::schedule`] call for a key aborts the task pending for
//! that key and starts a fresh delay, so only the last call within a quiet
//! window runs. After [`Debouncer::shutdown`] no task runs, including one
//! whose timer has already fired.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Default quiet window before a save runs.
pub const DEFAULT_SAVE_DELAY: Duration = Duration::from_millis(1000);

struct PendingTask {
    generation: u64,
    handle: JoinHandle<()>,
}

pub struct Debouncer<K> {
    delay: Duration,
    pending: Arc<Mutex<HashMap<K, PendingTask>>>,
    generation: AtomicU64,
    closed: Arc<AtomicBool>,
}

impl<K> Debouncer<K>
where
    K: Eq + Hash + Clone + Send + 'static,
{
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: AtomicU64::new(0),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Schedule `task` to run after the delay, replacing any pending task
    /// for `key`. Must be called from within a tokio runtime.
    ///
    /// Returns `false` if the debouncer has been shut down.
    pub fn schedule<F>(&self, key: K, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let delay = self.delay;
        let pending = self.pending.clone();
        let closed = self.closed.clone();
        let task_key = key.clone();

        // Hold the map lock across spawn + insert so the task cannot look
        // itself up before it is registered.
        let mut map = self.pending.lock();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                let mut map = pending.lock();
                match map.get(&task_key) {
                    Some(entry) if entry.generation == generation => {
                        map.remove(&task_key);
                    }
                    _ => return,
                }
            }
            if closed.load(Ordering::Acquire) {
                return;
            }
            task.await;
        });

        if let Some(previous) = map.insert(key, PendingTask { generation, handle }) {
            previous.handle.abort();
        }
        true
    }

    /// Drop the pending task for `key`, if any.
    pub fn cancel(&self, key: &K) -> bool {
        match self.pending.lock().remove(key) {
            Some(task) => {
                task.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending task and refuse new ones.
    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        for (_, task) in self.pending.lock().drain() {
            task.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        self.pending.lock().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl<K> Drop for Debouncer<K> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
        for (_, task) in self.pending.lock().drain() {
            task.handle.abort();
        }
    }
}
