//! Work queue implementation
//!
//! Bookkeeping per key:
//! - `dirty`: the key needs a reconcile (it is queued, or it changed while in flight)
//! - `processing`: a worker currently holds the key
//! - `failures`: consecutive failures since the last `forget`
//!
//! A key is pushed onto `queue` only when it is dirty and not processing, so the
//! same key can never be handed to two workers at once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use kube::{Resource, ResourceExt};
use tokio::sync::Notify;
use tracing::debug;

use super::backoff::ExponentialBackoff;

/// Identity of a managed resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a namespaced object; objects without a namespace fall into `default`
    pub fn from_object<K: Resource>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_else(|| "default".to_string()),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<ObjectKey>,
    dirty: HashSet<ObjectKey>,
    processing: HashSet<ObjectKey>,
    failures: HashMap<ObjectKey, u32>,
    shutting_down: bool,
}

struct Inner {
    state: Mutex<State>,
    notify: Notify,
    backoff: ExponentialBackoff,
}

/// Cloneable handle to a shared work queue
#[derive(Clone)]
pub struct WorkQueue {
    inner: Arc<Inner>,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new(ExponentialBackoff::default())
    }
}

impl WorkQueue {
    /// Create a queue with the given per-key failure backoff
    pub fn new(backoff: ExponentialBackoff) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                notify: Notify::new(),
                backoff,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // State is only mutated under simple set/queue operations that cannot leave it torn
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark a key as needing a reconcile.
    ///
    /// Adding a key that is already queued is a no-op. Adding a key that is in
    /// flight marks it dirty; it is requeued when the current holder calls `done`.
    pub fn add(&self, key: ObjectKey) {
        let mut state = self.state();
        if state.shutting_down {
            return;
        }
        if !state.dirty.insert(key.clone()) {
            return;
        }
        if state.processing.contains(&key) {
            debug!(key = %key, "Key changed while in flight, will requeue when done");
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Wait for the next ready key.
    ///
    /// Returns `None` once the queue is shutting down. The returned key is held
    /// in flight until `done` is called for it.
    pub async fn get(&self) -> Option<ObjectKey> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
            }

            notified.await;
        }
    }

    /// Release the in-flight hold on a key, requeueing it if it changed meanwhile
    pub fn done(&self, key: &ObjectKey) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) && !state.shutting_down {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Reset the failure count of a key after a successful reconcile
    pub fn forget(&self, key: &ObjectKey) {
        self.state().failures.remove(key);
    }

    /// Requeue a key after its backoff delay and bump its failure count
    pub fn add_rate_limited(&self, key: ObjectKey) -> Duration {
        let delay = {
            let mut state = self.state();
            let failures = state.failures.entry(key.clone()).or_insert(0);
            let delay = self.inner.backoff.delay(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        self.add_after(key, delay);
        delay
    }

    /// Add a key once `delay` has elapsed
    pub fn add_after(&self, key: ObjectKey, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        if self.is_shutting_down() {
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Consecutive failures recorded for a key
    pub fn num_requeues(&self, key: &ObjectKey) -> u32 {
        self.state().failures.get(key).copied().unwrap_or(0)
    }

    /// Number of keys ready to be handed out
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of keys currently held by workers
    pub fn in_flight(&self) -> usize {
        self.state().processing.len()
    }

    /// Stop handing out keys and wake every waiting worker
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }
}
