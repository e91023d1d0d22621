//! In-flight request deduplication.
//!
//! [`DedupRegistry`] memoizes one outstanding future per key. The first
//! caller for a key starts the work; every concurrent caller with the same
//! key awaits the same shared future and observes the same outcome. The
//! entry is removed as soon as the work finishes, successfully or not, so
//! a later call with the same key starts fresh.
//!
//! The lock only guards insert/lookup/remove of keys. It is never held
//! across the awaited work.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};

/// The leading task for a key panicked or was aborted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("In-flight work for key {key} was aborted: {reason}")]
pub struct DedupAborted {
    pub key: String,
    pub reason: String,
}

type SharedOutcome<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;

/// Process-local registry of in-flight work keyed by string.
pub struct DedupRegistry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inflight: Arc<Mutex<HashMap<String, SharedOutcome<T, E>>>>,
}

impl<T, E> Default for DedupRegistry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<T, E> DedupRegistry<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<DedupAborted> + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `start()` for `key`, or join the call already in flight.
    ///
    /// `start` is only invoked when no entry exists. The work runs on its
    /// own task, so it completes and releases the key even if every caller
    /// is dropped.
    pub async fn run_or_join<F, Fut>(&self, key: &str, start: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let shared = {
            let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
            match inflight.get(key) {
                Some(existing) => {
                    tracing::debug!(key, "Joining in-flight work");
                    existing.clone()
                }
                None => {
                    let shared = self.spawn_leader(key.to_string(), start());
                    inflight.insert(key.to_string(), shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    /// Number of keys with work in flight.
    pub fn in_flight_count(&self) -> usize {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_in_flight(&self, key: &str) -> bool {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn spawn_leader<Fut>(&self, key: String, work: Fut) -> SharedOutcome<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let release = Release {
            inflight: Arc::clone(&self.inflight),
            key: key.clone(),
        };
        // The caller inserts the entry while still holding the lock, so the
        // release can never run before the entry exists.
        let handle = tokio::spawn(async move {
            let _release = release;
            work.await
        });

        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(E::from(DedupAborted {
                    key,
                    reason: join_err.to_string(),
                })),
            }
        }
        .boxed()
        .shared()
    }
}

/// Removes a key when the leading task finishes or unwinds.
struct Release<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    inflight: Arc<Mutex<HashMap<String, SharedOutcome<T, E>>>>,
    key: String,
}

impl<T, E> Drop for Release<T, E>
where
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
