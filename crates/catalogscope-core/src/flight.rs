//! Per-key single-flight coordination.
//!
//! The first caller for a key becomes the leader and installs its fetch as a
//! shared future. Callers arriving while it is outstanding attach to that future
//! instead of starting their own, and every waiter receives the same outcome.
//!
//! The map only holds weak handles. Any waiter polling the shared future drives
//! it, so a cancelled leader does not strand followers; once every waiter is gone
//! the fetch itself is dropped, which aborts the in-flight upstream call.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared, WeakShared};
use tracing::debug;

use crate::error::{CatalogError, CatalogResult};

type SharedFetch<T> = Shared<BoxFuture<'static, CatalogResult<T>>>;

/// Deduplicates concurrent fetches per key.
pub struct SingleFlight<T: Clone + Send + Sync + 'static> {
    inflight: Arc<Mutex<HashMap<String, WeakShared<BoxFuture<'static, CatalogResult<T>>>>>>,
    follower_timeout: Duration,
}

impl<T: Clone + Send + Sync + 'static> SingleFlight<T> {
    pub fn new(follower_timeout: Duration) -> Self {
        Self {
            inflight: Arc::new(Mutex::new(HashMap::new())),
            follower_timeout,
        }
    }

    /// Runs `fetch` for `key` unless a fetch for the same key is already in flight,
    /// in which case the caller waits (at most the follower timeout) for that one.
    pub async fn run<F, Fut>(&self, key: &str, fetch: F) -> CatalogResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<T>> + Send + 'static,
    {
        let (shared, leader) = self.join_or_lead(key, fetch)?;

        let outcome = if leader {
            shared.clone().await
        } else {
            debug!(key, "flight: joining in-flight fetch");
            match tokio::time::timeout(self.follower_timeout, shared.clone()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(CatalogError::timeout(format!(
                    "timed out after {:?} waiting for in-flight fetch of '{key}'",
                    self.follower_timeout
                ))),
            }
        };

        self.forget(key, &shared);
        outcome
    }

    fn join_or_lead<F, Fut>(&self, key: &str, fetch: F) -> CatalogResult<(SharedFetch<T>, bool)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CatalogResult<T>> + Send + 'static,
    {
        let mut inflight = self
            .inflight
            .lock()
            .map_err(|_| CatalogError::upstream("single-flight registry poisoned"))?;

        if let Some(existing) = inflight.get(key).and_then(WeakShared::upgrade) {
            return Ok((existing, false));
        }

        let shared = fetch().boxed().shared();
        if let Some(weak) = shared.downgrade() {
            inflight.insert(key.to_string(), weak);
        }
        Ok((shared, true))
    }

    /// Removes the registry entry if it still refers to `shared`.
    fn forget(&self, key: &str, shared: &SharedFetch<T>) {
        if let Ok(mut inflight) = self.inflight.lock() {
            let same = inflight
                .get(key)
                .and_then(WeakShared::upgrade)
                .map(|current| current.ptr_eq(shared))
                .unwrap_or(true);
            if same {
                inflight.remove(key);
            }
        }
    }

    /// Number of keys with a live in-flight fetch.
    pub fn inflight_len(&self) -> usize {
        self.inflight
            .lock()
            .map(|inflight| {
                inflight
                    .values()
                    .filter(|weak| weak.upgrade().is_some())
                    .count()
            })
            .unwrap_or(0)
    }
}
