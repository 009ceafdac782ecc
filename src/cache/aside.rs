//! Read-through helper.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::memory::glob_match;
use super::store::CacheStore;

const SOURCE: &str = "cache::aside";

/// Write-backs spawned by [`CacheStore::get_cached`] that have not landed yet.
///
/// A reader that arrives before the detached `set` completes is served from
/// here instead of running its loader again. Explicit writes and deletes drop
/// the entry, and a dropped entry is never written.
#[derive(Debug, Default)]
pub(crate) struct InFlightWrites {
    entries: Mutex<HashMap<String, (u64, Bytes)>>,
    next_id: AtomicU64,
}

impl InFlightWrites {
    fn track(&self, key: &str, value: Bytes) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        mutex_lock(&self.entries, SOURCE, "track").insert(key.to_string(), (id, value));
        id
    }

    fn lookup(&self, key: &str) -> Option<Bytes> {
        mutex_lock(&self.entries, SOURCE, "lookup")
            .get(key)
            .map(|(_, value)| value.clone())
    }

    fn is_current(&self, key: &str, id: u64) -> bool {
        mutex_lock(&self.entries, SOURCE, "is_current")
            .get(key)
            .is_some_and(|(current, _)| *current == id)
    }

    fn finish(&self, key: &str, id: u64) {
        let mut entries = mutex_lock(&self.entries, SOURCE, "finish");
        if entries.get(key).is_some_and(|(current, _)| *current == id) {
            entries.remove(key);
        }
    }

    pub(crate) fn forget(&self, key: &str) {
        mutex_lock(&self.entries, SOURCE, "forget").remove(key);
    }

    pub(crate) fn forget_matching(&self, pattern: &str) {
        mutex_lock(&self.entries, SOURCE, "forget_matching")
            .retain(|key, _| !glob_match(pattern, key));
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }
}

impl CacheStore {
    /// Return the cached value for `key`, or run `loader` and cache its result.
    ///
    /// The write-back runs in a detached task with the key's namespace TTL, so
    /// the caller never waits on the cache. Until it lands, later calls for the
    /// same key are answered from the pending value. Loader errors are returned
    /// unchanged and nothing is cached for them.
    pub async fn get_cached<T, E, F, Fut>(&self, key: &CacheKey, loader: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let rendered = key.to_string();
        if let Some(pending) = self.in_flight().lookup(&rendered) {
            match serde_json::from_slice(&pending) {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(
                        cache_key = %rendered,
                        error = %err,
                        "Discarding undecodable pending write-back"
                    );
                    self.in_flight().forget(&rendered);
                }
            }
        }
        if let Some(hit) = self.get_json_raw::<T>(&rendered).await {
            return Ok(hit);
        }

        let value = loader().await?;

        match serde_json::to_vec(&value) {
            Ok(bytes) => self.spawn_write_back(rendered, Bytes::from(bytes), key.ttl()),
            Err(err) => {
                warn!(cache_key = %rendered, error = %err, "Loaded value not cacheable");
            }
        }

        Ok(value)
    }

    /// Fire-and-forget `set`. The outcome is only logged.
    ///
    /// Only tracked as in flight while the store is ready; an unavailable
    /// cache keeps reading through.
    pub(crate) fn spawn_write_back(&self, rendered: String, value: Bytes, ttl: Duration) {
        let id = self
            .is_ready()
            .then(|| self.in_flight().track(&rendered, value.clone()));
        let store = self.clone();
        tokio::spawn(async move {
            if id.is_some_and(|id| !store.in_flight().is_current(&rendered, id)) {
                debug!(cache_key = %rendered, "Cache write-back superseded");
                return;
            }
            if store.put(&rendered, value, Some(ttl)).await {
                debug!(cache_key = %rendered, "Cache populated after miss");
            } else {
                debug!(cache_key = %rendered, "Cache write-back skipped");
            }
            if let Some(id) = id {
                store.in_flight().finish(&rendered, id);
            }
        });
    }
}
