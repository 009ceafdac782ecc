//! Fail-open cache adapter.
//!
//! `CacheStore` hides an unreliable remote cache behind operations that never
//! return errors: an unavailable backend looks exactly like an empty one.
//!
//! Connection lifecycle:
//!
//! ```text
//! Disconnected --first use--> Connecting --handshake ok--> Ready
//!      ^                          |                          |
//!      |                          | DNS failure              | DNS failure
//!      |                          v                          v
//!      +----cooldown elapsed---- Degraded <------------------+
//! ```
//!
//! Entering `Degraded` tears the client down at once and suppresses reconnects
//! until the cooldown elapses. Other transport errors fail the call open and
//! leave recovery to the client's own reconnect logic.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use metrics::counter;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::aside::InFlightWrites;
use super::backend::{BackendError, CacheBackend};
use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::store";

const METRIC_CACHE_HIT: &str = "parley_cache_hit_total";
const METRIC_CACHE_MISS: &str = "parley_cache_miss_total";
const METRIC_CACHE_DEGRADED: &str = "parley_cache_degraded_total";

/// Observable connection state of the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
    /// Client torn down after a name-resolution failure; cooldown pending.
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Degraded => "degraded",
        })
    }
}

#[derive(Debug, Clone, Copy)]
enum StateCell {
    Disconnected { retry_at: Option<Instant> },
    Connecting,
    Ready,
    Degraded { until: Instant },
}

struct StoreInner {
    backend: Arc<dyn CacheBackend>,
    config: CacheConfig,
    state: Mutex<StateCell>,
    in_flight: InFlightWrites,
}

/// Cheap-to-clone handle to the shared cache adapter.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.inner.backend.name())
            .field("state", &self.state())
            .finish()
    }
}

impl CacheStore {
    /// Create a store over `backend`. No connection is made until first use.
    pub fn new(backend: Arc<dyn CacheBackend>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend,
                config,
                state: Mutex::new(StateCell::Disconnected { retry_at: None }),
                in_flight: InFlightWrites::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &'static str {
        self.inner.backend.name()
    }

    /// Current connection state. A degraded store whose cooldown has elapsed
    /// reports `Disconnected`.
    pub fn state(&self) -> ConnectionState {
        let now = Instant::now();
        match *mutex_lock(&self.inner.state, SOURCE, "state") {
            StateCell::Disconnected { .. } => ConnectionState::Disconnected,
            StateCell::Connecting => ConnectionState::Connecting,
            StateCell::Ready => ConnectionState::Ready,
            StateCell::Degraded { until } if now < until => ConnectionState::Degraded,
            StateCell::Degraded { .. } => ConnectionState::Disconnected,
        }
    }

    pub(super) fn in_flight(&self) -> &InFlightWrites {
        &self.inner.in_flight
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    /// Eagerly establish the connection. Returns whether the store is ready.
    pub async fn connect(&self) -> bool {
        self.ensure_ready().await
    }

    /// Tear the connection down. The next operation reconnects.
    pub async fn close(&self) {
        *mutex_lock(&self.inner.state, SOURCE, "close") = StateCell::Disconnected { retry_at: None };
        self.inner.backend.close().await;
        info!(backend = self.backend_name(), "Cache connection closed");
    }

    /// Fetch raw bytes. Absent keys and every kind of backend trouble yield `None`.
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        if !self.ensure_ready().await {
            counter!(METRIC_CACHE_MISS, "reason" => "unavailable").increment(1);
            return None;
        }

        match self.inner.backend.get(key).await {
            Ok(Some(value)) => {
                counter!(METRIC_CACHE_HIT).increment(1);
                Some(value)
            }
            Ok(None) => {
                counter!(METRIC_CACHE_MISS, "reason" => "absent").increment(1);
                None
            }
            Err(err) => {
                self.on_backend_error(err, "get", key).await;
                counter!(METRIC_CACHE_MISS, "reason" => "error").increment(1);
                None
            }
        }
    }

    /// Store raw bytes. Returns `false` (after logging) on any failure.
    ///
    /// Supersedes any read-through write-back still pending for `key`.
    pub async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        self.inner.in_flight.forget(key);
        self.put(key, value, ttl).await
    }

    pub(super) async fn put(&self, key: &str, value: Bytes, ttl: Option<Duration>) -> bool {
        if !self.ensure_ready().await {
            debug!(cache_key = key, "Cache set skipped: backend not ready");
            return false;
        }

        match self.inner.backend.set(key, value, ttl).await {
            Ok(()) => true,
            Err(err) => {
                self.on_backend_error(err, "set", key).await;
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.inner.in_flight.forget(key);
        if !self.ensure_ready().await {
            debug!(cache_key = key, "Cache delete skipped: backend not ready");
            return false;
        }

        match self.inner.backend.delete(&[key.to_string()]).await {
            Ok(_) => true,
            Err(err) => {
                self.on_backend_error(err, "delete", key).await;
                false
            }
        }
    }

    /// Delete every key matching the glob `pattern`.
    ///
    /// Keys are gathered with cursor-based `SCAN` pages and removed with a
    /// single bulk delete. Returns the number of keys removed.
    pub async fn delete_pattern(&self, pattern: &str) -> usize {
        self.inner.in_flight.forget_matching(pattern);
        if !self.ensure_ready().await {
            debug!(pattern, "Cache pattern delete skipped: backend not ready");
            return 0;
        }

        let count = self.inner.config.scan_count_non_zero();
        let mut matched: Vec<String> = Vec::new();
        let mut cursor = 0u64;
        loop {
            match self.inner.backend.scan(cursor, pattern, count).await {
                Ok((next, keys)) => {
                    matched.extend(keys);
                    cursor = next;
                    if cursor == 0 {
                        break;
                    }
                }
                Err(err) => {
                    self.on_backend_error(err, "scan", pattern).await;
                    return 0;
                }
            }
        }

        // SCAN may report a key more than once.
        matched.sort_unstable();
        matched.dedup();
        if matched.is_empty() {
            return 0;
        }

        match self.inner.backend.delete(&matched).await {
            Ok(removed) => {
                debug!(pattern, matched = matched.len(), removed, "Cache pattern deleted");
                usize::try_from(removed).unwrap_or(usize::MAX)
            }
            Err(err) => {
                self.on_backend_error(err, "delete_pattern", pattern).await;
                0
            }
        }
    }

    /// Read and decode a JSON value. Undecodable entries count as a miss.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        self.get_json_raw(&key.to_string()).await
    }

    pub(crate) async fn get_json_raw<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = self.get(key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(cache_key = key, error = %err, "Discarding undecodable cache entry");
                None
            }
        }
    }

    /// Encode `value` as JSON and store it with the key's namespace TTL.
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> bool {
        let rendered = key.to_string();
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.set(&rendered, Bytes::from(bytes), Some(key.ttl()))
                    .await
            }
            Err(err) => {
                warn!(cache_key = %rendered, error = %err, "Failed to encode cache value");
                false
            }
        }
    }

    pub async fn delete_key(&self, key: &CacheKey) -> bool {
        self.delete(&key.to_string()).await
    }

    /// Make sure a usable connection exists, connecting if allowed.
    ///
    /// Returns `false` without touching the backend while connecting, during
    /// the DNS cooldown, or inside the reconnect backoff.
    async fn ensure_ready(&self) -> bool {
        {
            let now = Instant::now();
            let mut state = mutex_lock(&self.inner.state, SOURCE, "ensure_ready");
            match *state {
                StateCell::Ready => return true,
                StateCell::Connecting => return false,
                StateCell::Degraded { until } if now < until => return false,
                StateCell::Disconnected {
                    retry_at: Some(retry_at),
                } if now < retry_at => return false,
                StateCell::Degraded { .. } | StateCell::Disconnected { .. } => {
                    *state = StateCell::Connecting;
                }
            }
        }

        self.handshake().await
    }

    async fn handshake(&self) -> bool {
        let backend = self.backend_name();
        debug!(backend, "Cache connecting");

        let pending = HandshakeGuard {
            state: &self.inner.state,
            backoff: self.inner.config.reconnect_backoff(),
            settled: false,
        };
        let result = match timeout(self.inner.config.connect_timeout(), self.inner.backend.connect())
            .await
        {
            Ok(result) => result,
            Err(_) => Err(BackendError::transport("connection handshake timed out")),
        };
        pending.settle();

        match result {
            Ok(()) => {
                *mutex_lock(&self.inner.state, SOURCE, "handshake") = StateCell::Ready;
                info!(backend, "Cache connection ready");
                true
            }
            Err(err) if err.is_name_resolution() => {
                self.degrade(&err, "connect").await;
                false
            }
            Err(err) => {
                let retry_at = Instant::now() + self.inner.config.reconnect_backoff();
                *mutex_lock(&self.inner.state, SOURCE, "handshake") = StateCell::Disconnected {
                    retry_at: Some(retry_at),
                };
                warn!(backend, error = %err, "Cache connection failed; serving without cache");
                false
            }
        }
    }

    async fn on_backend_error(&self, err: BackendError, op: &'static str, key: &str) {
        if err.is_name_resolution() {
            self.degrade(&err, op).await;
        } else {
            warn!(op, cache_key = key, error = %err, "Cache operation failed; treating as miss");
        }
    }

    /// Enter the cooldown and tear the client down, once per outage.
    async fn degrade(&self, err: &BackendError, op: &'static str) {
        let cooldown = self.inner.config.dns_cooldown();
        let entered = {
            let now = Instant::now();
            let mut state = mutex_lock(&self.inner.state, SOURCE, "degrade");
            match *state {
                StateCell::Degraded { until } if now < until => false,
                _ => {
                    *state = StateCell::Degraded {
                        until: now + cooldown,
                    };
                    true
                }
            }
        };

        if !entered {
            return;
        }

        counter!(METRIC_CACHE_DEGRADED).increment(1);
        warn!(
            op,
            backend = self.backend_name(),
            error = %err,
            cooldown_secs = cooldown.as_secs(),
            "Cache name resolution failed; disabling cache until cooldown elapses"
        );
        self.inner.backend.close().await;
    }
}

/// Puts a handshake abandoned mid-flight (caller dropped) back into
/// `Disconnected` so a later call can retry after the backoff.
struct HandshakeGuard<'a> {
    state: &'a Mutex<StateCell>,
    backoff: Duration,
    settled: bool,
}

impl HandshakeGuard<'_> {
    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for HandshakeGuard<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = mutex_lock(self.state, SOURCE, "handshake_abandoned");
        if matches!(*state, StateCell::Connecting) {
            *state = StateCell::Disconnected {
                retry_at: Some(Instant::now() + self.backoff),
            };
            debug!("Cache handshake abandoned; reconnect rescheduled");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cache::backend::BackendErrorKind;
    use crate::cache::memory::MemoryBackend;

    fn store_with(backend: Arc<MemoryBackend>) -> CacheStore {
        CacheStore::new(backend, CacheConfig::default())
    }

    #[tokio::test]
    async fn first_use_connects_lazily() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert_eq!(backend.connect_attempts(), 0);

        assert!(store.set("k", Bytes::from_static(b"v"), None).await);
        assert_eq!(store.state(), ConnectionState::Ready);
        assert_eq!(store.get("k").await, Some(Bytes::from_static(b"v")));
        assert_eq!(backend.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dns_failure_degrades_and_suppresses_reconnects() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        assert!(store.connect().await);

        backend.fail_operations(BackendErrorKind::NameResolution);
        assert!(store.get("k").await.is_none());
        assert_eq!(store.state(), ConnectionState::Degraded);
        assert!(!backend.is_connected());

        backend.heal();
        assert!(store.get("k").await.is_none());
        assert!(!store.set("k", Bytes::from_static(b"v"), None).await);
        assert!(!store.delete("k").await);
        assert_eq!(backend.connect_attempts(), 1);

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.state(), ConnectionState::Disconnected);
        assert!(store.set("k", Bytes::from_static(b"v"), None).await);
        assert_eq!(backend.connect_attempts(), 2);
        assert_eq!(store.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn dns_failure_during_handshake_degrades() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_connect(BackendErrorKind::NameResolution);
        let store = store_with(backend.clone());

        assert!(!store.connect().await);
        assert_eq!(store.state(), ConnectionState::Degraded);
        assert!(store.get("k").await.is_none());
        assert_eq!(backend.connect_attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_skips_cooldown() {
        let backend = Arc::new(MemoryBackend::new());
        backend.fail_connect(BackendErrorKind::Transport);
        let store = store_with(backend.clone());

        assert!(!store.connect().await);
        assert_eq!(store.state(), ConnectionState::Disconnected);

        backend.heal();
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.connect().await);
        assert_eq!(backend.connect_attempts(), 2);
    }

    #[tokio::test]
    async fn transport_errors_while_ready_fail_open_without_degrading() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        assert!(store.connect().await);

        backend.fail_operations(BackendErrorKind::Transport);
        assert!(store.get("k").await.is_none());
        assert!(!store.set("k", Bytes::from_static(b"v"), None).await);
        assert_eq!(store.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn delete_pattern_accumulates_across_scan_pages() {
        let backend = Arc::new(MemoryBackend::new());
        let store = CacheStore::new(
            backend.clone(),
            CacheConfig {
                scan_count: 3,
                ..Default::default()
            },
        );

        for i in 0..10 {
            assert!(store.set(&format!("chat:messages:c1:{i}"), Bytes::from_static(b"1"), None).await);
        }
        assert!(store.set("chat:messages:c2:0", Bytes::from_static(b"1"), None).await);

        assert_eq!(store.delete_pattern("chat:messages:c1:*").await, 10);
        assert_eq!(backend.len(), 1);
        assert_eq!(store.delete_pattern("chat:messages:c1:*").await, 0);
    }

    #[tokio::test]
    async fn undecodable_json_is_a_miss() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend);
        let key = CacheKey::ChatSummary(uuid::Uuid::nil());

        assert!(store.set(&key.to_string(), Bytes::from_static(b"{not json"), None).await);
        assert!(store.get_json::<String>(&key).await.is_none());

        assert!(store.set_json(&key, "summary").await);
        assert_eq!(store.get_json::<String>(&key).await.as_deref(), Some("summary"));
    }

    #[tokio::test]
    async fn set_json_applies_namespace_ttl() {
        let backend = Arc::new(MemoryBackend::new());
        let store = store_with(backend.clone());
        let key = CacheKey::UserMemory("u1".into());

        assert!(store.set_json(&key, &vec!["fact"]).await);
        let ttl = backend.ttl_of(&key.to_string()).expect("ttl set");
        assert!(ttl <= Duration::from_secs(600) && ttl > Duration::from_secs(590));
    }
}
