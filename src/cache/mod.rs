//! Parley cache layer
//!
//! A fail-open adapter over a remote key/value cache plus the primitives built
//! on it:
//!
//! - **[`CacheStore`]**: `get`/`set`/`delete`/`delete_pattern` that never
//!   error, with a connection state machine that backs off after DNS failures
//! - **[`CacheStore::get_cached`]**: read-through with detached write-back
//! - **[`CacheInvalidator`]**: maps domain changes to key and pattern deletes
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! url = "redis://127.0.0.1:6379"   # omit for the in-process backend
//! connect_timeout_ms = 2000
//! reconnect_backoff_ms = 1000
//! dns_cooldown_secs = 300
//! scan_count = 100
//! message_page_limit = 50
//! chat_list_limit = 50
//! ```

mod aside;
mod backend;
mod config;
mod events;
mod invalidator;
mod keys;
mod lock;
mod memory;
mod planner;
mod store;

pub use backend::{BackendError, BackendErrorKind, CacheBackend};
pub use config::CacheConfig;
pub use events::InvalidationEvent;
pub use invalidator::{CacheInvalidator, InvalidationReport};
pub use keys::{CacheKey, KeyNamespace, KeyPattern, StatsRange, escape_glob};
pub(crate) use lock::mutex_lock;
pub use memory::{MemoryBackend, glob_match};
pub use planner::InvalidationPlan;
pub use store::{CacheStore, ConnectionState};
