//! Write-behind persistence.
//!
//! New chats and messages are written to the cache synchronously and
//! persisted by a background worker that retries transient failures.
//!
//! ## Configuration
//!
//! ```toml
//! [write_behind]
//! max_retries = 3
//! drain_delay_ms = 100
//! ```

mod config;
mod intent;
mod queue;
mod service;

pub use config::WriteBehindConfig;
pub use intent::{
    AttemptOutcome, DropReason, IntentKind, IntentPayload, IntentState, WriteIntent,
};
pub use queue::WriteBehindQueue;
pub use service::{ChatWithMessage, WriteBehindService};
