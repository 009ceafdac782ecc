//! Cache backend abstraction.
//!
//! `CacheStore` talks to the remote cache only through this trait, so tests
//! and local development can substitute [`MemoryBackend`](super::MemoryBackend).

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// How a backend failure should be treated by the degradation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// The backend host name could not be resolved. Triggers the cooldown.
    NameResolution,
    /// Connection refused, reset, timed out, or not yet established.
    Transport,
    /// The backend answered with something unexpected.
    Protocol,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendErrorKind::NameResolution => "name resolution",
            BackendErrorKind::Transport => "transport",
            BackendErrorKind::Protocol => "protocol",
        })
    }
}

#[derive(Debug, Clone, Error)]
#[error("cache backend {kind} error: {message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn name_resolution(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::NameResolution, message)
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Transport, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Protocol, message)
    }

    pub fn is_name_resolution(&self) -> bool {
        self.kind == BackendErrorKind::NameResolution
    }
}

/// String-keyed byte store with TTLs and cursor-based key scanning.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Establish (or re-establish) the client connection.
    async fn connect(&self) -> Result<(), BackendError>;

    /// Tear the client down. Subsequent operations fail until `connect` succeeds.
    async fn close(&self);

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError>;

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>)
    -> Result<(), BackendError>;

    /// Delete `keys` in one round trip, returning how many existed.
    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError>;

    /// One `SCAN` page: returns the next cursor (`0` when done) and the keys found.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError>;
}
