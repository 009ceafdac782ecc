//! In-process cache backend.
//!
//! Used when no Redis URL is configured and as the substitute backend in
//! tests. Mirrors the Redis semantics the store relies on: TTL expiry, glob
//! `SCAN MATCH` paging, and multi-key `DEL`. Failures can be injected to drive
//! the degradation state machine.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Instant;

use super::backend::{BackendError, BackendErrorKind, CacheBackend};
use super::lock::mutex_lock;

const SOURCE: &str = "cache::memory";

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Bytes,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, MemoryEntry>>,
    connected: AtomicBool,
    connect_attempts: AtomicUsize,
    connect_failure: Mutex<Option<BackendErrorKind>>,
    operation_failure: Mutex<Option<BackendErrorKind>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent handshake fail with `kind`.
    pub fn fail_connect(&self, kind: BackendErrorKind) {
        *mutex_lock(&self.connect_failure, SOURCE, "fail_connect") = Some(kind);
    }

    /// Make every subsequent operation fail with `kind`.
    pub fn fail_operations(&self, kind: BackendErrorKind) {
        *mutex_lock(&self.operation_failure, SOURCE, "fail_operations") = Some(kind);
    }

    /// Clear injected failures.
    pub fn heal(&self) {
        *mutex_lock(&self.connect_failure, SOURCE, "heal") = None;
        *mutex_lock(&self.operation_failure, SOURCE, "heal") = None;
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Read a value regardless of connection state or injected failures.
    pub fn peek(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "peek")
            .get(key)
            .filter(|entry| entry.is_live(now))
            .map(|entry| entry.value.clone())
    }

    /// Remaining time to live of a key, if it has one.
    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "ttl_of")
            .get(key)
            .and_then(|entry| entry.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        mutex_lock(&self.entries, SOURCE, "len")
            .values()
            .filter(|entry| entry.is_live(now))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_operation(&self, op: &str) -> Result<(), BackendError> {
        if let Some(kind) = *mutex_lock(&self.operation_failure, SOURCE, "check_operation") {
            return Err(BackendError::new(kind, format!("injected {op} failure")));
        }
        if !self.is_connected() {
            return Err(BackendError::transport(format!("{op}: not connected")));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(&self) -> Result<(), BackendError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(kind) = *mutex_lock(&self.connect_failure, SOURCE, "connect") {
            return Err(BackendError::new(kind, "injected connect failure"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, BackendError> {
        self.check_operation("get")?;
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get");
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &str,
        value: Bytes,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        self.check_operation("set")?;
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        mutex_lock(&self.entries, SOURCE, "set")
            .insert(key.to_string(), MemoryEntry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<u64, BackendError> {
        self.check_operation("delete")?;
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete");
        let removed = keys
            .iter()
            .filter_map(|key| entries.remove(key))
            .filter(|entry| entry.is_live(now))
            .count();
        Ok(removed as u64)
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), BackendError> {
        self.check_operation("scan")?;
        let now = Instant::now();
        let entries = mutex_lock(&self.entries, SOURCE, "scan");
        let start = usize::try_from(cursor).unwrap_or(usize::MAX);
        let count = count.max(1);

        // Like Redis, COUNT bounds the keys examined, not the keys returned.
        let examined: Vec<(&String, &MemoryEntry)> = entries.iter().skip(start).take(count).collect();
        let next = if start.saturating_add(examined.len()) >= entries.len() {
            0
        } else {
            (start + examined.len()) as u64
        };

        let matched = examined
            .into_iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect();

        Ok((next, matched))
    }
}

/// Redis-compatible glob matching: `*`, `?`, `[abc]`, `[^a-z]`, and `\` escapes.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();
    glob_match_from(&pattern, &text)
}

fn glob_match_from(pattern: &[char], text: &[char]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() {
            match pattern[p] {
                '*' => {
                    backtrack = Some((p, t));
                    p += 1;
                    continue;
                }
                '?' => {
                    p += 1;
                    t += 1;
                    continue;
                }
                '[' => {
                    if let Some((matched, next)) = match_class(pattern, p, text[t])
                        && matched
                    {
                        p = next;
                        t += 1;
                        continue;
                    }
                }
                '\\' if p + 1 < pattern.len() => {
                    if pattern[p + 1] == text[t] {
                        p += 2;
                        t += 1;
                        continue;
                    }
                }
                literal => {
                    if literal == text[t] {
                        p += 1;
                        t += 1;
                        continue;
                    }
                }
            }
        }

        match backtrack {
            Some((star, consumed)) => {
                p = star + 1;
                t = consumed + 1;
                backtrack = Some((star, consumed + 1));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&ch| ch == '*')
}

/// Match `ch` against the class starting at `pattern[open] == '['`.
///
/// Returns whether it matched and the index just past the closing `]`, or
/// `None` when the class is unterminated.
fn match_class(pattern: &[char], open: usize, ch: char) -> Option<(bool, usize)> {
    let mut i = open + 1;
    let negate = pattern.get(i) == Some(&'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    while i < pattern.len() && pattern[i] != ']' {
        let mut low = pattern[i];
        if low == '\\' && i + 1 < pattern.len() {
            i += 1;
            low = pattern[i];
        }
        if i + 2 < pattern.len() && pattern[i + 1] == '-' && pattern[i + 2] != ']' {
            let high = pattern[i + 2];
            let (low, high) = if low <= high { (low, high) } else { (high, low) };
            matched |= (low..=high).contains(&ch);
            i += 3;
        } else {
            matched |= low == ch;
            i += 1;
        }
    }

    if i >= pattern.len() {
        return None;
    }
    Some((matched != negate, i + 1))
}
