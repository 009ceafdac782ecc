//! Cache invalidation service.
//!
//! Call after the durable commit (or after the direct cache update on the
//! write-behind paths). Failures are logged and never reach the caller.

use std::fmt;

use tracing::{debug, info};
use uuid::Uuid;

use super::events::InvalidationEvent;
use super::planner::InvalidationPlan;
use super::store::CacheStore;

/// Outcome of one invalidation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Exact keys for which a delete was acknowledged.
    pub keys_deleted: usize,
    /// Keys removed through pattern deletes.
    pub pattern_keys_deleted: usize,
    /// Deletes that could not be carried out.
    pub failures: usize,
}

impl fmt::Display for InvalidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keys={} pattern_keys={} failures={}",
            self.keys_deleted, self.pattern_keys_deleted, self.failures
        )
    }
}

/// Translates domain changes into cache deletions.
///
/// ```ignore
/// // After a summary is regenerated and stored:
/// invalidator.summary_regenerated(chat_id).await;
/// ```
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    store: CacheStore,
}

impl CacheInvalidator {
    pub fn new(store: CacheStore) -> Self {
        Self { store }
    }

    /// Plan and execute the deletions for a batch of events.
    pub async fn invalidate(&self, events: &[InvalidationEvent]) -> InvalidationReport {
        let plan = InvalidationPlan::from_events(events);
        if plan.is_empty() {
            return InvalidationReport::default();
        }
        debug!(%plan, events = events.len(), "Executing invalidation plan");

        let mut report = InvalidationReport::default();

        for key in &plan.keys {
            if self.store.delete(key).await {
                report.keys_deleted += 1;
            } else {
                report.failures += 1;
            }
        }

        // delete_pattern reports 0 both on failure and on no match.
        for pattern in &plan.patterns {
            report.pattern_keys_deleted += self.store.delete_pattern(pattern).await;
        }

        info!(
            events = events.len(),
            keys_deleted = report.keys_deleted,
            pattern_keys_deleted = report.pattern_keys_deleted,
            failures = report.failures,
            "Cache invalidated"
        );

        report
    }

    pub async fn chat_updated(&self, chat_id: Uuid) -> InvalidationReport {
        self.invalidate(&[InvalidationEvent::ChatUpdated { chat_id }])
            .await
    }

    pub async fn chat_list_changed(&self, user_id: &str) -> InvalidationReport {
        self.invalidate(&[InvalidationEvent::ChatListChanged {
            user_id: user_id.to_string(),
        }])
        .await
    }

    pub async fn summary_regenerated(&self, chat_id: Uuid) -> InvalidationReport {
        self.invalidate(&[InvalidationEvent::SummaryRegenerated { chat_id }])
            .await
    }

    pub async fn memory_updated(&self, user_id: &str) -> InvalidationReport {
        self.invalidate(&[InvalidationEvent::MemoryUpdated {
            user_id: user_id.to_string(),
        }])
        .await
    }

    pub async fn token_usage_recorded(
        &self,
        message_id: Uuid,
        chat_id: Uuid,
        user_id: &str,
    ) -> InvalidationReport {
        self.invalidate(&[InvalidationEvent::TokenUsageRecorded {
            message_id,
            chat_id,
            user_id: user_id.to_string(),
        }])
        .await
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }
}
