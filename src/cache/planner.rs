//! Invalidation plan generation.
//!
//! Merges a batch of events into the deduplicated set of exact keys and glob
//! patterns to delete.

use std::collections::BTreeSet;
use std::fmt;

use super::events::InvalidationEvent;
use super::keys::{CacheKey, KeyPattern};

/// Deletions required to make the cache consistent with a set of changes.
///
/// Keys and patterns are kept as rendered strings in sorted sets so that a
/// plan executes deterministically and each target is deleted once.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub keys: BTreeSet<String>,
    pub patterns: BTreeSet<String>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ keys: {}, patterns: {} }}",
            self.keys.len(),
            self.patterns.len()
        )
    }
}

impl InvalidationPlan {
    pub fn from_events(events: &[InvalidationEvent]) -> Self {
        let mut plan = Self::default();

        for event in events {
            match event {
                InvalidationEvent::ChatUpdated { chat_id } => {
                    plan.key(CacheKey::ChatMeta(*chat_id));
                    plan.key(CacheKey::ChatSummary(*chat_id));
                    plan.pattern(KeyPattern::ChatMessages(*chat_id));
                    plan.pattern(KeyPattern::StatsChat(*chat_id));
                }
                InvalidationEvent::ChatListChanged { user_id } => {
                    plan.pattern(KeyPattern::ChatList(user_id.clone()));
                }
                InvalidationEvent::SummaryRegenerated { chat_id } => {
                    plan.key(CacheKey::ChatSummary(*chat_id));
                }
                InvalidationEvent::MemoryUpdated { user_id } => {
                    plan.key(CacheKey::UserMemory(user_id.clone()));
                }
                InvalidationEvent::TokenUsageRecorded {
                    message_id,
                    chat_id,
                    user_id,
                } => {
                    plan.key(CacheKey::StatsMessage(*message_id));
                    plan.pattern(KeyPattern::StatsChat(*chat_id));
                    plan.pattern(KeyPattern::StatsUser(user_id.clone()));
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty() && self.patterns.is_empty()
    }

    fn key(&mut self, key: CacheKey) {
        self.keys.insert(key.to_string());
    }

    fn pattern(&mut self, pattern: KeyPattern) {
        self.patterns.insert(pattern.to_string());
    }
}
