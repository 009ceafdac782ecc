//! Invalidation events.
//!
//! Write paths describe *what changed*; the planner decides which keys that
//! touches.

use std::fmt;

use uuid::Uuid;

/// A change that makes some cached values stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InvalidationEvent {
    /// Chat metadata or membership changed.
    ChatUpdated { chat_id: Uuid },
    /// A chat was created, archived, renamed or deleted for this user.
    ChatListChanged { user_id: String },
    /// A rolling summary was regenerated.
    SummaryRegenerated { chat_id: Uuid },
    /// Semantic-memory facts for a user were updated.
    MemoryUpdated { user_id: String },
    /// Token usage was recorded against a message.
    TokenUsageRecorded {
        message_id: Uuid,
        chat_id: Uuid,
        user_id: String,
    },
}

impl InvalidationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            InvalidationEvent::ChatUpdated { .. } => "chat_updated",
            InvalidationEvent::ChatListChanged { .. } => "chat_list_changed",
            InvalidationEvent::SummaryRegenerated { .. } => "summary_regenerated",
            InvalidationEvent::MemoryUpdated { .. } => "memory_updated",
            InvalidationEvent::TokenUsageRecorded { .. } => "token_usage_recorded",
        }
    }
}

impl fmt::Display for InvalidationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationEvent::ChatUpdated { chat_id }
            | InvalidationEvent::SummaryRegenerated { chat_id } => {
                write!(f, "{}({chat_id})", self.kind())
            }
            InvalidationEvent::ChatListChanged { user_id }
            | InvalidationEvent::MemoryUpdated { user_id } => {
                write!(f, "{}({user_id})", self.kind())
            }
            InvalidationEvent::TokenUsageRecorded {
                message_id,
                chat_id,
                user_id,
            } => write!(f, "{}({message_id}, {chat_id}, {user_id})", self.kind()),
        }
    }
}
