//! Domain entities mirrored from persistent storage.
//!
//! Cached copies of these records carry the same `id` as the eventual database
//! row, so a record served from the cache and the one read back from Postgres
//! are interchangeable.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::domain::types::MessageRole;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub archived: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A chat as supplied by a request handler, before identity is assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatDraft {
    pub id: Option<Uuid>,
    pub title: String,
    pub created_at: Option<OffsetDateTime>,
}

impl ChatDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Materialize the draft, assigning an id and timestamp when absent.
    pub fn into_record(self, user_id: &str, now: OffsetDateTime) -> ChatRecord {
        let created_at = self.created_at.unwrap_or(now);
        ChatRecord {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            user_id: user_id.to_string(),
            title: self.title,
            archived: false,
            created_at,
            updated_at: created_at,
        }
    }
}

/// A message as supplied by a request handler, before identity is assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageDraft {
    pub id: Option<Uuid>,
    pub role: MessageRole,
    pub content: String,
    pub model: Option<String>,
    pub created_at: Option<OffsetDateTime>,
}

impl MessageDraft {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>, model: Option<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            model,
            ..Default::default()
        }
    }

    pub fn into_record(self, chat_id: Uuid, now: OffsetDateTime) -> MessageRecord {
        MessageRecord {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            chat_id,
            role: self.role,
            content: self.content,
            model: self.model,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use time::macros::datetime;

    use super::*;

    #[test]
    fn chat_draft_assigns_identity_and_time() {
        let now = datetime!(2026-01-02 03:04:05 UTC);
        let record = ChatDraft::titled("Test").into_record("user1", now);

        assert!(!record.id.is_nil());
        assert_eq!(record.user_id, "user1");
        assert_eq!(record.created_at, now);
        assert_eq!(record.updated_at, now);
        assert!(!record.archived);
    }

    #[test]
    fn drafts_keep_caller_supplied_identity() {
        let id = Uuid::new_v4();
        let at = datetime!(2025-12-31 23:59:59 UTC);
        let draft = MessageDraft {
            id: Some(id),
            created_at: Some(at),
            ..MessageDraft::user("hi")
        };

        let chat_id = Uuid::new_v4();
        let record = draft.into_record(chat_id, datetime!(2026-01-01 00:00:00 UTC));
        assert_eq!(record.id, id);
        assert_eq!(record.chat_id, chat_id);
        assert_eq!(record.created_at, at);
    }

    #[test]
    fn message_record_serializes_rfc3339_timestamps() {
        let record = MessageRecord {
            id: Uuid::nil(),
            chat_id: Uuid::nil(),
            role: MessageRole::User,
            content: "hi".to_string(),
            model: None,
            created_at: datetime!(2026-03-04 05:06:07 UTC),
        };

        let json = serde_json::to_value(&record).expect("serialize message");
        assert_eq!(json["created_at"], "2026-03-04T05:06:07Z");
        assert!(json.get("model").is_none());

        let back: MessageRecord = serde_json::from_value(json).expect("deserialize message");
        assert_eq!(back, record);
    }
}
