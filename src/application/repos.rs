//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::application::pagination::{MessagePage, MessagePageQuery};
use crate::domain::entities::{ChatRecord, MessageRecord};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
    #[error("chat {chat_id} is missing or not owned by user `{user_id}`")]
    Ownership { chat_id: Uuid, user_id: String },
    #[error("transient database failure: {0}")]
    Transient(String),
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn ownership(chat_id: Uuid, user_id: &str) -> Self {
        Self::Ownership {
            chat_id,
            user_id: user_id.to_string(),
        }
    }

    /// Whether a later attempt of the same write could succeed.
    ///
    /// Connection loss, pool exhaustion, statement timeouts, deadlocks and
    /// serialization failures are retryable. Ownership and constraint
    /// violations are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RepoError::Persistence(_) | RepoError::Timeout | RepoError::Transient(_)
        )
    }
}

/// Transactional writes performed by the write-behind worker.
///
/// Every method is idempotent on the record id: replaying a write that already
/// committed leaves exactly one row.
#[async_trait]
pub trait DurableWriter: Send + Sync {
    /// Insert a message under an existing chat owned by `user_id`.
    async fn write_message(&self, user_id: &str, message: &MessageRecord)
    -> Result<(), RepoError>;

    async fn write_chat(&self, chat: &ChatRecord) -> Result<(), RepoError>;

    /// Insert a chat and its first message in one transaction.
    async fn write_chat_with_message(
        &self,
        chat: &ChatRecord,
        message: &MessageRecord,
    ) -> Result<(), RepoError>;
}

#[async_trait]
pub trait ChatReadRepo: Send + Sync {
    /// Chats for a user, most recently updated first.
    async fn list_chats(
        &self,
        user_id: &str,
        archived: bool,
        limit: usize,
    ) -> Result<Vec<ChatRecord>, RepoError>;

    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<ChatRecord>, RepoError>;

    async fn list_messages(
        &self,
        chat_id: Uuid,
        query: MessagePageQuery,
    ) -> Result<MessagePage, RepoError>;
}
