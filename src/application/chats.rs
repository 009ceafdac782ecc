//! Cached read paths for chats and messages.

use std::sync::Arc;

use tracing::instrument;
use uuid::Uuid;

use crate::application::pagination::{MessagePage, MessagePageQuery};
use crate::application::repos::{ChatReadRepo, RepoError};
use crate::cache::{CacheKey, CacheStore};
use crate::domain::entities::ChatRecord;

/// Read-through queries over [`ChatReadRepo`].
///
/// Every query is keyed by the same namespaced keys the write-behind path
/// mutates, so freshly written chats and messages are visible here before they
/// reach the database.
#[derive(Clone)]
pub struct ChatQueries {
    repo: Arc<dyn ChatReadRepo>,
    cache: CacheStore,
}

impl ChatQueries {
    pub fn new(repo: Arc<dyn ChatReadRepo>, cache: CacheStore) -> Self {
        Self { repo, cache }
    }

    #[instrument(skip(self))]
    pub async fn list_chats(
        &self,
        user_id: &str,
        archived: bool,
    ) -> Result<Vec<ChatRecord>, RepoError> {
        let limit = self.cache.config().chat_list_limit_non_zero();
        let key = CacheKey::chat_list(user_id, archived);
        self.cache
            .get_cached(&key, || self.repo.list_chats(user_id, archived, limit))
            .await
    }

    #[instrument(skip(self, query), fields(limit = query.limit))]
    pub async fn list_messages(
        &self,
        chat_id: Uuid,
        query: MessagePageQuery,
    ) -> Result<MessagePage, RepoError> {
        let key = CacheKey::ChatMessages {
            chat_id,
            limit: query.limit,
            before: query.before,
            after: query.after,
        };
        self.cache
            .get_cached(&key, || self.repo.list_messages(chat_id, query))
            .await
    }

    /// The newest page, as appended to by the write-behind path.
    pub async fn latest_messages(&self, chat_id: Uuid) -> Result<MessagePage, RepoError> {
        let limit = self.cache.config().message_page_limit_non_zero();
        self.list_messages(chat_id, MessagePageQuery::latest(limit))
            .await
    }

    #[instrument(skip(self))]
    pub async fn chat_meta(&self, chat_id: Uuid) -> Result<ChatRecord, RepoError> {
        let key = CacheKey::ChatMeta(chat_id);
        self.cache
            .get_cached(&key, || async {
                self.repo
                    .find_chat(chat_id)
                    .await?
                    .ok_or(RepoError::NotFound)
            })
            .await
    }
}
