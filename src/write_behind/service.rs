//! Write-behind entry points.
//!
//! Each entry point materializes the new records, folds them into whichever
//! cached collections are already warm, returns them to the caller and only
//! then hands the durable write to the queue. Cold collections stay cold: the
//! next read loads them from the database.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::application::pagination::MessagePage;
use crate::cache::{CacheKey, CacheStore};
use crate::domain::entities::{ChatDraft, ChatRecord, MessageDraft, MessageRecord};

use super::intent::IntentPayload;
use super::queue::WriteBehindQueue;

/// A newly created chat together with its first message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatWithMessage {
    pub chat: ChatRecord,
    pub message: MessageRecord,
}

#[derive(Clone)]
pub struct WriteBehindService {
    cache: CacheStore,
    queue: WriteBehindQueue,
}

impl WriteBehindService {
    pub fn new(cache: CacheStore, queue: WriteBehindQueue) -> Self {
        Self { cache, queue }
    }

    pub fn queue(&self) -> &WriteBehindQueue {
        &self.queue
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Add a message to an existing chat owned by `user_id`.
    #[instrument(skip(self, draft), fields(chat_id = %chat_id))]
    pub async fn write_message_to_cache(
        &self,
        chat_id: Uuid,
        draft: MessageDraft,
        user_id: &str,
    ) -> MessageRecord {
        let message = draft.into_record(chat_id, OffsetDateTime::now_utc());
        self.append_to_latest_page(&message).await;
        self.bump_in_chat_lists(user_id, &message).await;

        self.queue.enqueue(IntentPayload::Message {
            user_id: user_id.to_string(),
            message: message.clone(),
        });
        message
    }

    #[instrument(skip(self, draft))]
    pub async fn write_chat_to_cache(&self, draft: ChatDraft, user_id: &str) -> ChatRecord {
        let chat = draft.into_record(user_id, OffsetDateTime::now_utc());
        self.prepend_to_chat_list(&chat).await;

        self.queue.enqueue(IntentPayload::Chat { chat: chat.clone() });
        chat
    }

    /// Create a chat and its first message, persisted in one transaction.
    #[instrument(skip(self, chat_draft, message_draft))]
    pub async fn write_chat_with_message_to_cache(
        &self,
        chat_draft: ChatDraft,
        message_draft: MessageDraft,
        user_id: &str,
    ) -> ChatWithMessage {
        let now = OffsetDateTime::now_utc();
        let chat = chat_draft.into_record(user_id, now);
        let message = message_draft.into_record(chat.id, now);

        self.prepend_to_chat_list(&chat).await;
        self.append_to_latest_page(&message).await;

        self.queue.enqueue(IntentPayload::ChatWithMessage {
            chat: chat.clone(),
            message: message.clone(),
        });
        ChatWithMessage { chat, message }
    }

    async fn append_to_latest_page(&self, message: &MessageRecord) {
        let limit = self.cache.config().message_page_limit_non_zero();
        let key = CacheKey::latest_messages(message.chat_id, limit);

        let Some(mut page) = self.cache.get_json::<MessagePage>(&key).await else {
            debug!(cache_key = %key, "Latest page not cached; leaving it cold");
            return;
        };

        if page.append_bounded(message.clone(), limit as usize) {
            self.cache.set_json(&key, &page).await;
        }
    }

    /// Move the chat to the front of its warm list with the `updated_at` the
    /// durable write will give it.
    async fn bump_in_chat_lists(&self, user_id: &str, message: &MessageRecord) {
        let limit = self.cache.config().chat_list_limit_non_zero();
        for archived in [false, true] {
            let key = CacheKey::chat_list(user_id, archived);
            let Some(mut chats) = self.cache.get_json::<Vec<ChatRecord>>(&key).await else {
                continue;
            };

            match chats.iter().position(|chat| chat.id == message.chat_id) {
                Some(index) => {
                    let mut chat = chats.remove(index);
                    chat.updated_at = chat.updated_at.max(message.created_at);
                    chats.insert(0, chat);
                    self.cache.set_json(&key, &chats).await;
                    return;
                }
                // A full list may have cut the chat off; it now sorts first.
                None if !archived && chats.len() >= limit => {
                    debug!(cache_key = %key, "Bumped chat missing from full list; dropping it");
                    self.cache.delete_key(&key).await;
                }
                None => {}
            }
        }
    }

    async fn prepend_to_chat_list(&self, chat: &ChatRecord) {
        let limit = self.cache.config().chat_list_limit_non_zero();
        let key = CacheKey::chat_list(&chat.user_id, chat.archived);

        let Some(mut chats) = self.cache.get_json::<Vec<ChatRecord>>(&key).await else {
            debug!(cache_key = %key, "Chat list not cached; leaving it cold");
            return;
        };

        chats.retain(|existing| existing.id != chat.id);
        chats.insert(0, chat.clone());
        chats.truncate(limit);
        self.cache.set_json(&key, &chats).await;
    }
}
