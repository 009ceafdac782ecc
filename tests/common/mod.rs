#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parley::application::pagination::{MessagePage, MessagePageQuery};
use parley::application::repos::{ChatReadRepo, DurableWriter, RepoError};
use parley::domain::entities::{ChatRecord, MessageRecord};
use uuid::Uuid;

/// In-memory stand-in for the Postgres store with the same write semantics:
/// idempotent inserts, ownership checks and `updated_at` bumps.
#[derive(Default)]
pub struct InMemoryStore {
    chats: Mutex<BTreeMap<Uuid, ChatRecord>>,
    messages: Mutex<HashMap<Uuid, MessageRecord>>,
    transient_failures: AtomicUsize,
    pub write_attempts: AtomicUsize,
    pub reads: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` write attempts with a retryable error.
    pub fn fail_next_writes(&self, count: usize) {
        self.transient_failures.store(count, Ordering::SeqCst);
    }

    pub fn insert_chat(&self, chat: ChatRecord) {
        self.chats.lock().unwrap().insert(chat.id, chat);
    }

    pub fn chat(&self, id: Uuid) -> Option<ChatRecord> {
        self.chats.lock().unwrap().get(&id).cloned()
    }

    pub fn chat_count(&self) -> usize {
        self.chats.lock().unwrap().len()
    }

    pub fn messages_for(&self, chat_id: Uuid) -> Vec<MessageRecord> {
        let mut messages: Vec<MessageRecord> = self
            .messages
            .lock()
            .unwrap()
            .values()
            .filter(|message| message.chat_id == chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(|message| (message.created_at, message.id));
        messages
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    pub fn attempts(&self) -> usize {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn begin_write(&self) -> Result<(), RepoError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        match injected {
            Ok(_) => Err(RepoError::Transient("connection reset".into())),
            Err(_) => Ok(()),
        }
    }

    fn check_owner(&self, chat_id: Uuid, user_id: &str) -> Result<(), RepoError> {
        match self.chats.lock().unwrap().get(&chat_id) {
            Some(chat) if chat.user_id == user_id => Ok(()),
            _ => Err(RepoError::ownership(chat_id, user_id)),
        }
    }

    fn put_message(&self, message: &MessageRecord) {
        self.messages
            .lock()
            .unwrap()
            .entry(message.id)
            .or_insert_with(|| message.clone());
        if let Some(chat) = self.chats.lock().unwrap().get_mut(&message.chat_id) {
            chat.updated_at = chat.updated_at.max(message.created_at);
        }
    }
}

#[async_trait]
impl DurableWriter for InMemoryStore {
    async fn write_message(&self, user_id: &str, message: &MessageRecord) -> Result<(), RepoError> {
        self.begin_write()?;
        self.check_owner(message.chat_id, user_id)?;
        self.put_message(message);
        Ok(())
    }

    async fn write_chat(&self, chat: &ChatRecord) -> Result<(), RepoError> {
        self.begin_write()?;
        let mut chats = self.chats.lock().unwrap();
        match chats.get(&chat.id) {
            Some(existing) if existing.user_id != chat.user_id => {
                Err(RepoError::ownership(chat.id, &chat.user_id))
            }
            Some(_) => Ok(()),
            None => {
                chats.insert(chat.id, chat.clone());
                Ok(())
            }
        }
    }

    async fn write_chat_with_message(
        &self,
        chat: &ChatRecord,
        message: &MessageRecord,
    ) -> Result<(), RepoError> {
        self.begin_write()?;
        {
            let mut chats = self.chats.lock().unwrap();
            if let Some(existing) = chats.get(&chat.id) {
                if existing.user_id != chat.user_id {
                    return Err(RepoError::ownership(chat.id, &chat.user_id));
                }
            } else {
                chats.insert(chat.id, chat.clone());
            }
        }
        self.put_message(message);
        Ok(())
    }
}

#[async_trait]
impl ChatReadRepo for InMemoryStore {
    async fn list_chats(
        &self,
        user_id: &str,
        archived: bool,
        limit: usize,
    ) -> Result<Vec<ChatRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut chats: Vec<ChatRecord> = self
            .chats
            .lock()
            .unwrap()
            .values()
            .filter(|chat| chat.user_id == user_id && chat.archived == archived)
            .cloned()
            .collect();
        chats.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        chats.truncate(limit);
        Ok(chats)
    }

    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<ChatRecord>, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.chat(chat_id))
    }

    async fn list_messages(
        &self,
        chat_id: Uuid,
        query: MessagePageQuery,
    ) -> Result<MessagePage, RepoError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let limit = query.limit.max(1) as usize;
        let mut window: Vec<MessageRecord> = self
            .messages_for(chat_id)
            .into_iter()
            .filter(|message| query.before.is_none_or(|before| message.created_at < before))
            .filter(|message| query.after.is_none_or(|after| message.created_at > after))
            .collect();
        let has_more = window.len() > limit;
        if query.is_forward() {
            window.truncate(limit);
            return Ok(MessagePage::forward(window, has_more));
        }
        let newest = window.split_off(window.len().saturating_sub(limit));
        Ok(MessagePage::new(newest, has_more))
    }
}
