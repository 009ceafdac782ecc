mod common;

use std::sync::Arc;
use std::time::Duration;

use common::InMemoryStore;
use parley::application::chats::ChatQueries;
use parley::application::pagination::MessagePage;
use parley::application::repos::{ChatReadRepo, DurableWriter};
use parley::cache::{CacheConfig, CacheKey, CacheStore, MemoryBackend};
use parley::domain::entities::{ChatDraft, ChatRecord, MessageDraft};
use parley::write_behind::{WriteBehindConfig, WriteBehindQueue, WriteBehindService};
use time::OffsetDateTime;
use uuid::Uuid;

const DRAIN: Duration = Duration::from_secs(5);

struct Harness {
    store: Arc<InMemoryStore>,
    service: WriteBehindService,
    queries: ChatQueries,
}

fn harness(cache_config: CacheConfig, queue_config: WriteBehindConfig) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let cache = CacheStore::new(Arc::new(MemoryBackend::new()), cache_config);
    let writer: Arc<dyn DurableWriter> = store.clone();
    let repo: Arc<dyn ChatReadRepo> = store.clone();
    let queue = WriteBehindQueue::new(writer, queue_config);
    Harness {
        service: WriteBehindService::new(cache.clone(), queue),
        queries: ChatQueries::new(repo, cache),
        store,
    }
}

fn fast_queue() -> WriteBehindConfig {
    WriteBehindConfig {
        drain_delay_ms: 1,
        ..Default::default()
    }
}

#[tokio::test]
async fn new_chat_with_message_is_persisted_with_cached_ids() {
    let h = harness(CacheConfig::default(), fast_queue());

    let created = h
        .service
        .write_chat_with_message_to_cache(ChatDraft::titled("Test"), MessageDraft::user("hi"), "user1")
        .await;
    assert!(!created.chat.id.is_nil());
    assert_eq!(created.message.chat_id, created.chat.id);

    assert!(h.service.queue().wait_idle(DRAIN).await);

    assert_eq!(h.store.chat_count(), 1);
    assert_eq!(h.store.message_count(), 1);
    let chat = h.store.chat(created.chat.id).expect("chat persisted");
    assert_eq!(chat.title, "Test");
    assert_eq!(chat.user_id, "user1");
    let messages = h.store.messages_for(created.chat.id);
    assert_eq!(messages[0].id, created.message.id);
    assert_eq!(messages[0].content, "hi");
}

#[tokio::test]
async fn transient_failures_are_retried_until_committed() {
    let h = harness(CacheConfig::default(), fast_queue());
    h.store.fail_next_writes(2);

    let chat = h
        .service
        .write_chat_to_cache(ChatDraft::titled("flaky"), "user1")
        .await;

    assert!(h.service.queue().wait_idle(DRAIN).await);
    assert_eq!(h.store.attempts(), 3);
    assert!(h.store.chat(chat.id).is_some());
}

#[tokio::test]
async fn retries_stop_at_the_ceiling() {
    let h = harness(CacheConfig::default(), fast_queue());
    h.store.fail_next_writes(usize::MAX);

    let chat = h
        .service
        .write_chat_to_cache(ChatDraft::titled("doomed"), "user1")
        .await;

    assert!(h.service.queue().wait_idle(DRAIN).await);
    // One attempt plus three retries.
    assert_eq!(h.store.attempts(), 4);
    assert!(h.store.chat(chat.id).is_none());
    assert_eq!(h.service.queue().pending_len(), 0);
}

#[tokio::test]
async fn message_for_foreign_chat_is_dropped_without_retry() {
    let h = harness(CacheConfig::default(), fast_queue());
    let owned = ChatDraft::titled("mine").into_record("owner", OffsetDateTime::now_utc());
    h.store.insert_chat(owned.clone());

    h.service
        .write_message_to_cache(owned.id, MessageDraft::user("intrusion"), "someone-else")
        .await;
    h.service
        .write_message_to_cache(Uuid::new_v4(), MessageDraft::user("orphan"), "owner")
        .await;

    assert!(h.service.queue().wait_idle(DRAIN).await);
    assert_eq!(h.store.attempts(), 2);
    assert_eq!(h.store.message_count(), 0);
    assert_eq!(h.store.chat(owned.id).expect("chat kept").updated_at, owned.updated_at);
}

#[tokio::test]
async fn cached_page_is_bounded_while_store_keeps_everything() {
    let h = harness(
        CacheConfig {
            message_page_limit: 3,
            ..Default::default()
        },
        fast_queue(),
    );
    let created = h
        .service
        .write_chat_with_message_to_cache(ChatDraft::titled("long"), MessageDraft::user("m0"), "user1")
        .await;
    let chat_id = created.chat.id;
    assert!(h.service.queue().wait_idle(DRAIN).await);

    // Warm the latest page from the store.
    let first = h.queries.latest_messages(chat_id).await.expect("page loads");
    assert_eq!(first.messages.len(), 1);
    let key = CacheKey::latest_messages(chat_id, 3);
    for _ in 0..50 {
        if h.service.cache().get_json::<MessagePage>(&key).await.is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }

    let mut sent = vec![created.message.id];
    for i in 1..6 {
        let message = h
            .service
            .write_message_to_cache(chat_id, MessageDraft::user(format!("m{i}")), "user1")
            .await;
        sent.push(message.id);
    }
    assert!(h.service.queue().wait_idle(DRAIN).await);

    let page: MessagePage = h.service.cache().get_json(&key).await.expect("page cached");
    let cached: Vec<Uuid> = page.messages.iter().map(|m| m.id).collect();
    assert_eq!(cached, sent[3..].to_vec());
    assert!(page.has_more);
    assert_eq!(h.store.messages_for(chat_id).len(), 6);
}

#[tokio::test]
async fn new_chats_show_up_in_a_warm_list_before_they_are_persisted() {
    let h = harness(CacheConfig::default(), fast_queue());
    let listed = h.queries.list_chats("user1", false).await.expect("list loads");
    assert!(listed.is_empty());
    let key = CacheKey::chat_list("user1", false);
    for _ in 0..50 {
        if h.service.cache().get_json::<Vec<ChatRecord>>(&key).await.is_some() {
            break;
        }
        tokio::task::yield_now().await;
    }

    h.store.fail_next_writes(usize::MAX);
    let chat = h
        .service
        .write_chat_to_cache(ChatDraft::titled("fresh"), "user1")
        .await;

    let listed = h.queries.list_chats("user1", false).await.expect("list served");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, chat.id);
    assert!(h.store.chat(chat.id).is_none());
    assert!(h.service.queue().wait_idle(DRAIN).await);
}
