mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::InMemoryStore;
use parley::application::chats::ChatQueries;
use parley::application::pagination::MessagePageQuery;
use parley::application::repos::{ChatReadRepo, DurableWriter, RepoError};
use parley::cache::{
    BackendErrorKind, CacheConfig, CacheInvalidator, CacheKey, CacheStore, InvalidationEvent,
    MemoryBackend,
};
use parley::domain::entities::{ChatDraft, MessageDraft};
use time::OffsetDateTime;
use uuid::Uuid;

struct Fixture {
    store: Arc<InMemoryStore>,
    backend: Arc<MemoryBackend>,
    cache: CacheStore,
    queries: ChatQueries,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let backend = Arc::new(MemoryBackend::new());
    let cache = CacheStore::new(backend.clone(), CacheConfig::default());
    let repo: Arc<dyn ChatReadRepo> = store.clone();
    Fixture {
        queries: ChatQueries::new(repo, cache.clone()),
        store,
        backend,
        cache,
    }
}

/// Wait for a detached write-back to land.
async fn wait_for_key(backend: &MemoryBackend, key: &CacheKey) {
    let rendered = key.to_string();
    for _ in 0..100 {
        if backend.peek(&rendered).is_some() {
            return;
        }
        tokio::task::yield_now().await;
    }
    panic!("{rendered} was never written back");
}

fn seed_chat(store: &InMemoryStore, user_id: &str, title: &str) -> Uuid {
    let chat = ChatDraft::titled(title).into_record(user_id, OffsetDateTime::now_utc());
    let id = chat.id;
    store.insert_chat(chat);
    id
}

#[tokio::test]
async fn second_read_is_served_from_cache() {
    let f = fixture();
    let chat_id = seed_chat(&f.store, "user1", "cached");

    let first = f.queries.chat_meta(chat_id).await.expect("meta loads");
    wait_for_key(&f.backend, &CacheKey::ChatMeta(chat_id)).await;
    let second = f.queries.chat_meta(chat_id).await.expect("meta cached");

    assert_eq!(first, second);
    assert_eq!(f.store.reads.load(Ordering::SeqCst), 1);
    let ttl = f
        .backend
        .ttl_of(&CacheKey::ChatMeta(chat_id).to_string())
        .expect("meta has ttl");
    assert!(ttl <= Duration::from_secs(300) && ttl > Duration::from_secs(290));
}

#[tokio::test]
async fn missing_chat_is_not_found_and_not_cached() {
    let f = fixture();
    let chat_id = Uuid::new_v4();

    let err = f.queries.chat_meta(chat_id).await.expect_err("no such chat");
    assert!(matches!(err, RepoError::NotFound));

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(f.backend.is_empty());
}

#[tokio::test]
async fn unavailable_cache_reads_through_every_time() {
    let f = fixture();
    f.backend.fail_connect(BackendErrorKind::Transport);
    seed_chat(&f.store, "user1", "a");

    for _ in 0..3 {
        let chats = f.queries.list_chats("user1", false).await.expect("list loads");
        assert_eq!(chats.len(), 1);
    }
    assert_eq!(f.store.reads.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn message_windows_are_cached_separately() {
    let f = fixture();
    let chat_id = seed_chat(&f.store, "user1", "paged");
    let base = OffsetDateTime::now_utc();
    for i in 0..5i64 {
        let message = MessageDraft {
            created_at: Some(base + time::Duration::seconds(i)),
            ..MessageDraft::user(format!("m{i}"))
        }
        .into_record(chat_id, base);
        f.store
            .write_message("user1", &message)
            .await
            .expect("seed message");
    }

    let latest = f
        .queries
        .list_messages(chat_id, MessagePageQuery::latest(2))
        .await
        .expect("latest page");
    assert_eq!(latest.messages.len(), 2);
    assert!(latest.has_more);
    let cursor = latest.next_cursor.expect("cursor for older page");

    let older = f
        .queries
        .list_messages(chat_id, MessagePageQuery::before(2, cursor))
        .await
        .expect("older page");
    let contents: Vec<&str> = older.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m1", "m2"]);

    wait_for_key(&f.backend, &CacheKey::latest_messages(chat_id, 2)).await;
    let older_key = CacheKey::ChatMessages {
        chat_id,
        limit: 2,
        before: Some(cursor),
        after: None,
    };
    wait_for_key(&f.backend, &older_key).await;
}

#[tokio::test]
async fn chat_update_invalidation_forces_a_reload() {
    let f = fixture();
    let chat_id = seed_chat(&f.store, "user1", "before");
    f.queries.chat_meta(chat_id).await.expect("meta loads");
    f.queries
        .list_messages(chat_id, MessagePageQuery::latest(10))
        .await
        .expect("messages load");
    wait_for_key(&f.backend, &CacheKey::ChatMeta(chat_id)).await;
    wait_for_key(&f.backend, &CacheKey::latest_messages(chat_id, 10)).await;

    let mut renamed = f.store.chat(chat_id).expect("seeded");
    renamed.title = "after".to_string();
    f.store.insert_chat(renamed);

    let invalidator = CacheInvalidator::new(f.cache.clone());
    let report = invalidator
        .invalidate(&[InvalidationEvent::ChatUpdated { chat_id }])
        .await;
    // Meta and summary keys; deleting an absent key still succeeds.
    assert_eq!(report.keys_deleted, 2);
    assert_eq!(report.pattern_keys_deleted, 1);
    assert_eq!(report.failures, 0);

    let meta = f.queries.chat_meta(chat_id).await.expect("meta reloads");
    assert_eq!(meta.title, "after");
}
