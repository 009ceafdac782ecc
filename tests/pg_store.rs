//! Postgres adapter tests against a throwaway database from `DATABASE_URL`.

use parley::application::pagination::MessagePageQuery;
use parley::application::repos::{ChatReadRepo, DurableWriter, RepoError};
use parley::domain::entities::{ChatDraft, MessageDraft};
use parley::infra::db::PostgresRepositories;
use sqlx::PgPool;
use time::macros::datetime;
use time::{Duration, OffsetDateTime};

fn repositories(pool: PgPool) -> PostgresRepositories {
    PostgresRepositories::new(pool)
}

#[sqlx::test(migrations = "./migrations")]
async fn chat_with_message_commits_together_and_replays_idempotently(pool: PgPool) {
    let repos = repositories(pool.clone());
    let now = OffsetDateTime::now_utc();
    let chat = ChatDraft::titled("Test").into_record("user1", now);
    let message = MessageDraft::user("hi").into_record(chat.id, now);

    repos
        .write_chat_with_message(&chat, &message)
        .await
        .expect("first write");
    repos
        .write_chat_with_message(&chat, &message)
        .await
        .expect("replayed write");

    let chats: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chats")
        .fetch_one(&pool)
        .await
        .expect("count chats");
    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .expect("count messages");
    assert_eq!((chats, messages), (1, 1));

    let page = repos
        .list_messages(chat.id, MessagePageQuery::latest(10))
        .await
        .expect("page loads");
    assert_eq!(page.messages[0].id, message.id);
    assert_eq!(page.messages[0].content, "hi");
}

#[sqlx::test(migrations = "./migrations")]
async fn message_under_foreign_chat_is_rejected(pool: PgPool) {
    let repos = repositories(pool.clone());
    let now = OffsetDateTime::now_utc();
    let chat = ChatDraft::titled("mine").into_record("owner", now);
    repos.write_chat(&chat).await.expect("chat write");

    let message = MessageDraft::user("intrusion").into_record(chat.id, now);
    let err = repos
        .write_message("someone-else", &message)
        .await
        .expect_err("ownership enforced");
    assert!(matches!(err, RepoError::Ownership { .. }));
    assert!(!err.is_retryable());

    let messages: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
        .fetch_one(&pool)
        .await
        .expect("count messages");
    assert_eq!(messages, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn new_message_bumps_chat_and_reorders_list(pool: PgPool) {
    let repos = repositories(pool);
    let start = datetime!(2026-01-01 12:00 UTC);
    let older = ChatDraft::titled("older").into_record("user1", start);
    let newer = ChatDraft::titled("newer").into_record("user1", start + Duration::minutes(1));
    repos.write_chat(&older).await.expect("older chat");
    repos.write_chat(&newer).await.expect("newer chat");

    let reply = MessageDraft::assistant("reply", Some("model-a".into()))
        .into_record(older.id, start + Duration::minutes(5));
    repos.write_message("user1", &reply).await.expect("message write");

    let chats = repos.list_chats("user1", false, 10).await.expect("list loads");
    let ids: Vec<_> = chats.iter().map(|chat| chat.id).collect();
    assert_eq!(ids, vec![older.id, newer.id]);
    assert_eq!(chats[0].updated_at, reply.created_at);

    let found = repos.find_chat(newer.id).await.expect("lookup");
    assert_eq!(found.map(|chat| chat.title), Some("newer".to_string()));
}

#[sqlx::test(migrations = "./migrations")]
async fn message_pages_walk_backwards_by_cursor(pool: PgPool) {
    let repos = repositories(pool);
    let base = datetime!(2026-01-01 12:00 UTC);
    let chat = ChatDraft::titled("paged").into_record("user1", base);
    repos.write_chat(&chat).await.expect("chat write");
    for i in 0..5 {
        let message = MessageDraft::user(format!("m{i}"))
            .into_record(chat.id, base + Duration::seconds(i));
        repos.write_message("user1", &message).await.expect("message write");
    }

    let latest = repos
        .list_messages(chat.id, MessagePageQuery::latest(2))
        .await
        .expect("latest page");
    let contents: Vec<&str> = latest.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m3", "m4"]);
    assert!(latest.has_more);

    let cursor = latest.next_cursor.expect("cursor");
    let older = repos
        .list_messages(chat.id, MessagePageQuery::before(3, cursor))
        .await
        .expect("older page");
    let contents: Vec<&str> = older.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m0", "m1", "m2"]);
    assert!(!older.has_more);
    assert_eq!(older.next_cursor, None);
}

#[sqlx::test(migrations = "./migrations")]
async fn message_pages_walk_forward_by_cursor(pool: PgPool) {
    let repos = repositories(pool);
    let base = datetime!(2026-01-01 12:00 UTC);
    let chat = ChatDraft::titled("paged").into_record("user1", base);
    repos.write_chat(&chat).await.expect("chat write");
    let mut written = Vec::new();
    for i in 1..=10 {
        let message = MessageDraft::user(format!("m{i}"))
            .into_record(chat.id, base + Duration::seconds(i));
        repos.write_message("user1", &message).await.expect("message write");
        written.push(message);
    }

    let next = repos
        .list_messages(chat.id, MessagePageQuery::after(3, written[1].created_at))
        .await
        .expect("newer page");
    let contents: Vec<&str> = next.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m3", "m4", "m5"]);
    assert!(next.has_more);
    assert_eq!(next.next_cursor, Some(written[4].created_at));

    let tail = repos
        .list_messages(chat.id, MessagePageQuery::after(10, written[4].created_at))
        .await
        .expect("tail page");
    let contents: Vec<&str> = tail.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, ["m6", "m7", "m8", "m9", "m10"]);
    assert!(!tail.has_more);
    assert_eq!(tail.next_cursor, None);
}
