use async_trait::async_trait;
use sqlx::PgConnection;
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::application::repos::{DurableWriter, RepoError};
use crate::domain::entities::{ChatRecord, MessageRecord};

use super::{PostgresRepositories, map_sqlx_error, rollback_quietly};

/// Lock the chat row and confirm `user_id` owns it.
async fn lock_owned_chat(
    conn: &mut PgConnection,
    chat_id: Uuid,
    user_id: &str,
) -> Result<(), RepoError> {
    let owner: Option<String> =
        sqlx::query_scalar("SELECT user_id FROM chats WHERE id = $1 FOR UPDATE")
            .bind(chat_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(map_sqlx_error)?;

    match owner {
        Some(owner) if owner == user_id => Ok(()),
        _ => Err(RepoError::ownership(chat_id, user_id)),
    }
}

async fn insert_chat(conn: &mut PgConnection, chat: &ChatRecord) -> Result<bool, RepoError> {
    let result = sqlx::query(
        r#"
        INSERT INTO chats (id, user_id, title, archived, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(chat.id)
    .bind(&chat.user_id)
    .bind(&chat.title)
    .bind(chat.archived)
    .bind(chat.created_at)
    .bind(chat.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected() == 1)
}

async fn insert_message(
    conn: &mut PgConnection,
    message: &MessageRecord,
) -> Result<bool, RepoError> {
    let result = sqlx::query(
        r#"
        INSERT INTO messages (id, chat_id, role, content, model, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (id) DO NOTHING
        "#,
    )
    .bind(message.id)
    .bind(message.chat_id)
    .bind(message.role)
    .bind(&message.content)
    .bind(message.model.as_deref())
    .bind(message.created_at)
    .execute(&mut *conn)
    .await
    .map_err(map_sqlx_error)?;

    Ok(result.rows_affected() == 1)
}

/// Never moves `updated_at` backwards, so replays leave it unchanged.
async fn touch_chat(
    conn: &mut PgConnection,
    chat_id: Uuid,
    at: OffsetDateTime,
) -> Result<(), RepoError> {
    sqlx::query("UPDATE chats SET updated_at = GREATEST(updated_at, $2) WHERE id = $1")
        .bind(chat_id)
        .bind(at)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

async fn message_steps(
    conn: &mut PgConnection,
    user_id: &str,
    message: &MessageRecord,
) -> Result<(), RepoError> {
    lock_owned_chat(conn, message.chat_id, user_id).await?;
    if !insert_message(conn, message).await? {
        debug!(message_id = %message.id, "Message already persisted");
    }
    touch_chat(conn, message.chat_id, message.created_at).await
}

async fn chat_steps(conn: &mut PgConnection, chat: &ChatRecord) -> Result<(), RepoError> {
    if !insert_chat(conn, chat).await? {
        // The id may already belong to someone else's chat.
        lock_owned_chat(conn, chat.id, &chat.user_id).await?;
        debug!(chat_id = %chat.id, "Chat already persisted");
    }
    Ok(())
}

#[async_trait]
impl DurableWriter for PostgresRepositories {
    #[instrument(skip(self, message), fields(chat_id = %message.chat_id, message_id = %message.id))]
    async fn write_message(
        &self,
        user_id: &str,
        message: &MessageRecord,
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await?;
        match message_steps(&mut tx, user_id, message).await {
            Ok(()) => tx.commit().await.map_err(map_sqlx_error),
            Err(err) => {
                rollback_quietly(tx, "write_message").await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, chat), fields(chat_id = %chat.id))]
    async fn write_chat(&self, chat: &ChatRecord) -> Result<(), RepoError> {
        let mut tx = self.begin().await?;
        match chat_steps(&mut tx, chat).await {
            Ok(()) => tx.commit().await.map_err(map_sqlx_error),
            Err(err) => {
                rollback_quietly(tx, "write_chat").await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self, chat, message), fields(chat_id = %chat.id, message_id = %message.id))]
    async fn write_chat_with_message(
        &self,
        chat: &ChatRecord,
        message: &MessageRecord,
    ) -> Result<(), RepoError> {
        let mut tx = self.begin().await?;
        let steps = async {
            chat_steps(&mut tx, chat).await?;
            message_steps(&mut tx, &chat.user_id, message).await
        }
        .await;

        match steps {
            Ok(()) => tx.commit().await.map_err(map_sqlx_error),
            Err(err) => {
                rollback_quietly(tx, "write_chat_with_message").await;
                Err(err)
            }
        }
    }
}
