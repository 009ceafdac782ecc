use async_trait::async_trait;
use sqlx::{Postgres, QueryBuilder};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{MessagePage, MessagePageQuery};
use crate::application::repos::{ChatReadRepo, RepoError};
use crate::domain::entities::{ChatRecord, MessageRecord};
use crate::domain::types::MessageRole;

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct ChatRow {
    id: Uuid,
    user_id: String,
    title: String,
    archived: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ChatRow> for ChatRecord {
    fn from(row: ChatRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            title: row.title,
            archived: row.archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    chat_id: Uuid,
    role: MessageRole,
    content: String,
    model: Option<String>,
    created_at: OffsetDateTime,
}

impl From<MessageRow> for MessageRecord {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            chat_id: row.chat_id,
            role: row.role,
            content: row.content,
            model: row.model,
            created_at: row.created_at,
        }
    }
}

const CHAT_COLUMNS: &str = "id, user_id, title, archived, created_at, updated_at";

#[async_trait]
impl ChatReadRepo for PostgresRepositories {
    async fn list_chats(
        &self,
        user_id: &str,
        archived: bool,
        limit: usize,
    ) -> Result<Vec<ChatRecord>, RepoError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats \
             WHERE user_id = $1 AND archived = $2 \
             ORDER BY updated_at DESC, id DESC \
             LIMIT $3"
        ))
        .bind(user_id)
        .bind(archived)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(ChatRecord::from).collect())
    }

    async fn find_chat(&self, chat_id: Uuid) -> Result<Option<ChatRecord>, RepoError> {
        let row = sqlx::query_as::<_, ChatRow>(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats WHERE id = $1"
        ))
        .bind(chat_id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(ChatRecord::from))
    }

    async fn list_messages(
        &self,
        chat_id: Uuid,
        query: MessagePageQuery,
    ) -> Result<MessagePage, RepoError> {
        let limit = query.limit.max(1) as usize;

        let mut qb = QueryBuilder::<Postgres>::new(
            "SELECT id, chat_id, role, content, model, created_at FROM messages WHERE chat_id = ",
        );
        qb.push_bind(chat_id);
        if let Some(before) = query.before {
            qb.push(" AND created_at < ");
            qb.push_bind(before);
        }
        if let Some(after) = query.after {
            qb.push(" AND created_at > ");
            qb.push_bind(after);
        }
        // One extra row tells whether another page exists past this one.
        let forward = query.is_forward();
        qb.push(if forward {
            " ORDER BY created_at ASC, id ASC LIMIT "
        } else {
            " ORDER BY created_at DESC, id DESC LIMIT "
        });
        qb.push_bind(limit as i64 + 1);

        let mut rows: Vec<MessageRow> = qb
            .build_query_as()
            .fetch_all(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        let has_more = rows.len() > limit;
        rows.truncate(limit);
        let mut messages: Vec<MessageRecord> = rows.into_iter().map(MessageRecord::from).collect();
        if forward {
            return Ok(MessagePage::forward(messages, has_more));
        }
        messages.reverse();
        Ok(MessagePage::new(messages, has_more))
    }
}
