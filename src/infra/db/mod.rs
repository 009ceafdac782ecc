//! Postgres-backed repository implementations.

mod chats;
mod util;
mod writers;

pub use util::map_sqlx_error;

use std::sync::Arc;

use sqlx::{
    Executor, Postgres, Transaction,
    postgres::{PgPool, PgPoolOptions},
    query,
};
use tracing::warn;

use crate::application::repos::RepoError;
use crate::config::DatabaseSettings;
use crate::infra::error::InfraError;

#[derive(Clone)]
pub struct PostgresRepositories {
    pool: Arc<PgPool>,
}

impl PostgresRepositories {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, RepoError> {
        self.pool.begin().await.map_err(map_sqlx_error)
    }

    /// Open a pool that keeps `min_connections` warm and applies the
    /// statement timeout to every connection it hands out.
    pub async fn connect(settings: &DatabaseSettings) -> Result<PgPool, InfraError> {
        let url = settings
            .url
            .as_deref()
            .ok_or_else(|| InfraError::configuration("database.url is required"))?;
        let statement_timeout_ms = settings.statement_timeout.as_millis();

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections.get())
            .min_connections(settings.min_connections)
            .acquire_timeout(settings.acquire_timeout)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect(url)
            .await?;
        Ok(pool)
    }

    pub async fn run_migrations(pool: &PgPool) -> Result<(), InfraError> {
        sqlx::migrate!("./migrations").run(pool).await?;
        Ok(())
    }

    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        query("SELECT 1").execute(self.pool()).await.map(|_| ())
    }
}

/// Roll back after a failed step, logging (not returning) rollback errors.
async fn rollback_quietly(tx: Transaction<'_, Postgres>, op: &'static str) {
    if let Err(err) = tx.rollback().await {
        warn!(op, error = %err, "Transaction rollback failed");
    }
}
