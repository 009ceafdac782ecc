use crate::application::repos::RepoError;

const SQLSTATE_DEADLOCK: &str = "40P01";
const SQLSTATE_SERIALIZATION: &str = "40001";
const SQLSTATE_QUERY_CANCELED: &str = "57014";

pub fn map_sqlx_error(err: sqlx::Error) -> RepoError {
    match err {
        sqlx::Error::RowNotFound => RepoError::NotFound,
        sqlx::Error::PoolTimedOut => RepoError::Timeout,
        sqlx::Error::Io(io) => RepoError::Transient(io.to_string()),
        sqlx::Error::PoolClosed => RepoError::Transient("connection pool closed".to_string()),
        sqlx::Error::Database(db)
            if matches!(
                db.code().as_deref(),
                Some(SQLSTATE_DEADLOCK) | Some(SQLSTATE_SERIALIZATION)
            ) =>
        {
            RepoError::Transient(db.message().to_string())
        }
        sqlx::Error::Database(db)
            if db.code().as_deref() == Some(SQLSTATE_QUERY_CANCELED)
                || db
                    .message()
                    .contains("canceling statement due to statement timeout") =>
        {
            RepoError::Timeout
        }
        sqlx::Error::Database(db) if db.message().contains("duplicate key") => {
            RepoError::Duplicate {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            }
        }
        sqlx::Error::Database(db)
            if db.message().contains("violates foreign key constraint")
                || db.message().contains("invalid input syntax") =>
        {
            RepoError::InvalidInput {
                message: db.message().to_string(),
            }
        }
        sqlx::Error::Database(db) if db.message().contains("violates") => RepoError::Integrity {
            message: db.message().to_string(),
        },
        other => RepoError::from_persistence(other),
    }
}
