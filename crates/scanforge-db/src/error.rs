//! Database error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("a run is already active for project version {0}")]
    AlreadyRunning(String),

    #[error("invalid status transition: {0}")]
    InvalidTransition(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;

impl From<DbError> for scanforge_core::Error {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound(what) => scanforge_core::Error::NotFound(what),
            DbError::Conflict(what) => scanforge_core::Error::Conflict(what),
            DbError::AlreadyRunning(version) => scanforge_core::Error::AlreadyRunning(version),
            DbError::InvalidTransition(what) => scanforge_core::Error::Conflict(what),
            other => scanforge_core::Error::Internal(other.to_string()),
        }
    }
}
