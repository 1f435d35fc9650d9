//! Error types shared by the scheduler and broadcast executor binaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Infrastructure failures (CS/PS/client-connect) are the only class that
    /// short-circuits a broadcast executor run without scheduling a continuation.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Redis(_) | Error::Internal(_))
    }
}
