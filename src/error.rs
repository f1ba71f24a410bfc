//! Error Types
//!
//! `DbError` is the driver-neutral shape every session backend reports
//! failures in; the classifier turns it into a user-facing category.
//! `SandboxError` covers startup problems (configuration, first connection).

use std::fmt;

/// A failure reported by a database session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbError {
    /// Five character SQLSTATE, when the server sent one
    pub code: Option<String>,
    /// Primary message, as the server or driver phrased it
    pub message: String,
    /// The session is unusable and must not be returned to the pool
    pub connection_lost: bool,
}

impl DbError {
    pub fn new(message: impl Into<String>) -> Self {
        DbError {
            code: None,
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        DbError {
            code: Some(code.into()),
            message: message.into(),
            connection_lost: false,
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        DbError {
            code: None,
            message: message.into(),
            connection_lost: true,
        }
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {code})", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for DbError {}

impl From<tokio_postgres::Error> for DbError {
    fn from(err: tokio_postgres::Error) -> Self {
        let connection_lost = err.is_closed();
        match err.as_db_error() {
            Some(db) => DbError {
                code: Some(db.code().code().to_string()),
                message: db.message().to_string(),
                connection_lost,
            },
            None => DbError {
                code: err.code().map(|c| c.code().to_string()),
                message: err.to_string(),
                // Anything below the protocol layer (io, tls, closed) poisons the session
                connection_lost: true,
            },
        }
    }
}

/// Startup and wiring errors
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Pool error: {0}")]
    Pool(#[from] crate::pool::PoolError),

    #[error("Attempt store error: {0}")]
    Store(#[from] crate::attempts::StoreError),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),
}
