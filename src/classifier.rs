//! Error Classifier
//!
//! Maps database failures onto the closed set of categories users see. The
//! category set is the stable contract; only [`SQLSTATE_CATEGORIES`] knows
//! about Postgres codes, so a different backend only changes that table.

use crate::error::DbError;
use crate::pool::PoolError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// User-facing failure categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Rejected by the validator; message is safe to show verbatim
    InvalidInput,
    /// No session became free in time; retry later
    PoolExhausted,
    Timeout,
    UnknownTable,
    UnknownColumn,
    SyntaxError,
    Generic,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::InvalidInput => "InvalidInput",
            ErrorCategory::PoolExhausted => "PoolExhausted",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::UnknownTable => "UnknownTable",
            ErrorCategory::UnknownColumn => "UnknownColumn",
            ErrorCategory::SyntaxError => "SyntaxError",
            ErrorCategory::Generic => "Generic",
        }
    }

    /// Whether the same request may succeed if simply sent again later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::PoolExhausted)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A category plus the message shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
}

/// Exact SQLSTATE matches, checked before the class fallback.
pub const SQLSTATE_CATEGORIES: &[(&str, ErrorCategory)] = &[
    ("57014", ErrorCategory::Timeout),
    ("42P01", ErrorCategory::UnknownTable),
    ("42703", ErrorCategory::UnknownColumn),
];

/// SQLSTATE class 42: syntax error or access rule violation.
const SYNTAX_CLASS_PREFIX: &str = "42";

/// Classify a database failure. Total: unknown codes and code-less errors
/// fall back to `Generic` with the driver message unchanged.
pub fn classify(error: &DbError, timeout_ms: u64) -> ClassifiedError {
    let category = error.code().map_or(ErrorCategory::Generic, category_for_code);
    ClassifiedError {
        category,
        message: message_for(category, &error.message, timeout_ms),
    }
}

/// Classify a client-side deadline expiry (the server never answered).
pub fn classify_timeout(timeout_ms: u64) -> ClassifiedError {
    ClassifiedError {
        category: ErrorCategory::Timeout,
        message: message_for(ErrorCategory::Timeout, "", timeout_ms),
    }
}

/// Classify a failure to obtain a session.
pub fn classify_pool_error(error: &PoolError) -> ClassifiedError {
    match error {
        PoolError::Exhausted { .. } | PoolError::Closed => ClassifiedError {
            category: ErrorCategory::PoolExhausted,
            message: "Service busy: no database session available, please retry shortly."
                .to_string(),
        },
        PoolError::Connect(db) => ClassifiedError {
            category: ErrorCategory::Generic,
            message: db.message.clone(),
        },
    }
}

fn category_for_code(code: &str) -> ErrorCategory {
    SQLSTATE_CATEGORIES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, category)| *category)
        .unwrap_or_else(|| {
            if code.starts_with(SYNTAX_CLASS_PREFIX) {
                ErrorCategory::SyntaxError
            } else {
                ErrorCategory::Generic
            }
        })
}

fn message_for(category: ErrorCategory, detail: &str, timeout_ms: u64) -> String {
    match category {
        ErrorCategory::Timeout => {
            format!("Query timeout: execution exceeded {timeout_ms}ms limit.")
        }
        ErrorCategory::UnknownTable => format!("Table not found: {detail}"),
        ErrorCategory::UnknownColumn => format!("Column not found: {detail}"),
        ErrorCategory::SyntaxError => format!("SQL syntax error: {detail}"),
        ErrorCategory::InvalidInput | ErrorCategory::PoolExhausted | ErrorCategory::Generic => {
            detail.to_string()
        }
    }
}
