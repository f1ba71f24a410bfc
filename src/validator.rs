//! Lexical Query Validator
//!
//! Decides whether a piece of untrusted SQL text may be sent to the database.
//! This is a pattern filter, not a parser: it rejects anything that mentions a
//! write/DDL keyword, contains a comment, stacks statements, or does not start
//! with `SELECT`. Sessions additionally run under a read-only transaction
//! default, so the filter is never the only line of defence.
//!
//! Rules, first match wins:
//!
//! | # | Condition | Reason |
//! |---|-----------|--------|
//! | 1 | empty after trimming | `query is required` |
//! | 2 | longer than the length limit | `exceeds maximum length` |
//! | 3 | forbidden keyword as a whole word | `forbidden operation` |
//! | 4 | `--` or `/*` | `forbidden operation` |
//! | 5 | `;` followed by more text | `forbidden operation` |
//! | 6 | does not start with `SELECT` | `only read queries are allowed` |

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// Keywords that may not appear anywhere in a sandboxed query.
pub const FORBIDDEN_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "ALTER", "CREATE", "INSERT", "UPDATE", "GRANT", "REVOKE",
    "EXECUTE", "COPY",
];

/// Default maximum accepted query length, in characters.
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 10_000;

/// Why a query was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Empty,
    TooLong,
    ForbiddenOperation,
    NotReadOnly,
}

impl RejectReason {
    pub fn message(self) -> &'static str {
        match self {
            RejectReason::Empty => "query is required",
            RejectReason::TooLong => "exceeds maximum length",
            RejectReason::ForbiddenOperation => "forbidden operation",
            RejectReason::NotReadOnly => "only read queries are allowed",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Query text that passed validation. Only the validator constructs these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery(String);

impl ValidatedQuery {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Deref for ValidatedQuery {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ValidatedQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outcome of validating one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Accepted(ValidatedQuery),
    Rejected(RejectReason),
}

impl ValidationResult {
    pub fn is_accepted(&self) -> bool {
        matches!(self, ValidationResult::Accepted(_))
    }

    pub fn reason(&self) -> Option<RejectReason> {
        match self {
            ValidationResult::Accepted(_) => None,
            ValidationResult::Rejected(reason) => Some(*reason),
        }
    }
}

/// Wire shape of the standalone validate operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&ValidationResult> for ValidationResponse {
    fn from(result: &ValidationResult) -> Self {
        match result {
            ValidationResult::Accepted(_) => ValidationResponse {
                valid: true,
                error: None,
            },
            ValidationResult::Rejected(reason) => ValidationResponse {
                valid: false,
                error: Some(reason.message().to_string()),
            },
        }
    }
}

/// Stateless validator carrying the configured length limit.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    max_length: usize,
}

impl Default for Validator {
    fn default() -> Self {
        Validator::new(DEFAULT_MAX_QUERY_LENGTH)
    }
}

impl Validator {
    pub fn new(max_length: usize) -> Self {
        Validator { max_length }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Validate an optional input; a missing query is rejected like an empty one.
    pub fn validate_input(&self, text: Option<&str>) -> ValidationResult {
        match text {
            Some(text) => self.validate(text),
            None => ValidationResult::Rejected(RejectReason::Empty),
        }
    }

    pub fn validate(&self, text: &str) -> ValidationResult {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return ValidationResult::Rejected(RejectReason::Empty);
        }
        if trimmed.chars().count() > self.max_length {
            return ValidationResult::Rejected(RejectReason::TooLong);
        }
        if contains_forbidden_keyword(trimmed)
            || contains_comment(trimmed)
            || has_stacked_statement(trimmed)
        {
            return ValidationResult::Rejected(RejectReason::ForbiddenOperation);
        }
        if !starts_with_keyword(trimmed, "SELECT") {
            return ValidationResult::Rejected(RejectReason::NotReadOnly);
        }
        ValidationResult::Accepted(ValidatedQuery(trimmed.to_string()))
    }
}

/// Validate with the default length limit.
pub fn validate(text: &str) -> ValidationResult {
    Validator::default().validate(text)
}

/// Split text into ASCII word runs (`[A-Za-z0-9_]+`). Everything else,
/// including non-ASCII letters, is a separator.
pub(crate) fn sql_words(text: &str) -> impl Iterator<Item = &str> {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
}

fn contains_forbidden_keyword(text: &str) -> bool {
    sql_words(text).any(|word| {
        FORBIDDEN_KEYWORDS
            .iter()
            .any(|keyword| word.eq_ignore_ascii_case(keyword))
    })
}

fn contains_comment(text: &str) -> bool {
    text.contains("--") || text.contains("/*")
}

fn has_stacked_statement(text: &str) -> bool {
    text.match_indices(';')
        .any(|(idx, _)| !text[idx + 1..].trim_start().is_empty())
}

/// Prefix test on the upper-cased text, matching `SELECT` even when directly
/// followed by punctuation such as `SELECT*`.
fn starts_with_keyword(text: &str, keyword: &str) -> bool {
    text.get(..keyword.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
}

/// True for a bare SQL identifier safe to splice into a statement.
pub fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let first_ok = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    first_ok && name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
