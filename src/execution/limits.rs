//! Resource Limits Module
//!
//! Per-execution bounds: the statement timeout and the row cap.
//!
//! ## Design
//!
//! The row cap is enforced twice: a `LIMIT max_rows + 1` clause is appended
//! when the query has no row-limiting clause of its own, and the rows read
//! back are cut to `max_rows`. The extra row is how truncation is detected
//! without a separate count query.

use crate::config::ExecutionConfig;
use crate::outcome::Row;
use crate::validator::sql_words;
use std::time::Duration;

/// Resource limit error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    #[error("Statement timeout must be at least 1ms")]
    ZeroTimeout,

    #[error("Row cap must be at least 1 row")]
    ZeroRows,
}

/// Bounds applied to one execution. Comes from configuration, never from
/// the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    timeout_ms: u64,
    max_rows: usize,
}

impl ExecutionLimits {
    pub fn new(timeout_ms: u64, max_rows: usize) -> Result<Self, LimitError> {
        if timeout_ms == 0 {
            return Err(LimitError::ZeroTimeout);
        }
        if max_rows == 0 {
            return Err(LimitError::ZeroRows);
        }
        Ok(ExecutionLimits {
            timeout_ms,
            max_rows,
        })
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn max_rows(&self) -> usize {
        self.max_rows
    }

    /// Append `LIMIT max_rows + 1` unless the query already limits its rows.
    /// A single trailing semicolon is dropped first.
    pub fn apply_row_limit(&self, sql: &str) -> String {
        if has_row_limit(sql) {
            return sql.to_string();
        }
        let body = sql.trim_end();
        let body = body.strip_suffix(';').unwrap_or(body).trim_end();
        format!("{body} LIMIT {}", self.max_rows + 1)
    }

    /// Cut rows down to the cap. Returns whether anything was dropped.
    pub fn truncate(&self, rows: &mut Vec<Row>) -> bool {
        if rows.len() > self.max_rows {
            rows.truncate(self.max_rows);
            true
        } else {
            false
        }
    }

    /// Note shown to the user when rows were dropped.
    pub fn truncation_note(&self) -> String {
        format!(
            "Results limited to {} rows. Your query returned more results.",
            self.max_rows
        )
    }
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        ExecutionLimits {
            timeout_ms: 5_000,
            max_rows: 1_000,
        }
    }
}

impl TryFrom<&ExecutionConfig> for ExecutionLimits {
    type Error = LimitError;

    fn try_from(config: &ExecutionConfig) -> Result<Self, Self::Error> {
        ExecutionLimits::new(config.query_timeout_ms, config.max_rows)
    }
}

/// True when the text contains `LIMIT` or `FETCH FIRST|NEXT` as whole words
/// outside string literals and quoted identifiers.
pub fn has_row_limit(sql: &str) -> bool {
    let text = without_quoted(sql);
    let mut previous_fetch = false;
    for word in sql_words(&text) {
        if word.eq_ignore_ascii_case("LIMIT") {
            return true;
        }
        if previous_fetch
            && (word.eq_ignore_ascii_case("FIRST") || word.eq_ignore_ascii_case("NEXT"))
        {
            return true;
        }
        previous_fetch = word.eq_ignore_ascii_case("FETCH");
    }
    false
}

/// Blank out `'...'` and `"..."` runs. A doubled quote closes and reopens
/// the run, so its contents stay blank.
fn without_quoted(sql: &str) -> String {
    let mut open: Option<char> = None;
    sql.chars()
        .map(|c| match open {
            Some(quote) => {
                if c == quote {
                    open = None;
                }
                ' '
            }
            None if c == '\'' || c == '"' => {
                open = Some(c);
                ' '
            }
            None => c,
        })
        .collect()
}
