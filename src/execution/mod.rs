//! Query Execution Module
//!
//! Runs validated queries on pooled sessions under per-execution limits:
//! - Session reset on every checkout, so no settings carry over between requests
//! - Server-side statement timeout, set on the session before every query
//! - Client-side deadline of `timeout + grace` as a backstop
//! - Row cap with truncation detection (`LIMIT max_rows + 1`)
//!
//! Every database failure is turned into an [`ExecutionOutcome::Failure`]
//! by the classifier; nothing here returns an error to the caller.

mod limits;
mod timeout;

pub use limits::{has_row_limit, ExecutionLimits, LimitError};
pub use timeout::{DeadlineError, QueryClock};

use crate::classifier::{
    classify, classify_pool_error, classify_timeout, ClassifiedError, ErrorCategory,
};
use crate::outcome::{ExecutionOutcome, QueryFailure, QuerySuccess, Row, TotalCount};
use crate::pool::{Pool, PooledSession, ResultSet, Session, SessionManager};
use crate::validator::{is_plain_identifier, ValidatedQuery};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Default number of sample rows returned by [`Executor::describe_table`]
pub const DEFAULT_SAMPLE_SIZE: usize = 5;

/// Longest query prefix that ever reaches a log line
const LOG_PREVIEW_CHARS: usize = 48;

/// Column metadata from `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
}

/// Shape and a few example rows of one table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDescription {
    pub table_name: String,
    pub columns: Vec<ColumnInfo>,
    pub sample_data: Vec<Row>,
    pub row_count: usize,
}

/// Runs queries against a session pool.
pub struct Executor<M: SessionManager> {
    pool: Pool<M>,
    defaults: ExecutionLimits,
    client_grace: Duration,
}

impl<M: SessionManager> Clone for Executor<M> {
    fn clone(&self) -> Self {
        Executor {
            pool: self.pool.clone(),
            defaults: self.defaults,
            client_grace: self.client_grace,
        }
    }
}

impl<M: SessionManager> Executor<M> {
    pub fn new(pool: Pool<M>, defaults: ExecutionLimits, client_grace: Duration) -> Self {
        Executor {
            pool,
            defaults,
            client_grace,
        }
    }

    pub fn pool(&self) -> &Pool<M> {
        &self.pool
    }

    /// Limits used when the caller does not pass its own
    pub fn defaults(&self) -> ExecutionLimits {
        self.defaults
    }

    /// Execute with the configured default limits.
    pub async fn execute_default(&self, query: &ValidatedQuery) -> ExecutionOutcome {
        self.execute(query, self.defaults).await
    }

    /// Execute one validated query.
    pub async fn execute(&self, query: &ValidatedQuery, limits: ExecutionLimits) -> ExecutionOutcome {
        let sql = limits.apply_row_limit(query.as_str());
        debug!(
            query_len = sql.len(),
            preview = query_preview(&sql),
            timeout_ms = limits.timeout_ms(),
            max_rows = limits.max_rows(),
            "query_execute"
        );

        let (mut set, execution_time_ms) = match self.run(&sql, limits).await {
            Ok(done) => done,
            Err(failure) => return ExecutionOutcome::Failure(failure),
        };

        let truncated = limits.truncate(&mut set.rows);
        let row_count = set.rows.len();
        let (total_count, note) = if truncated {
            (
                TotalCount::AtLeast(limits.max_rows()),
                Some(limits.truncation_note()),
            )
        } else {
            (TotalCount::Exact(row_count), None)
        };

        debug!(row_count, truncated, execution_time_ms, "query_succeeded");
        ExecutionOutcome::Success(QuerySuccess {
            rows: set.rows,
            columns: set.columns,
            row_count,
            total_count,
            execution_time_ms,
            truncated,
            note,
        })
    }

    /// Column metadata and up to `sample_size` rows of a table. The sample
    /// never exceeds the row cap.
    ///
    /// The name is spliced unquoted, so Postgres folds it to lower case just
    /// as it would in a user query; the metadata lookup uses the folded name.
    pub async fn describe_table(
        &self,
        table: &str,
        sample_size: usize,
    ) -> Result<TableDescription, QueryFailure> {
        if !is_plain_identifier(table) {
            return Err(QueryFailure {
                category: ErrorCategory::InvalidInput,
                message: format!("invalid table name: {table}"),
                execution_time_ms: 0,
            });
        }

        // The identifier check above rules out quotes, so splicing is safe
        let folded = table.to_ascii_lowercase();
        let metadata_sql = format!(
            "SELECT column_name, data_type, is_nullable, column_default \
             FROM information_schema.columns \
             WHERE table_name = '{folded}' \
             ORDER BY ordinal_position"
        );
        let sample_size = sample_size.min(self.defaults.max_rows());
        let sample_sql = format!("SELECT * FROM {table} LIMIT {sample_size}");

        let (metadata, _) = self.run(&metadata_sql, self.defaults).await?;
        let (sample, _) = self.run(&sample_sql, self.defaults).await?;

        let columns = metadata.rows.iter().map(column_info).collect();
        let row_count = sample.rows.len();
        Ok(TableDescription {
            table_name: table.to_string(),
            columns,
            sample_data: sample.rows,
            row_count,
        })
    }

    /// Acquire, reset, run. The session goes back to the pool on every path
    /// and is discarded when its state is unknown.
    async fn run(&self, sql: &str, limits: ExecutionLimits) -> Result<(ResultSet, u64), QueryFailure> {
        let mut session = match self.pool.acquire().await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "session_acquire_failed");
                return Err(failed(classify_pool_error(&e), 0));
            }
        };

        if let Err(e) = session.reset(limits.timeout()).await {
            // Settings from an earlier checkout may still be in effect
            session.discard();
            warn!(error = %e, "session_reset_failed");
            return Err(failed(classify(&e, limits.timeout_ms()), 0));
        }

        let clock = QueryClock::with_grace(limits.timeout(), self.client_grace);
        let result = clock.run(session.query(sql)).await;
        let elapsed_ms = clock.elapsed_ms();

        match result {
            Ok(Ok(set)) => Ok((set, elapsed_ms)),
            Ok(Err(e)) => {
                discard_if_lost(&mut session, e.connection_lost);
                debug!(
                    code = e.code().unwrap_or(""),
                    elapsed_ms, "query_failed"
                );
                Err(failed(classify(&e, limits.timeout_ms()), elapsed_ms))
            }
            Err(deadline) => {
                // The statement may still be running server-side
                session.discard();
                warn!(error = %deadline, "client_deadline_exceeded");
                Err(failed(classify_timeout(limits.timeout_ms()), elapsed_ms))
            }
        }
    }
}

fn discard_if_lost<M: SessionManager>(session: &mut PooledSession<M>, lost: bool) {
    if lost || session.is_broken() {
        session.discard();
    }
}

fn failed(error: ClassifiedError, execution_time_ms: u64) -> QueryFailure {
    QueryFailure {
        category: error.category,
        message: error.message,
        execution_time_ms,
    }
}

fn column_info(row: &Row) -> ColumnInfo {
    let text = |key: &str| {
        row.get(key)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };
    ColumnInfo {
        name: text("column_name").unwrap_or_default(),
        data_type: text("data_type").unwrap_or_default(),
        nullable: text("is_nullable").is_some_and(|v| v.eq_ignore_ascii_case("YES")),
        default: text("column_default"),
    }
}

/// First few characters of a query, for log lines.
pub(crate) fn query_preview(sql: &str) -> &str {
    match sql.char_indices().nth(LOG_PREVIEW_CHARS) {
        Some((idx, _)) => &sql[..idx],
        None => sql,
    }
}
