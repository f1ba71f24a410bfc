//! Attempt Persistence
//!
//! Every execution, successful or not, leaves one immutable [`Attempt`].
//! Attempts are written by a background [`AttemptRecorder`] so persistence
//! never sits on the request path, and read back for history and stats.
//!
//! ```text
//! engine ──record()──▶ bounded queue ──▶ worker ──insert()──▶ AttemptStore
//!                                                               ├── MemoryAttemptStore
//!                                                               └── PgAttemptStore
//! ```

pub mod memory;
pub mod postgres;
mod recorder;

pub use memory::MemoryAttemptStore;
pub use postgres::PgAttemptStore;
pub use recorder::{AttemptRecorder, RecorderStatus};

use crate::error::DbError;
use crate::outcome::{ExecutionOutcome, Row};
use crate::pool::PoolError;
use crate::request::{ActorIdentity, QueryRequest};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Rows kept in an attempt's result sample, whatever the row cap.
pub const MAX_SAMPLE_ROWS: usize = 10;

/// Default number of entries returned by history lookups
pub const DEFAULT_HISTORY_LIMIT: usize = 10;

/// Attempt store errors
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing database refused or failed the operation
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    /// No session available for the write
    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    /// Result sample could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configured table name is not a plain identifier
    #[error("Invalid table name: {0}")]
    InvalidTable(String),

    /// Store is not reachable
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Database(DbError::from(err))
    }
}

/// One recorded execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attempt {
    pub id: Uuid,
    pub actor: ActorIdentity,
    pub assignment_id: String,
    pub query: String,
    pub success: bool,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
    /// First few rows of a successful result
    pub result_sample: Option<Vec<Row>>,
    pub created_at: DateTime<Utc>,
}

impl Attempt {
    /// Build the record for one finished execution. The stored text is cut to
    /// `max_query_len` characters and the sample to `sample_rows` rows (never
    /// more than [`MAX_SAMPLE_ROWS`]).
    pub fn from_outcome(
        request: &QueryRequest,
        outcome: &ExecutionOutcome,
        sample_rows: usize,
        max_query_len: usize,
    ) -> Self {
        let sample_rows = sample_rows.min(MAX_SAMPLE_ROWS);
        let result_sample = outcome
            .as_success()
            .map(|s| s.rows.iter().take(sample_rows).cloned().collect());
        Attempt {
            id: Uuid::new_v4(),
            actor: request.actor().clone(),
            assignment_id: request.assignment_id().to_string(),
            query: request.query().chars().take(max_query_len).collect(),
            success: outcome.is_success(),
            row_count: outcome.row_count(),
            execution_time_ms: outcome.execution_time_ms(),
            error_message: outcome.error_message().map(str::to_string),
            result_sample,
            created_at: Utc::now(),
        }
    }

    pub fn summary(&self) -> AttemptSummary {
        AttemptSummary::from(self)
    }
}

/// History entry: an attempt without its actor or result sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    pub id: Uuid,
    pub assignment_id: String,
    pub query: String,
    pub success: bool,
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Attempt> for AttemptSummary {
    fn from(attempt: &Attempt) -> Self {
        AttemptSummary {
            id: attempt.id,
            assignment_id: attempt.assignment_id.clone(),
            query: attempt.query.clone(),
            success: attempt.success,
            row_count: attempt.row_count,
            execution_time_ms: attempt.execution_time_ms,
            error_message: attempt.error_message.clone(),
            created_at: attempt.created_at,
        }
    }
}

/// Durable attempt storage
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    /// Persist one attempt. Attempts are never updated afterwards.
    async fn insert(&self, attempt: &Attempt) -> Result<(), StoreError>;

    /// Most recent attempts of `actor` on one assignment, newest first.
    async fn recent(
        &self,
        actor: &ActorIdentity,
        assignment_id: &str,
        limit: usize,
    ) -> Result<Vec<AttemptSummary>, StoreError>;

    /// Every attempt of `actor`, newest first.
    async fn for_actor(&self, actor: &ActorIdentity) -> Result<Vec<AttemptSummary>, StoreError>;
}
