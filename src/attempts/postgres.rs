//! Postgres attempt store.
//!
//! Uses its own writable session pool; the sandbox pool is read-only. The
//! table is created on startup if missing.

use super::{Attempt, AttemptStore, AttemptSummary, StoreError};
use crate::pool::{PgManager, Pool};
use crate::request::ActorIdentity;
use crate::validator::is_plain_identifier;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

const SUMMARY_COLUMNS: &str =
    "id, assignment_id, query, success, row_count, execution_time_ms, error_message, created_at";

/// Attempts in a Postgres table
pub struct PgAttemptStore {
    pool: Pool<PgManager>,
    table: String,
}

impl PgAttemptStore {
    /// Wrap a writable pool. Fails if `table` is not a plain identifier.
    pub fn new(pool: Pool<PgManager>, table: &str) -> Result<Self, StoreError> {
        if !is_plain_identifier(table) {
            return Err(StoreError::InvalidTable(table.to_string()));
        }
        Ok(PgAttemptStore {
            pool,
            table: table.to_string(),
        })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table and its lookup index if they do not exist.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let session = self.pool.acquire().await?;
        session.client().batch_execute(&create_table_sql(&self.table)).await?;
        info!(table = %self.table, "attempt_store_ready");
        Ok(())
    }

    async fn select(
        &self,
        sql: &str,
        params: &[&(dyn tokio_postgres::types::ToSql + Sync)],
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let session = self.pool.acquire().await?;
        let rows = session.client().query(sql, params).await?;
        rows.iter().map(summary_from_row).collect()
    }
}

#[async_trait]
impl AttemptStore for PgAttemptStore {
    async fn insert(&self, attempt: &Attempt) -> Result<(), StoreError> {
        let (kind, actor_id) = actor_key(&attempt.actor);
        let sample = attempt
            .result_sample
            .as_ref()
            .map(serde_json::to_value)
            .transpose()?;
        let row_count = i64::try_from(attempt.row_count).unwrap_or(i64::MAX);
        let execution_time_ms = i64::try_from(attempt.execution_time_ms).unwrap_or(i64::MAX);

        let sql = format!(
            "INSERT INTO {} (id, actor_kind, actor_id, assignment_id, query, success, \
             row_count, execution_time_ms, error_message, result_sample, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            self.table
        );
        let session = self.pool.acquire().await?;
        session
            .client()
            .execute(
                &sql,
                &[
                    &attempt.id,
                    &kind,
                    &actor_id,
                    &attempt.assignment_id,
                    &attempt.query,
                    &attempt.success,
                    &row_count,
                    &execution_time_ms,
                    &attempt.error_message,
                    &sample,
                    &attempt.created_at,
                ],
            )
            .await?;
        Ok(())
    }

    async fn recent(
        &self,
        actor: &ActorIdentity,
        assignment_id: &str,
        limit: usize,
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let (kind, actor_id) = actor_key(actor);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM {} \
             WHERE actor_kind = $1 AND actor_id = $2 AND assignment_id = $3 \
             ORDER BY created_at DESC LIMIT $4",
            self.table
        );
        self.select(&sql, &[&kind, &actor_id, &assignment_id, &limit])
            .await
    }

    async fn for_actor(&self, actor: &ActorIdentity) -> Result<Vec<AttemptSummary>, StoreError> {
        let (kind, actor_id) = actor_key(actor);
        let sql = format!(
            "SELECT {SUMMARY_COLUMNS} FROM {} \
             WHERE actor_kind = $1 AND actor_id = $2 \
             ORDER BY created_at DESC",
            self.table
        );
        self.select(&sql, &[&kind, &actor_id]).await
    }
}

fn actor_key(actor: &ActorIdentity) -> (&'static str, &str) {
    match actor {
        ActorIdentity::User(id) => ("user", id.as_str()),
        ActorIdentity::Session(id) => ("session", id.as_str()),
    }
}

fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            actor_kind TEXT NOT NULL,
            actor_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            query TEXT NOT NULL,
            success BOOLEAN NOT NULL,
            row_count BIGINT NOT NULL,
            execution_time_ms BIGINT NOT NULL,
            error_message TEXT,
            result_sample JSONB,
            created_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        CREATE INDEX IF NOT EXISTS {table}_actor_idx
            ON {table} (actor_kind, actor_id, assignment_id, created_at DESC);"
    )
}

fn summary_from_row(row: &tokio_postgres::Row) -> Result<AttemptSummary, StoreError> {
    let row_count: i64 = row.try_get("row_count")?;
    let execution_time_ms: i64 = row.try_get("execution_time_ms")?;
    Ok(AttemptSummary {
        id: row.try_get::<_, Uuid>("id")?,
        assignment_id: row.try_get("assignment_id")?,
        query: row.try_get("query")?,
        success: row.try_get("success")?,
        row_count: usize::try_from(row_count).unwrap_or(0),
        execution_time_ms: u64::try_from(execution_time_ms).unwrap_or(0),
        error_message: row.try_get("error_message")?,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at")?,
    })
}
