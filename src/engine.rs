//! Query Engine
//!
//! Request-level entry point: validate, execute, record, report.
//!
//! ```text
//! QueryRequest
//!     │
//!     ▼
//! Validator ──Rejected──▶ Failure(InvalidInput) ─┐
//!     │ Accepted                                 │
//!     ▼                                          │
//! Executor (pool → timeout → LIMIT → classify) ──┤
//!                                                ▼
//!                                  ExecutionOutcome ──▶ caller
//!                                                │
//!                                                └──▶ AttemptRecorder (background)
//! ```

use crate::attempts::{
    Attempt, AttemptRecorder, AttemptStore, AttemptSummary, MemoryAttemptStore, PgAttemptStore,
    RecorderStatus, StoreError, DEFAULT_HISTORY_LIMIT,
};
use crate::classifier::{ClassifiedError, ErrorCategory};
use crate::config::{Config, StoreBackend};
use crate::error::SandboxError;
use crate::execution::{ExecutionLimits, Executor, TableDescription, DEFAULT_SAMPLE_SIZE};
use crate::outcome::{ExecutionOutcome, QueryFailure};
use crate::pool::{PgManager, Pool, PoolOptions, PoolStatus, SessionManager};
use crate::request::{ActorIdentity, QueryRequest};
use crate::stats::{StatsAggregator, StatsError, StatsSummary};
use crate::validator::{ValidationResponse, ValidationResult, Validator};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Default)]
struct Counters {
    total: AtomicU64,
    successes: AtomicU64,
    rejections: AtomicU64,
}

/// Execution counters since the engine started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EngineCounters {
    pub total: u64,
    pub successes: u64,
    /// Requests turned away by the validator
    pub rejections: u64,
}

/// Validates, executes and records sandboxed queries.
pub struct QueryEngine<M: SessionManager> {
    validator: Validator,
    executor: Executor<M>,
    store: Arc<dyn AttemptStore>,
    recorder: AttemptRecorder,
    stats: StatsAggregator,
    sample_rows: usize,
    counters: Counters,
}

impl<M: SessionManager> QueryEngine<M> {
    /// Wire an engine from a session pool and an attempt store. Starts the
    /// recorder worker, so this must run inside a tokio runtime.
    pub fn new(
        pool: Pool<M>,
        store: Arc<dyn AttemptStore>,
        config: &Config,
    ) -> Result<Self, SandboxError> {
        let limits = ExecutionLimits::try_from(&config.execution)
            .map_err(|e| SandboxError::InvalidSetting(e.to_string()))?;
        let executor = Executor::new(
            pool,
            limits,
            Duration::from_millis(config.execution.client_grace_ms),
        );
        let recorder = if config.recorder.enabled {
            AttemptRecorder::spawn(Arc::clone(&store), config.recorder.queue_capacity)
        } else {
            AttemptRecorder::disabled()
        };

        Ok(QueryEngine {
            validator: Validator::new(config.execution.max_query_length),
            executor,
            stats: StatsAggregator::new(Arc::clone(&store)),
            store,
            recorder,
            sample_rows: config.recorder.sample_rows,
            counters: Counters::default(),
        })
    }

    /// Run one request end to end. Always yields an outcome; the attempt is
    /// queued for recording after the outcome is ready.
    pub async fn execute(&self, request: &QueryRequest) -> ExecutionOutcome {
        self.counters.total.fetch_add(1, Ordering::Relaxed);

        let outcome = match self.validator.validate(request.query()) {
            ValidationResult::Accepted(query) => self.executor.execute_default(&query).await,
            ValidationResult::Rejected(reason) => {
                self.counters.rejections.fetch_add(1, Ordering::Relaxed);
                ExecutionOutcome::failure(
                    ClassifiedError {
                        category: ErrorCategory::InvalidInput,
                        message: reason.message().to_string(),
                    },
                    0,
                )
            }
        };
        if outcome.is_success() {
            self.counters.successes.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            actor = %request.actor(),
            assignment_id = request.assignment_id(),
            success = outcome.is_success(),
            category = outcome.category().map_or("", ErrorCategory::as_str),
            row_count = outcome.row_count(),
            execution_time_ms = outcome.execution_time_ms(),
            "query_attempt"
        );

        self.recorder.record(Attempt::from_outcome(
            request,
            &outcome,
            self.sample_rows,
            self.validator.max_length(),
        ));
        outcome
    }

    /// Standalone validation, no execution and no record.
    pub fn validate(&self, query: Option<&str>) -> ValidationResponse {
        ValidationResponse::from(&self.validator.validate_input(query))
    }

    /// Stats for an authenticated user.
    pub async fn stats(&self, actor: &ActorIdentity) -> Result<StatsSummary, StatsError> {
        self.stats.compute(actor).await
    }

    /// Recent attempts on one assignment, newest first. A missing or zero
    /// limit means the default of 10.
    pub async fn history(
        &self,
        actor: &ActorIdentity,
        assignment_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let limit = limit
            .filter(|limit| *limit > 0)
            .unwrap_or(DEFAULT_HISTORY_LIMIT);
        self.store.recent(actor, assignment_id, limit).await
    }

    /// Columns and sample rows of a table (default sample of 5).
    pub async fn describe_table(
        &self,
        table: &str,
        sample_size: Option<usize>,
    ) -> Result<TableDescription, QueryFailure> {
        self.executor
            .describe_table(table, sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE))
            .await
    }

    pub fn counters(&self) -> EngineCounters {
        EngineCounters {
            total: self.counters.total.load(Ordering::Relaxed),
            successes: self.counters.successes.load(Ordering::Relaxed),
            rejections: self.counters.rejections.load(Ordering::Relaxed),
        }
    }

    pub fn recorder_status(&self) -> RecorderStatus {
        self.recorder.status()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.executor.pool().status()
    }

    pub fn limits(&self) -> ExecutionLimits {
        self.executor.defaults()
    }

    /// Drain queued attempts, then close the session pool.
    pub async fn shutdown(&self) {
        self.recorder.shutdown().await;
        self.executor.pool().close();
        let counters = self.counters();
        info!(
            total = counters.total,
            successes = counters.successes,
            rejections = counters.rejections,
            "engine_shutdown"
        );
    }
}

impl QueryEngine<PgManager> {
    /// Connect to Postgres and build the engine described by `config`.
    /// Fails fast if the first sandbox session cannot be opened.
    pub async fn from_config(config: &Config) -> Result<Self, SandboxError> {
        let options = PoolOptions::from(&config.pool);
        let pool = Pool::new(PgManager::read_only(&config.database), options);
        drop(pool.acquire().await?);

        let store: Arc<dyn AttemptStore> = match config.store.backend {
            StoreBackend::Memory => Arc::new(MemoryAttemptStore::new()),
            StoreBackend::Postgres => {
                let writer = Pool::new(PgManager::read_write(&config.database), options);
                let store = PgAttemptStore::new(writer, &config.store.table)?;
                store.migrate().await?;
                Arc::new(store)
            }
        };

        info!(
            host = %config.database.host,
            dbname = %config.database.dbname,
            pool_size = options.max_size,
            store = ?config.store.backend,
            "engine_ready"
        );
        QueryEngine::new(pool, store, config)
    }
}
