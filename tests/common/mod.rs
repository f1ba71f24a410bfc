//! Scripted in-process session backend.
//!
//! Stands in for Postgres: returns generated rows, honours `LIMIT n`, sleeps
//! to simulate slow statements (`pg_sleep(n)` in the text adds its own
//! delay), and cancels them with SQLSTATE 57014 once the session's statement
//! timeout is exceeded. Each session keeps its own settings, changed by
//! `set_config('name', 'value', ...)` and read by `current_setting('name')`,
//! until the session is reset.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use sqlsandbox::config::Config;
use sqlsandbox::pool::ResultSet;
use sqlsandbox::{
    validate, Column, DbError, ExecutionLimits, Executor, Pool, PoolOptions, Row, Session,
    SessionManager, ValidatedQuery, ValidationResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// What the fake database does with the next statements
#[derive(Debug, Clone, Default)]
pub struct Script {
    /// Rows the table holds
    pub rows: usize,
    /// Minimum time each statement takes server-side
    pub delay: Duration,
    /// Fail every statement with this error
    pub error: Option<DbError>,
    /// Never answer, ignoring the statement timeout
    pub hang: bool,
    /// Refuse new connections
    pub fail_connect: bool,
}

impl Script {
    pub fn rows(rows: usize) -> Self {
        Script {
            rows,
            ..Script::default()
        }
    }

    pub fn slow(rows: usize, delay: Duration) -> Self {
        Script {
            rows,
            delay,
            ..Script::default()
        }
    }

    pub fn failing(error: DbError) -> Self {
        Script {
            error: Some(error),
            ..Script::default()
        }
    }
}

/// Shared state behind every fake session
#[derive(Debug, Default)]
pub struct FakeBackend {
    script: Mutex<Script>,
    executed: Mutex<Vec<String>>,
    connects: AtomicUsize,
    resets: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeBackend {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(FakeBackend {
            script: Mutex::new(script),
            ..FakeBackend::default()
        })
    }

    pub fn set_script(&self, script: Script) {
        *self.script.lock() = script;
    }

    /// Statements received, in order
    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().clone()
    }

    pub fn last_statement(&self) -> Option<String> {
        self.executed.lock().last().cloned()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn resets(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }

    /// Highest number of statements running at once
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

pub struct FakeManager {
    backend: Arc<FakeBackend>,
}

pub struct FakeSession {
    backend: Arc<FakeBackend>,
    statement_timeout: Option<Duration>,
    settings: HashMap<String, String>,
    broken: bool,
}

struct ActiveGuard<'a>(&'a FakeBackend);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionManager for FakeManager {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, DbError> {
        if self.backend.script.lock().fail_connect {
            return Err(DbError::connection("connection refused"));
        }
        self.backend.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            backend: Arc::clone(&self.backend),
            statement_timeout: None,
            settings: session_defaults(),
            broken: false,
        })
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn reset(&mut self, statement_timeout: Duration) -> Result<(), DbError> {
        self.backend.resets.fetch_add(1, Ordering::SeqCst);
        self.settings = session_defaults();
        self.statement_timeout = Some(statement_timeout);
        Ok(())
    }

    async fn query(&mut self, sql: &str) -> Result<ResultSet, DbError> {
        self.backend.executed.lock().push(sql.to_string());
        let script = self.backend.script.lock().clone();

        let running = self.backend.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.backend.max_active.fetch_max(running, Ordering::SeqCst);
        let _active = ActiveGuard(&self.backend);

        if script.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        let delay = sleep_of(sql).map_or(script.delay, |own| own.max(script.delay));
        if !delay.is_zero() {
            match self.statement_timeout {
                Some(limit) if delay > limit => {
                    tokio::time::sleep(limit).await;
                    return Err(DbError::with_code(
                        "57014",
                        "canceling statement due to statement timeout",
                    ));
                }
                _ => tokio::time::sleep(delay).await,
            }
        }
        if let Some(error) = script.error {
            if error.connection_lost {
                self.broken = true;
            }
            return Err(error);
        }
        if sql.contains("information_schema") {
            return Ok(column_metadata());
        }
        if let Some(call) = sql.find("set_config(").map(|at| &sql[at..]) {
            if let [name, value, ..] = quoted(call).as_slice() {
                self.settings.insert(name.to_string(), value.to_string());
                return Ok(single("set_config", value));
            }
        }
        if let Some(call) = sql.find("current_setting(").map(|at| &sql[at..]) {
            if let Some(name) = quoted(call).first() {
                let value = self.settings.get(*name).cloned().unwrap_or_default();
                return Ok(single("current_setting", &value));
            }
        }

        let count = limit_of(sql).map_or(script.rows, |limit| limit.min(script.rows));
        Ok(ResultSet {
            columns: vec![Column::new("id", "int4"), Column::new("name", "text")],
            rows: (0..count).map(row).collect(),
        })
    }

    fn is_broken(&self) -> bool {
        self.broken
    }
}

fn session_defaults() -> HashMap<String, String> {
    HashMap::from([
        ("default_transaction_read_only".to_string(), "on".to_string()),
        ("search_path".to_string(), "\"$user\", public".to_string()),
    ])
}

fn single(column: &str, value: &str) -> ResultSet {
    let mut row = Row::new();
    row.insert(column.to_string(), json!(value));
    ResultSet {
        columns: vec![Column::new(column, "text")],
        rows: vec![row],
    }
}

/// Contents of each `'...'` run
fn quoted(text: &str) -> Vec<&str> {
    text.split('\'').skip(1).step_by(2).collect()
}

/// Seconds passed to `pg_sleep(...)`, if the statement calls it
fn sleep_of(sql: &str) -> Option<Duration> {
    let start = sql.find("pg_sleep(")? + "pg_sleep(".len();
    let end = start + sql[start..].find(')')?;
    sql[start..end]
        .trim()
        .parse::<f64>()
        .ok()
        .map(Duration::from_secs_f64)
}

fn row(i: usize) -> Row {
    let mut row = Row::new();
    row.insert("id".to_string(), json!(i));
    row.insert("name".to_string(), json!(format!("row-{i}")));
    row
}

fn column_metadata() -> ResultSet {
    let meta = |name: &str, data_type: &str, nullable: &str, default: serde_json::Value| {
        let mut row = Row::new();
        row.insert("column_name".into(), json!(name));
        row.insert("data_type".into(), json!(data_type));
        row.insert("is_nullable".into(), json!(nullable));
        row.insert("column_default".into(), default);
        row
    };
    ResultSet {
        columns: vec![
            Column::new("column_name", "name"),
            Column::new("data_type", "varchar"),
            Column::new("is_nullable", "varchar"),
            Column::new("column_default", "varchar"),
        ],
        rows: vec![
            meta("id", "integer", "NO", json!("nextval('t_id_seq'::regclass)")),
            meta("name", "text", "YES", serde_json::Value::Null),
        ],
    }
}

/// Number after the last `LIMIT` keyword, if any
fn limit_of(sql: &str) -> Option<usize> {
    let words: Vec<&str> = sql.split_whitespace().collect();
    words
        .iter()
        .rposition(|w| w.eq_ignore_ascii_case("LIMIT"))
        .and_then(|i| words.get(i + 1))
        .and_then(|n| n.trim_end_matches(';').parse().ok())
}

// ============================================================================
// Builders
// ============================================================================

pub fn fake_pool(
    script: Script,
    max_size: usize,
    acquire_timeout: Duration,
) -> (Pool<FakeManager>, Arc<FakeBackend>) {
    let backend = FakeBackend::new(script);
    let pool = Pool::new(
        FakeManager {
            backend: Arc::clone(&backend),
        },
        PoolOptions {
            max_size,
            acquire_timeout,
            idle_timeout: None,
        },
    );
    (pool, backend)
}

pub fn fake_executor(
    script: Script,
    max_size: usize,
    limits: ExecutionLimits,
) -> (Executor<FakeManager>, Arc<FakeBackend>) {
    let (pool, backend) = fake_pool(script, max_size, Duration::from_millis(100));
    (
        Executor::new(pool, limits, Duration::from_millis(100)),
        backend,
    )
}

pub fn limits(timeout_ms: u64, max_rows: usize) -> ExecutionLimits {
    ExecutionLimits::new(timeout_ms, max_rows).expect("valid limits")
}

pub fn validated(sql: &str) -> ValidatedQuery {
    match validate(sql) {
        ValidationResult::Accepted(query) => query,
        ValidationResult::Rejected(reason) => panic!("{sql:?} rejected: {reason}"),
    }
}

/// Engine configuration with small, fast limits
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.execution.query_timeout_ms = 200;
    config.execution.max_rows = 100;
    config.execution.client_grace_ms = 100;
    config.pool.max_size = 4;
    config.pool.acquire_timeout_ms = 100;
    config
}
