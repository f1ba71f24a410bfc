//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - sqlsandbox.toml (default configuration)
//! - sqlsandbox.local.toml (git-ignored local overrides)
//! - Environment variables (SQLSANDBOX_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # sqlsandbox.toml
//! [database]
//! host = "db.internal"
//! dbname = "practice"
//! user = "sandbox_reader"
//!
//! [execution]
//! query_timeout_ms = 5000
//! max_rows = 1000
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! SQLSANDBOX_DATABASE__HOST=10.0.0.5
//! SQLSANDBOX_EXECUTION__MAX_ROWS=500
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection parameters for the shared relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,

    #[serde(default = "default_db_port")]
    pub port: u16,

    #[serde(default = "default_db_name")]
    pub dbname: String,

    #[serde(default = "default_db_user")]
    pub user: String,

    /// Password (empty = none, e.g. trust or peer auth)
    #[serde(default)]
    pub password: String,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Reported to the server as `application_name`
    #[serde(default = "default_application_name")]
    pub application_name: String,
}

/// Connection pool sizing and wait bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent sessions
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// How long `acquire` waits for a free session before failing as exhausted
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Idle sessions older than this are closed instead of reused. 0 = never.
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

/// Resource bounds applied to every sandboxed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Server-side statement timeout in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Maximum rows returned to the caller
    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    /// Maximum accepted query length in characters
    #[serde(default = "default_max_query_length")]
    pub max_query_length: usize,

    /// Extra client-side budget on top of the statement timeout before the
    /// session is abandoned
    #[serde(default = "default_client_grace_ms")]
    pub client_grace_ms: u64,
}

/// Background attempt recording
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Attempts waiting to be persisted before new ones are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Rows kept in an attempt's result sample
    #[serde(default = "default_sample_rows")]
    pub sample_rows: usize,
}

/// Where attempts are persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// Table name for the postgres backend
    #[serde(default = "default_store_table")]
    pub table: String,
}

/// Attempt store backend options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local, lost on restart
    #[default]
    Memory,
    /// Same database as the sandbox, separate read-write pool
    Postgres,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_db_host() -> String {
    "localhost".to_string()
}
fn default_db_port() -> u16 {
    5432
}
fn default_db_name() -> String {
    "sandbox".to_string()
}
fn default_db_user() -> String {
    "sandbox_reader".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_application_name() -> String {
    "sqlsandbox".to_string()
}
fn default_pool_max_size() -> usize {
    20
}
fn default_acquire_timeout_ms() -> u64 {
    5_000
}
fn default_idle_timeout_ms() -> u64 {
    30_000
}
fn default_query_timeout_ms() -> u64 {
    5_000
}
fn default_max_rows() -> usize {
    1_000
}
fn default_max_query_length() -> usize {
    10_000
}
fn default_client_grace_ms() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_queue_capacity() -> usize {
    1_024
}
fn default_sample_rows() -> usize {
    10
}
fn default_store_table() -> String {
    "query_attempts".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. sqlsandbox.toml (base configuration)
    /// 2. sqlsandbox.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (SQLSANDBOX_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("sqlsandbox.toml"))
            .merge(Toml::file("sqlsandbox.local.toml"))
            .merge(Env::prefixed("SQLSANDBOX_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SQLSANDBOX_").split("__"))
            .extract()
    }

    /// Create default configuration
    pub fn default() -> Self {
        Config {
            database: DatabaseConfig::default(),
            pool: PoolConfig::default(),
            execution: ExecutionConfig::default(),
            recorder: RecorderConfig::default(),
            store: StoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default()
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// `None` when idle sessions are kept indefinitely
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            host: default_db_host(),
            port: default_db_port(),
            dbname: default_db_name(),
            user: default_db_user(),
            password: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
            application_name: default_application_name(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        PoolConfig {
            max_size: default_pool_max_size(),
            acquire_timeout_ms: default_acquire_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            query_timeout_ms: default_query_timeout_ms(),
            max_rows: default_max_rows(),
            max_query_length: default_max_query_length(),
            client_grace_ms: default_client_grace_ms(),
        }
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        RecorderConfig {
            enabled: true,
            queue_capacity: default_queue_capacity(),
            sample_rows: default_sample_rows(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: StoreBackend::Memory,
            table: default_store_table(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
