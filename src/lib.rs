//! # sqlsandbox
//!
//! Runs untrusted, user-written SQL against a shared relational store under
//! strict read-only, time and row limits, and records every attempt.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! QueryRequest { query, assignment_id, actor }
//!     ↓
//! [Validator]        → Accepted(ValidatedQuery) | Rejected(reason)
//!     ↓
//! [Pool]             → bounded session checkout (PoolExhausted on timeout)
//!     ↓
//! [Executor]         → session reset, statement_timeout, LIMIT max_rows + 1, wall clock
//!     ↓
//! [Error Classifier] → SQLSTATE → ErrorCategory + user message
//!     ↓
//! ExecutionOutcome ──→ caller
//!     ↓
//! [Attempt Recorder] → background queue → AttemptStore
//!     ↓
//! [Stats Aggregator] → StatsSummary per user
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sqlsandbox::{ActorIdentity, Config, QueryEngine, QueryRequest};
//!
//! let config = Config::load()?;
//! let engine = QueryEngine::from_config(&config).await?;
//!
//! let request = QueryRequest::new(
//!     "SELECT name, salary FROM employees",
//!     "assignment-7",
//!     ActorIdentity::Session("browser-42".into()),
//! )?;
//! let outcome = engine.execute(&request).await;
//! println!("{}", serde_json::to_string(&outcome.to_response())?);
//!
//! engine.shutdown().await;
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `validator` | Lexical read-only filter |
//! | `pool` | Bounded session pool, Postgres sessions |
//! | `execution` | Limits, client deadline, executor |
//! | `classifier` | Database error → category |
//! | `attempts` | Attempt model, stores, background recorder |
//! | `stats` | Per-user aggregates |
//! | `engine` | Request-level orchestration |

pub mod config;          // Configuration system
pub mod error;           // DbError, SandboxError
pub mod request;         // QueryRequest, ActorIdentity
pub mod validator;       // Lexical query filter
pub mod classifier;      // SQLSTATE → ErrorCategory
pub mod outcome;         // ExecutionOutcome and wire shape
pub mod pool;            // Session pool
pub mod execution;       // Executor, limits, deadline
pub mod attempts;        // Attempt persistence
pub mod stats;           // StatsSummary
pub mod engine;          // QueryEngine

// Re-export public types
pub use attempts::{Attempt, AttemptRecorder, AttemptStore, AttemptSummary, StoreError};
pub use classifier::{classify, ClassifiedError, ErrorCategory};
pub use config::Config;
pub use engine::{EngineCounters, QueryEngine};
pub use error::{DbError, SandboxError};
pub use execution::{ExecutionLimits, Executor, TableDescription};
pub use outcome::{Column, ExecutionOutcome, ExecutionResponse, Row, TotalCount};
pub use pool::{Pool, PoolError, PoolOptions, Session, SessionManager};
pub use request::{ActorIdentity, QueryRequest, RequestError};
pub use stats::{compute_stats, StatsAggregator, StatsError, StatsSummary};
pub use validator::{validate, ValidatedQuery, ValidationResponse, ValidationResult, Validator};
