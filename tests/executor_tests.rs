//! Executor behaviour against the scripted backend: row cap, timeouts,
//! pool pressure and session release.

mod common;

use common::{fake_executor, fake_pool, limits, validated, Script};
use serde_json::json;
use sqlsandbox::outcome::TotalCount;
use sqlsandbox::{DbError, ErrorCategory, ExecutionOutcome, Executor};
use std::time::{Duration, Instant};

fn success(outcome: &ExecutionOutcome) -> &sqlsandbox::outcome::QuerySuccess {
    match outcome.as_success() {
        Some(success) => success,
        None => panic!("expected success, got {outcome:?}"),
    }
}

// ============================================================================
// Row cap
// ============================================================================

#[tokio::test]
async fn test_truncates_to_max_rows() {
    let (executor, backend) = fake_executor(Script::rows(1500), 2, limits(1_000, 1_000));
    let outcome = executor.execute(&validated("SELECT * FROM t"), limits(1_000, 1_000)).await;

    let result = success(&outcome);
    assert_eq!(result.row_count, 1000);
    assert_eq!(result.rows.len(), 1000);
    assert!(result.truncated);
    assert_eq!(result.total_count, TotalCount::AtLeast(1000));
    assert!(result.note.as_deref().is_some_and(|n| n.contains("1000 rows")));
    assert_eq!(
        backend.last_statement().as_deref(),
        Some("SELECT * FROM t LIMIT 1001")
    );
}

#[tokio::test]
async fn test_exact_row_count_not_truncated() {
    let (executor, _backend) = fake_executor(Script::rows(1000), 2, limits(1_000, 1_000));
    let outcome = executor.execute_default(&validated("SELECT * FROM t")).await;

    let result = success(&outcome);
    assert_eq!(result.row_count, 1000);
    assert!(!result.truncated);
    assert!(result.note.is_none());
    assert_eq!(result.total_count, TotalCount::Exact(1000));
}

#[tokio::test]
async fn test_existing_limit_is_respected() {
    let (executor, backend) = fake_executor(Script::rows(50), 1, limits(1_000, 10));
    let outcome = executor
        .execute(&validated("SELECT * FROM t LIMIT 3;"), limits(1_000, 10))
        .await;

    assert_eq!(success(&outcome).row_count, 3);
    assert_eq!(
        backend.last_statement().as_deref(),
        Some("SELECT * FROM t LIMIT 3;")
    );
}

#[tokio::test]
async fn test_user_limit_above_cap_still_truncated() {
    let (executor, _backend) = fake_executor(Script::rows(50), 1, limits(1_000, 10));
    let outcome = executor
        .execute(&validated("SELECT * FROM t LIMIT 40"), limits(1_000, 10))
        .await;

    let result = success(&outcome);
    assert_eq!(result.row_count, 10);
    assert!(result.truncated);
}

#[tokio::test]
async fn test_limit_word_inside_literal_still_capped() {
    let (executor, backend) = fake_executor(Script::rows(50), 1, limits(1_000, 10));
    let outcome = executor
        .execute_default(&validated("SELECT * FROM t WHERE note = 'no limit'"))
        .await;

    assert!(success(&outcome).truncated);
    assert_eq!(
        backend.last_statement().as_deref(),
        Some("SELECT * FROM t WHERE note = 'no limit' LIMIT 11")
    );
}

#[tokio::test]
async fn test_columns_in_order() {
    let (executor, _backend) = fake_executor(Script::rows(2), 1, limits(1_000, 10));
    let outcome = executor.execute_default(&validated("SELECT id, name FROM t")).await;

    let result = success(&outcome);
    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "name"]);
    let keys: Vec<&String> = result.rows[0].keys().collect();
    assert_eq!(keys, vec!["id", "name"]);
}

// ============================================================================
// Timeouts
// ============================================================================

#[tokio::test]
async fn test_statement_timeout_reports_configured_value() {
    let (executor, _backend) =
        fake_executor(Script::slow(1, Duration::from_millis(500)), 1, limits(50, 10));
    let outcome = executor.execute_default(&validated("SELECT pg_sleep(1)")).await;

    assert_eq!(outcome.category(), Some(ErrorCategory::Timeout));
    assert_eq!(
        outcome.error_message(),
        Some("Query timeout: execution exceeded 50ms limit.")
    );
    assert!(outcome.execution_time_ms() >= 50);
}

#[tokio::test]
async fn test_client_deadline_discards_session() {
    let script = Script {
        hang: true,
        ..Script::default()
    };
    let (pool, backend) = fake_pool(script, 1, Duration::from_millis(100));
    let executor = Executor::new(pool.clone(), limits(50, 10), Duration::from_millis(50));

    let started = Instant::now();
    let outcome = executor.execute_default(&validated("SELECT 1")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::Timeout));
    assert!(outcome.error_message().is_some_and(|m| m.contains("50ms")));
    assert!(started.elapsed() < Duration::from_secs(5));

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(status.discarded, 1);

    // The pool recovers with a fresh session
    backend.set_script(Script::rows(1));
    let outcome = executor.execute_default(&validated("SELECT 1")).await;
    assert!(outcome.is_success());
    assert_eq!(backend.connects(), 2);
}

// ============================================================================
// Concurrency and pool pressure
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_queries_complete_independently() {
    let (executor, backend) =
        fake_executor(Script::slow(5, Duration::from_millis(300)), 2, limits(2_000, 10));

    let started = Instant::now();
    let a = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_default(&validated("SELECT a FROM t")).await })
    };
    let b = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_default(&validated("SELECT b FROM t")).await })
    };
    let (a, b) = (a.await.unwrap(), b.await.unwrap());

    assert!(a.is_success());
    assert!(b.is_success());
    assert_eq!(backend.max_active(), 2);
    // Run back to back they would need at least 600ms
    assert!(started.elapsed() < Duration::from_millis(590));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_timeout_in_one_query_leaves_other_unaffected() {
    let (executor, backend) = fake_executor(Script::rows(5), 2, limits(200, 10));

    let slow = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_default(&validated("SELECT pg_sleep(1)")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let fast = executor.execute_default(&validated("SELECT a FROM t")).await;
    let slow = slow.await.unwrap();

    assert_eq!(slow.category(), Some(ErrorCategory::Timeout));
    assert!(slow.execution_time_ms() >= 200);
    assert!(fast.is_success());
    assert_eq!(fast.row_count(), 5);
    assert!(fast.execution_time_ms() < 50);
    // The fast query ran while the slow one was still in flight
    assert_eq!(backend.max_active(), 2);
}

#[tokio::test]
async fn test_pool_exhausted_is_retryable_failure() {
    let (pool, _backend) = fake_pool(
        Script::slow(1, Duration::from_millis(400)),
        1,
        Duration::from_millis(50),
    );
    let executor = Executor::new(pool.clone(), limits(2_000, 10), Duration::from_millis(100));

    let busy = {
        let executor = executor.clone();
        tokio::spawn(async move { executor.execute_default(&validated("SELECT 1")).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let outcome = executor.execute_default(&validated("SELECT 2")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::PoolExhausted));
    assert!(outcome.category().is_some_and(ErrorCategory::is_retryable));
    assert!(outcome
        .error_message()
        .is_some_and(|m| m.contains("Service busy")));

    assert!(busy.await.unwrap().is_success());
    assert_eq!(pool.status().exhausted, 1);
}

// ============================================================================
// Failures and session release
// ============================================================================

#[tokio::test]
async fn test_failure_releases_session_for_reuse() {
    let (pool, backend) = fake_pool(
        Script::failing(DbError::with_code("42P01", "relation \"nope\" does not exist")),
        1,
        Duration::from_millis(50),
    );
    let executor = Executor::new(pool.clone(), limits(1_000, 10), Duration::from_millis(100));

    let outcome = executor.execute_default(&validated("SELECT * FROM nope")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::UnknownTable));
    assert_eq!(
        outcome.error_message(),
        Some("Table not found: relation \"nope\" does not exist")
    );

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);

    // Same session serves the next query
    backend.set_script(Script::rows(1));
    assert!(executor.execute_default(&validated("SELECT 1")).await.is_success());
    assert_eq!(backend.connects(), 1);
}

#[tokio::test]
async fn test_lost_connection_discards_session() {
    let (pool, _backend) = fake_pool(
        Script::failing(DbError::connection("server closed the connection unexpectedly")),
        1,
        Duration::from_millis(50),
    );
    let executor = Executor::new(pool.clone(), limits(1_000, 10), Duration::from_millis(100));

    let outcome = executor.execute_default(&validated("SELECT 1")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::Generic));
    assert_eq!(
        outcome.error_message(),
        Some("server closed the connection unexpectedly")
    );
    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.status().discarded, 1);
}

#[tokio::test]
async fn test_syntax_and_column_errors() {
    let (executor, backend) = fake_executor(
        Script::failing(DbError::with_code("42703", "column \"nme\" does not exist")),
        1,
        limits(1_000, 10),
    );
    let outcome = executor.execute_default(&validated("SELECT nme FROM t")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::UnknownColumn));

    backend.set_script(Script::failing(DbError::with_code(
        "42601",
        "syntax error at or near \"FORM\"",
    )));
    let outcome = executor.execute_default(&validated("SELECT * FORM t")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::SyntaxError));
    assert_eq!(
        outcome.error_message(),
        Some("SQL syntax error: syntax error at or near \"FORM\"")
    );
}

#[tokio::test]
async fn test_connect_failure_is_generic() {
    let script = Script {
        fail_connect: true,
        ..Script::default()
    };
    let (executor, _backend) = fake_executor(script, 1, limits(1_000, 10));
    let outcome = executor.execute_default(&validated("SELECT 1")).await;
    assert_eq!(outcome.category(), Some(ErrorCategory::Generic));
    assert_eq!(outcome.error_message(), Some("connection refused"));
    assert_eq!(outcome.execution_time_ms(), 0);
}

// ============================================================================
// Session state
// ============================================================================

fn setting(outcome: &ExecutionOutcome) -> Option<serde_json::Value> {
    success(outcome).rows[0].get("current_setting").cloned()
}

#[tokio::test]
async fn test_session_settings_reset_between_checkouts() {
    let (executor, backend) = fake_executor(Script::rows(1), 1, limits(1_000, 10));
    let read_only = validated("SELECT current_setting('default_transaction_read_only')");

    let before = executor.execute_default(&read_only).await;
    assert_eq!(setting(&before), Some(json!("on")));

    let changed = executor
        .execute_default(&validated(
            "SELECT set_config('default_transaction_read_only', 'off', false)",
        ))
        .await;
    assert!(changed.is_success());

    let after = executor.execute_default(&read_only).await;
    assert_eq!(setting(&after), Some(json!("on")));

    // All three ran on the one pooled session, reset at each checkout
    assert_eq!(backend.connects(), 1);
    assert_eq!(backend.resets(), 3);
}

#[tokio::test]
async fn test_search_path_change_does_not_reach_next_request() {
    let (executor, _backend) = fake_executor(Script::rows(1), 1, limits(1_000, 10));
    executor
        .execute_default(&validated(
            "SELECT set_config('search_path', 'pg_catalog', false)",
        ))
        .await;

    let after = executor
        .execute_default(&validated("SELECT current_setting('search_path')"))
        .await;
    assert_eq!(setting(&after), Some(json!("\"$user\", public")));
}

// ============================================================================
// Table description
// ============================================================================

#[tokio::test]
async fn test_describe_table() {
    let (executor, backend) = fake_executor(Script::rows(20), 1, limits(1_000, 10));
    let description = executor.describe_table("employees", 3).await.unwrap();

    assert_eq!(description.table_name, "employees");
    assert_eq!(description.columns.len(), 2);
    assert_eq!(description.columns[0].name, "id");
    assert!(!description.columns[0].nullable);
    assert!(description.columns[0].default.is_some());
    assert!(description.columns[1].nullable);
    assert_eq!(description.row_count, 3);
    assert_eq!(description.sample_data.len(), 3);

    let statements = backend.executed();
    assert!(statements[0].contains("table_name = 'employees'"));
    assert_eq!(statements[1], "SELECT * FROM employees LIMIT 3");
}

#[tokio::test]
async fn test_describe_mixed_case_name_folds_like_postgres() {
    let (executor, backend) = fake_executor(Script::rows(20), 1, limits(1_000, 10));
    let description = executor.describe_table("Employees", 2).await.unwrap();

    assert_eq!(description.table_name, "Employees");
    assert_eq!(description.columns.len(), 2);
    let statements = backend.executed();
    assert!(statements[0].contains("table_name = 'employees'"));
    assert_eq!(statements[1], "SELECT * FROM Employees LIMIT 2");
}

#[tokio::test]
async fn test_describe_sample_capped_at_max_rows() {
    let (executor, backend) = fake_executor(Script::rows(500), 1, limits(1_000, 10));
    let description = executor.describe_table("employees", 5_000).await.unwrap();

    assert_eq!(description.sample_data.len(), 10);
    assert_eq!(
        backend.last_statement().as_deref(),
        Some("SELECT * FROM employees LIMIT 10")
    );
}

#[tokio::test]
async fn test_describe_rejects_non_identifier() {
    let (executor, backend) = fake_executor(Script::rows(1), 1, limits(1_000, 10));
    let failure = executor
        .describe_table("t; DROP TABLE t", 5)
        .await
        .unwrap_err();
    assert_eq!(failure.category, ErrorCategory::InvalidInput);
    assert!(backend.executed().is_empty());
}
