//! Query Clock Module
//!
//! Wall-clock timing and the client-side deadline for one statement.
//!
//! ## Design
//!
//! The server-side `statement_timeout` is what actually aborts a runaway
//! query. The clock adds a client-side budget of `timeout + grace` so a
//! session whose server never answers (network partition, stuck backend) is
//! still abandoned in bounded time.

use std::future::Future;
use std::time::{Duration, Instant};

/// Client-side deadline exceeded
#[derive(Debug, Clone, thiserror::Error)]
#[error("Query exceeded client deadline of {budget:?} (ran for {elapsed:?})")]
pub struct DeadlineError {
    /// The budget that was exceeded
    pub budget: Duration,
    /// How long the query actually ran
    pub elapsed: Duration,
}

/// Times one statement and tracks its client-side budget.
#[derive(Debug, Clone, Copy)]
pub struct QueryClock {
    /// When the statement was issued
    start_time: Instant,

    /// Maximum client-side wait
    budget: Duration,
}

impl QueryClock {
    /// Start a clock with a budget of `timeout + grace`
    pub fn with_grace(timeout: Duration, grace: Duration) -> Self {
        QueryClock {
            start_time: Instant::now(),
            budget: timeout.saturating_add(grace),
        }
    }

    /// Await `work` within the remaining budget. The future is dropped when
    /// the budget runs out.
    pub async fn run<F: Future>(&self, work: F) -> Result<F::Output, DeadlineError> {
        match tokio::time::timeout(self.remaining(), work).await {
            Ok(output) => Ok(output),
            Err(_) => Err(DeadlineError {
                budget: self.budget,
                elapsed: self.start_time.elapsed(),
            }),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    /// Time left before the budget runs out
    pub fn remaining(&self) -> Duration {
        self.budget.saturating_sub(self.start_time.elapsed())
    }
}
