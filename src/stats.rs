//! Per-user attempt statistics.

use crate::attempts::{AttemptStore, AttemptSummary, StoreError};
use crate::request::ActorIdentity;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// Stats lookup errors
#[derive(Debug, thiserror::Error)]
pub enum StatsError {
    /// Stats are kept for authenticated users only
    #[error("statistics require an authenticated user")]
    AnonymousActor,

    #[error("Attempt store error: {0}")]
    Store(#[from] StoreError),
}

/// Aggregate over one user's attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSummary {
    pub total_attempts: usize,
    pub successful_attempts: usize,
    /// Percentage, two decimals; 0 with no attempts
    pub success_rate: f64,
    /// Mean execution time in ms, two decimals; 0 with no attempts
    pub avg_execution_time_ms: f64,
    pub assignments_attempted: usize,
}

/// Fold attempt summaries into a [`StatsSummary`].
pub fn compute_stats(attempts: &[AttemptSummary]) -> StatsSummary {
    let total = attempts.len();
    if total == 0 {
        return StatsSummary {
            total_attempts: 0,
            successful_attempts: 0,
            success_rate: 0.0,
            avg_execution_time_ms: 0.0,
            assignments_attempted: 0,
        };
    }

    let successes = attempts.iter().filter(|a| a.success).count();
    let total_time: u64 = attempts.iter().map(|a| a.execution_time_ms).sum();
    let assignments: HashSet<&str> = attempts.iter().map(|a| a.assignment_id.as_str()).collect();

    StatsSummary {
        total_attempts: total,
        successful_attempts: successes,
        success_rate: round2(successes as f64 / total as f64 * 100.0),
        avg_execution_time_ms: round2(total_time as f64 / total as f64),
        assignments_attempted: assignments.len(),
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Computes stats from an attempt store
#[derive(Clone)]
pub struct StatsAggregator {
    store: Arc<dyn AttemptStore>,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        StatsAggregator { store }
    }

    pub async fn compute(&self, actor: &ActorIdentity) -> Result<StatsSummary, StatsError> {
        if !actor.is_authenticated() {
            return Err(StatsError::AnonymousActor);
        }
        let attempts = self.store.for_actor(actor).await?;
        Ok(compute_stats(&attempts))
    }
}
