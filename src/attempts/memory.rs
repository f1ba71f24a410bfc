//! Process-local attempt store, keyed by actor.

use super::{Attempt, AttemptStore, AttemptSummary, StoreError};
use crate::request::ActorIdentity;
use async_trait::async_trait;
use dashmap::DashMap;

/// Attempts held in memory; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    by_actor: DashMap<ActorIdentity, Vec<Attempt>>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        MemoryAttemptStore::default()
    }

    /// Total attempts across all actors
    pub fn len(&self) -> usize {
        self.by_actor.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full records of one actor, oldest first
    pub fn attempts_of(&self, actor: &ActorIdentity) -> Vec<Attempt> {
        self.by_actor
            .get(actor)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn insert(&self, attempt: &Attempt) -> Result<(), StoreError> {
        self.by_actor
            .entry(attempt.actor.clone())
            .or_default()
            .push(attempt.clone());
        Ok(())
    }

    async fn recent(
        &self,
        actor: &ActorIdentity,
        assignment_id: &str,
        limit: usize,
    ) -> Result<Vec<AttemptSummary>, StoreError> {
        let Some(entry) = self.by_actor.get(actor) else {
            return Ok(Vec::new());
        };
        let mut matching: Vec<&Attempt> = entry
            .value()
            .iter()
            .filter(|a| a.assignment_id == assignment_id)
            .collect();
        // Stable sort keeps insertion order for equal timestamps; reverse after
        matching.sort_by_key(|a| a.created_at);
        Ok(matching
            .into_iter()
            .rev()
            .take(limit)
            .map(AttemptSummary::from)
            .collect())
    }

    async fn for_actor(&self, actor: &ActorIdentity) -> Result<Vec<AttemptSummary>, StoreError> {
        let Some(entry) = self.by_actor.get(actor) else {
            return Ok(Vec::new());
        };
        let mut all: Vec<&Attempt> = entry.value().iter().collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all.into_iter().rev().map(AttemptSummary::from).collect())
    }
}
