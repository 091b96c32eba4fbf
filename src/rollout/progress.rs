//! Rollout progress tracking and persistence, keyed by `(service,
//! environment)` so an interrupted rollout can resume from its last
//! completed wave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutStatus {
    InProgress,
    Paused,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutProgress {
    pub service: String,
    pub environment: String,
    pub current_wave: usize,
    pub total_waves: usize,
    pub status: RolloutStatus,
    /// Cumulative count of instances that have completed a wave apply.
    pub completed_instances: usize,
    /// Cumulative count of instances whose apply failed.
    pub failed_instances: usize,
    /// Why the rollout is paused; set only alongside `RolloutStatus::Paused`.
    pub paused_reason: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RolloutProgress {
    pub fn start(service: &str, environment: &str, total_waves: usize, now: DateTime<Utc>) -> Self {
        Self {
            service: service.to_string(),
            environment: environment.to_string(),
            current_wave: 0,
            total_waves,
            status: RolloutStatus::InProgress,
            completed_instances: 0,
            failed_instances: 0,
            paused_reason: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Record that `wave` finished applying `newly_completed` more instances.
    pub fn advance(&mut self, wave: usize, newly_completed: usize, now: DateTime<Utc>) {
        self.current_wave = wave;
        self.completed_instances += newly_completed;
        self.updated_at = now;
    }

    pub fn record_failure(&mut self, newly_failed: usize, now: DateTime<Utc>) {
        self.failed_instances += newly_failed;
        self.updated_at = now;
    }

    pub fn finish(&mut self, status: RolloutStatus, now: DateTime<Utc>) {
        self.status = status;
        self.updated_at = now;
    }

    pub fn pause(&mut self, reason: impl Into<String>, now: DateTime<Utc>) {
        self.status = RolloutStatus::Paused;
        self.paused_reason = Some(reason.into());
        self.updated_at = now;
    }
}

#[derive(Debug, thiserror::Error)]
#[error("progress store error: {0}")]
pub struct ProgressStoreError(pub String);

/// Persists rollout progress across process restarts. An external
/// collaborator; this crate ships [`InMemoryProgressStore`] as the default
/// so a caller without durable storage requirements still gets resumability
/// within one process.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn save(&self, progress: &RolloutProgress) -> Result<(), ProgressStoreError>;
    async fn load(&self, service: &str, environment: &str) -> Result<Option<RolloutProgress>, ProgressStoreError>;
}

#[derive(Default)]
pub struct InMemoryProgressStore {
    entries: RwLock<HashMap<(String, String), RolloutProgress>>,
}

impl InMemoryProgressStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProgressStore for InMemoryProgressStore {
    async fn save(&self, progress: &RolloutProgress) -> Result<(), ProgressStoreError> {
        self.entries
            .write()
            .expect("progress store lock poisoned")
            .insert((progress.service.clone(), progress.environment.clone()), progress.clone());
        Ok(())
    }

    async fn load(&self, service: &str, environment: &str) -> Result<Option<RolloutProgress>, ProgressStoreError> {
        Ok(self
            .entries
            .read()
            .expect("progress store lock poisoned")
            .get(&(service.to_string(), environment.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn saved_progress_round_trips() {
        let store = InMemoryProgressStore::new();
        let progress = RolloutProgress::start("checkout", "prod", 3, Utc::now());
        store.save(&progress).await.unwrap();
        let loaded = store.load("checkout", "prod").await.unwrap().unwrap();
        assert_eq!(loaded.total_waves, 3);
        assert_eq!(loaded.status, RolloutStatus::InProgress);
    }

    #[tokio::test]
    async fn load_of_unknown_key_returns_none() {
        let store = InMemoryProgressStore::new();
        assert!(store.load("checkout", "prod").await.unwrap().is_none());
    }

    #[test]
    fn advance_and_pause_update_the_instance_counters() {
        let now = Utc::now();
        let mut progress = RolloutProgress::start("checkout", "prod", 3, now);
        progress.advance(1, 2, now);
        progress.record_failure(1, now);
        assert_eq!(progress.completed_instances, 2);
        assert_eq!(progress.failed_instances, 1);

        progress.pause("wave 1 health check failed", now);
        assert_eq!(progress.status, RolloutStatus::Paused);
        assert_eq!(progress.paused_reason.as_deref(), Some("wave 1 health check failed"));
    }
}
