//! Rollback Manager (spec §4.5, 14% of the system): drives a per-service
//! state machine through restore and verify, with bounded retries and
//! single-flight execution per `(service, environment)`.

pub mod state;

use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::health::RollbackTrigger;
use crate::metrics::SharedMetrics;
use crate::notify::{Dispatcher, RotationEvent, RotationEventKind};
use crate::server::shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};
use async_trait::async_trait;
use serde_json::json;
use state::{State, TransitionLog};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatedBy {
    Automatic,
    Manual,
}

impl InitiatedBy {
    fn as_str(self) -> &'static str {
        match self {
            InitiatedBy::Automatic => "automatic",
            InitiatedBy::Manual => "manual",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    #[error("rollback already in progress for {service}/{environment}")]
    AlreadyInProgress { service: String, environment: String },
    #[error("no rollback record for {service}/{environment}")]
    NotFound { service: String, environment: String },
    #[error("cannot reset {service}/{environment} from state {state:?}; reset is only valid from a terminal state")]
    ResetFromNonTerminal { service: String, environment: String, state: State },
    #[error("restore failed after {attempts} attempt(s): {source}")]
    RestoreFailed { attempts: u32, source: RestoreError },
    #[error("verification failed: {0}")]
    VerificationFailed(String),
    #[error("automatic rollback is disabled for {service}/{environment}")]
    AutomaticDisabled { service: String, environment: String },
    #[error("invalid state transition for {service}/{environment}: {from:?} -> {to:?}")]
    InvalidTransition { service: String, environment: String, from: State, to: State },
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct RestoreError(pub String);

/// Performs the physical restore and post-restore verification. An
/// external collaborator (spec §1): this crate drives the state machine
/// around it.
#[async_trait]
pub trait Restorer: Send + Sync {
    async fn restore(&self, service: &str, environment: &str) -> Result<(), RestoreError>;
    async fn verify(&self, service: &str, environment: &str) -> Result<bool, RestoreError>;
}

struct Record {
    state: State,
    log: TransitionLog,
}

impl Record {
    fn new() -> Self {
        Self {
            state: State::Idle,
            log: TransitionLog::new(),
        }
    }

    fn transition(&mut self, to: State, at: chrono::DateTime<chrono::Utc>, reason: &str) -> Result<(), ()> {
        if !self.state.can_transition_to(to) {
            return Err(());
        }
        self.log.record(self.state, to, at, reason);
        self.state = to;
        Ok(())
    }
}

/// Orchestrates rollback attempts. Implements [`RollbackTrigger`] so the
/// Health Monitor can invoke it directly when a session's failure
/// threshold is reached.
pub struct RollbackManager {
    restorer: Arc<dyn Restorer>,
    dispatcher: Option<Arc<Dispatcher>>,
    metrics: Option<SharedMetrics>,
    clock: Arc<dyn Clock>,
    max_retries: u32,
    attempt_timeout: Duration,
    automatic_rollback_enabled: bool,
    records: RwLock<HashMap<(String, String), Record>>,
    in_flight: RwLock<HashSet<(String, String)>>,
    #[allow(dead_code)]
    cancel_ctrl: ShutdownController,
    cancel: ShutdownSignal,
}

impl RollbackManager {
    pub fn new(restorer: Arc<dyn Restorer>) -> Self {
        let (cancel_ctrl, cancel) = shutdown_channel();
        Self {
            restorer,
            dispatcher: None,
            metrics: None,
            clock: Arc::new(SystemClock),
            max_retries: 2,
            attempt_timeout: config::rollback_attempt_timeout(),
            automatic_rollback_enabled: config::automatic_rollback_enabled(),
            records: RwLock::new(HashMap::new()),
            in_flight: RwLock::new(HashSet::new()),
            cancel_ctrl,
            cancel,
        }
    }

    /// Use an externally-owned cancellation signal in place of the manager's
    /// own (spec line 169: rollback attempts honor both the outer token and
    /// the attempt's timeout budget).
    pub fn with_cancel(mut self, cancel: ShutdownSignal) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_automatic_rollback_enabled(mut self, enabled: bool) -> Self {
        self.automatic_rollback_enabled = enabled;
        self
    }

    /// Trigger an automatic rollback, rejected with `AutomaticDisabled`
    /// when the manager was built with automatic rollback turned off
    /// (spec §4.5). Use [`RollbackTrigger::trigger`] when the caller has
    /// no way to observe the rejection (the Health Monitor's fire-and-forget path).
    pub async fn trigger_rollback(
        &self,
        service: &str,
        environment: &str,
        reason: &str,
    ) -> Result<(), RollbackError> {
        if !self.automatic_rollback_enabled {
            return Err(RollbackError::AutomaticDisabled {
                service: service.to_string(),
                environment: environment.to_string(),
            });
        }
        self.run(service, environment, reason, InitiatedBy::Automatic).await
    }

    pub fn current_state(&self, service: &str, environment: &str) -> Option<State> {
        self.records
            .read()
            .expect("rollback records lock poisoned")
            .get(&(service.to_string(), environment.to_string()))
            .map(|r| r.state)
    }

    pub async fn manual_rollback(
        &self,
        service: &str,
        environment: &str,
        reason: &str,
    ) -> Result<(), RollbackError> {
        self.run(service, environment, reason, InitiatedBy::Manual).await
    }

    /// Move a terminal record (`Completed` or `Failed`) back to `Idle` so a
    /// future rollback can be triggered for the same key (spec §4.5:
    /// "removes the state after a successful subsequent rotation").
    pub fn reset(&self, service: &str, environment: &str) -> Result<(), RollbackError> {
        let key = (service.to_string(), environment.to_string());
        let state = {
            let records = self.records.read().expect("rollback records lock poisoned");
            records
                .get(&key)
                .map(|r| r.state)
                .ok_or_else(|| RollbackError::NotFound {
                    service: key.0.clone(),
                    environment: key.1.clone(),
                })?
        };
        if !state.is_terminal() {
            return Err(RollbackError::ResetFromNonTerminal {
                service: key.0,
                environment: key.1,
                state,
            });
        }
        self.transition(&key, State::Idle, "reset after successful subsequent rotation")?;
        Ok(())
    }

    async fn run(
        &self,
        service: &str,
        environment: &str,
        reason: &str,
        initiated_by: InitiatedBy,
    ) -> Result<(), RollbackError> {
        let key = (service.to_string(), environment.to_string());
        {
            let mut in_flight = self.in_flight.write().expect("rollback in-flight lock poisoned");
            if !in_flight.insert(key.clone()) {
                return Err(RollbackError::AlreadyInProgress {
                    service: key.0,
                    environment: key.1,
                });
            }
        }

        let result = self.execute(&key, reason, initiated_by).await;

        self.in_flight
            .write()
            .expect("rollback in-flight lock poisoned")
            .remove(&key);

        if let Some(metrics) = &self.metrics {
            let final_state = match &result {
                Ok(()) => "completed",
                Err(_) => "failed",
            };
            metrics.record_rollback_attempt(final_state);
        }

        result
    }

    fn transition(&self, key: &(String, String), to: State, reason: &str) -> Result<State, RollbackError> {
        let mut records = self.records.write().expect("rollback records lock poisoned");
        let record = records.entry(key.clone()).or_insert_with(Record::new);
        let from = record.state;
        record
            .transition(to, self.clock.now(), reason)
            .map_err(|()| RollbackError::InvalidTransition {
                service: key.0.clone(),
                environment: key.1.clone(),
                from,
                to,
            })?;
        Ok(to)
    }

    async fn emit(&self, service: &str, environment: &str, kind: RotationEventKind, metadata: serde_json::Value) {
        if let Some(dispatcher) = &self.dispatcher {
            let event = RotationEvent::new(kind, service, environment).with_metadata(metadata);
            dispatcher.send(event).await;
        }
    }

    /// One retry loop of up to `max_retries + 1` attempts (spec §4.5). Each
    /// attempt runs the full `triggered -> in_progress -> verifying ->
    /// completed` cycle under one timeout budget; on failure with attempts
    /// remaining it drops back to `idle` and the next attempt re-triggers.
    async fn execute(
        &self,
        key: &(String, String),
        reason: &str,
        initiated_by: InitiatedBy,
    ) -> Result<(), RollbackError> {
        let (service, environment) = (key.0.as_str(), key.1.as_str());
        let max_attempts = self.max_retries + 1;
        let started_at = self.clock.now();
        let mut last_error: Option<RollbackError> = None;
        let mut cancel = self.cancel.clone();

        // One `rollback` notification for the whole run, not per attempt
        // (spec line 142: "Execute emits one `rollback` event").
        self.emit(
            service,
            environment,
            RotationEventKind::RollbackTriggered,
            json!({"reason": reason, "initiated_by": initiated_by.as_str()}),
        )
        .await;

        for attempt in 1..=max_attempts {
            self.transition(key, State::Triggered, reason)?;
            self.transition(key, State::InProgress, "restore started")?;

            let restore_fut = async {
                self.restorer
                    .restore(service, environment)
                    .await
                    .map_err(|source| RollbackError::RestoreFailed { attempts: attempt, source })?;
                self.transition(key, State::Verifying, "restore succeeded, verifying")?;
                match self.restorer.verify(service, environment).await {
                    Ok(true) => Ok(()),
                    Ok(false) => Err(RollbackError::VerificationFailed(
                        "post-restore verification reported unhealthy".to_string(),
                    )),
                    Err(e) => Err(RollbackError::VerificationFailed(e.0)),
                }
            };

            let attempt_result = tokio::select! {
                result = tokio::time::timeout(self.attempt_timeout, restore_fut) => {
                    result.unwrap_or_else(|_| {
                        Err(RollbackError::RestoreFailed {
                            attempts: attempt,
                            source: RestoreError("rollback attempt timed out".to_string()),
                        })
                    })
                }
                _ = cancel.wait() => {
                    Err(RollbackError::RestoreFailed {
                        attempts: attempt,
                        source: RestoreError("rollback canceled".to_string()),
                    })
                }
            };

            match attempt_result {
                Ok(()) => {
                    self.transition(key, State::Completed, "verification passed")?;
                    self.emit(
                        service,
                        environment,
                        RotationEventKind::RollbackCompleted,
                        json!({
                            "initiated_by": initiated_by.as_str(),
                            "attempts": attempt,
                            "duration_ms": (self.clock.now() - started_at).num_milliseconds(),
                            "final_state": "completed",
                        }),
                    )
                    .await;
                    info!(service, environment, attempt, "rollback completed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(service, environment, attempt, error = %e, "rollback attempt failed");
                    // InProgress or Verifying, whichever the failure surfaced from, both allow -> Failed.
                    self.transition(key, State::Failed, &e.to_string())?;
                    let canceled = cancel.is_shutdown();
                    last_error = Some(e);
                    if attempt < max_attempts && !canceled {
                        self.transition(key, State::Idle, "retrying")?;
                        continue;
                    }
                }
            }
        }

        let error = last_error.unwrap_or_else(|| RollbackError::RestoreFailed {
            attempts: max_attempts,
            source: RestoreError("rollback failed".to_string()),
        });
        self.emit(
            service,
            environment,
            RotationEventKind::RollbackFailed,
            json!({
                "reason": error.to_string(),
                "attempts": max_attempts,
                "initiated_by": initiated_by.as_str(),
                "duration_ms": (self.clock.now() - started_at).num_milliseconds(),
                "final_state": "failed",
            }),
        )
        .await;
        error!(service, environment, "rollback failed after exhausting retries");
        Err(error)
    }
}

#[async_trait]
impl RollbackTrigger for RollbackManager {
    async fn trigger(&self, service: &str, environment: &str, reason: &str) {
        if !self.automatic_rollback_enabled {
            warn!(service, environment, "automatic rollback disabled; not triggering");
            return;
        }
        if let Err(e) = self.run(service, environment, reason, InitiatedBy::Automatic).await {
            error!(service, environment, error = %e, "automatic rollback trigger failed");
        }
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
