//! Health Monitor (spec §4.4, 18% of the system): continuous per-service
//! health sessions that trigger rollback on sustained failure, plus a
//! bounded gate the rollout executor uses between waves.

pub mod checkers;

use crate::clock::{Clock, SystemClock};
use crate::rollout::{HealthGate, HealthGateError, ServiceConfig};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use checkers::{CheckerError, HealthChecker};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Result of one checker invocation (spec §3's `HealthResult`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub message: String,
    pub duration: Duration,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl HealthResult {
    pub fn healthy(message: impl Into<String>, duration: Duration, clock: &dyn Clock) -> Self {
        Self {
            healthy: true,
            message: message.into(),
            duration,
            timestamp: clock.now(),
            metadata: HashMap::new(),
        }
    }

    pub fn unhealthy(message: impl Into<String>, duration: Duration, clock: &dyn Clock) -> Self {
        Self {
            healthy: false,
            message: message.into(),
            duration,
            timestamp: clock.now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// A checker reports degraded by setting `healthy: true` with a
    /// `status: "degraded"` metadata entry — still a passing tick, but
    /// worth surfacing on [`MonitorState`] (spec §4.4's SQL checker: a pool
    /// above the warn threshold is degraded, not a tick failure).
    pub fn status(&self) -> HealthStatus {
        if !self.healthy {
            return HealthStatus::Unhealthy;
        }
        match self.metadata.get("status").and_then(|v| v.as_str()) {
            Some("degraded") => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

/// Spec §3's `MonitorState.last_status` domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, thiserror::Error)]
pub enum HealthMonitorError {
    #[error("a monitoring session is already active for {service}/{environment} (I5)")]
    AlreadyMonitoring { service: String, environment: String },
    #[error("no monitoring session found for {service}/{environment}")]
    NotMonitoring { service: String, environment: String },
}

/// Invoked once the monitor reaches `failure_threshold` consecutive failures
/// for a session. An external collaborator (spec §4.4): this crate supplies
/// [`crate::rollback::RollbackManager`] as the production implementation.
#[async_trait]
pub trait RollbackTrigger: Send + Sync {
    async fn trigger(&self, service: &str, environment: &str, reason: &str);
}

/// Checker set plus cadence for one monitoring session.
#[derive(Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub failure_threshold: u32,
    pub checkers: Arc<Vec<Arc<dyn HealthChecker>>>,
}

impl MonitorConfig {
    pub fn new(check_interval: Duration, failure_threshold: u32, checkers: Vec<Arc<dyn HealthChecker>>) -> Self {
        Self {
            check_interval,
            failure_threshold: failure_threshold.max(1),
            checkers: Arc::new(checkers),
        }
    }
}

/// Spec §3's `MonitorState`: everything a caller can introspect about an
/// active continuous monitoring session without tearing it down.
#[derive(Debug, Clone)]
pub struct MonitorState {
    pub service: ServiceConfig,
    pub consecutive_failures: u32,
    pub last_status: HealthStatus,
    pub last_check_time: Option<DateTime<Utc>>,
    pub start_time: DateTime<Utc>,
    pub cancel: ShutdownSignal,
}

struct Session {
    cancel: crate::server::shutdown::ShutdownController,
    state: Arc<RwLock<MonitorState>>,
}

/// Runs one tick: every checker is invoked, and the tick fails if any
/// checker errors or reports `healthy=false`; a checker reporting
/// `HealthStatus::Degraded` still passes the tick but is surfaced as the
/// session's worst status for the tick (spec §4.4).
async fn run_tick(
    service: &ServiceConfig,
    checkers: &[Arc<dyn HealthChecker>],
    cancel: &ShutdownSignal,
) -> Result<HealthStatus, String> {
    let mut worst = HealthStatus::Healthy;
    for checker in checkers {
        match checker.check(service, cancel).await {
            Ok(result) if result.healthy => {
                debug!(checker = checker.name(), "health check passed");
                if result.status() == HealthStatus::Degraded {
                    worst = HealthStatus::Degraded;
                }
            }
            Ok(result) => {
                return Err(format!("{}: {}", checker.name(), result.message));
            }
            Err(CheckerError::Cancelled) => return Err("cancelled".to_string()),
            Err(e) => return Err(format!("{}: {e}", checker.name())),
        }
    }
    Ok(worst)
}

/// Owns the (service, environment)-keyed table of active continuous
/// monitoring sessions (I5: at most one per key).
pub struct Monitor {
    clock: Arc<dyn Clock>,
    sessions: RwLock<HashMap<(String, String), Session>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a detached continuous monitoring session for `(service,
    /// environment)`. Fails if one is already running (I5).
    pub fn start_monitoring(
        self: &Arc<Self>,
        service: ServiceConfig,
        config: MonitorConfig,
        trigger: Arc<dyn RollbackTrigger>,
    ) -> Result<(), HealthMonitorError> {
        let key = (service.name.clone(), service.environment.clone());
        {
            let sessions = self.sessions.read().expect("monitor sessions lock poisoned");
            if sessions.contains_key(&key) {
                return Err(HealthMonitorError::AlreadyMonitoring {
                    service: key.0,
                    environment: key.1,
                });
            }
        }

        let (ctrl, mut cancel) = crate::server::shutdown::shutdown_channel();
        let state = Arc::new(RwLock::new(MonitorState {
            service: service.clone(),
            consecutive_failures: 0,
            last_status: HealthStatus::Unknown,
            last_check_time: None,
            start_time: self.clock.now(),
            cancel: cancel.clone(),
        }));
        {
            let mut sessions = self.sessions.write().expect("monitor sessions lock poisoned");
            if sessions.contains_key(&key) {
                return Err(HealthMonitorError::AlreadyMonitoring {
                    service: key.0,
                    environment: key.1,
                });
            }
            sessions.insert(key.clone(), Session { cancel: ctrl, state: Arc::clone(&state) });
        }

        let this = Arc::clone(self);
        let task_key = key.clone();
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(config.check_interval) => {}
                    _ = cancel.wait() => break,
                }
                if cancel.is_shutdown() {
                    break;
                }
                let outcome = run_tick(&service, &config.checkers, &cancel).await;
                let now = this.clock.now();
                match outcome {
                    Ok(status) => {
                        consecutive_failures = 0;
                        let mut state = state.write().expect("monitor state lock poisoned");
                        state.consecutive_failures = 0;
                        state.last_status = status;
                        state.last_check_time = Some(now);
                    }
                    Err(reason) => {
                        consecutive_failures += 1;
                        {
                            let mut state = state.write().expect("monitor state lock poisoned");
                            state.consecutive_failures = consecutive_failures;
                            state.last_status = HealthStatus::Unhealthy;
                            state.last_check_time = Some(now);
                        }
                        warn!(
                            service = %service.name,
                            environment = %service.environment,
                            consecutive_failures,
                            %reason,
                            "health check failed"
                        );
                        if consecutive_failures >= config.failure_threshold {
                            trigger
                                .trigger(&service.name, &service.environment, &reason)
                                .await;
                            break;
                        }
                    }
                }
            }
            info!(
                service = %task_key.0,
                environment = %task_key.1,
                "monitoring session ended"
            );
            this.sessions
                .write()
                .expect("monitor sessions lock poisoned")
                .remove(&task_key);
        });

        Ok(())
    }

    /// Stop an active session (idempotent with respect to the background
    /// task; self-terminated sessions are simply already absent).
    pub fn stop_monitoring(&self, service: &str, environment: &str) -> Result<(), HealthMonitorError> {
        let key = (service.to_string(), environment.to_string());
        let mut sessions = self.sessions.write().expect("monitor sessions lock poisoned");
        match sessions.remove(&key) {
            Some(session) => {
                session.cancel.shutdown();
                Ok(())
            }
            None => Err(HealthMonitorError::NotMonitoring {
                service: key.0,
                environment: key.1,
            }),
        }
    }

    pub fn is_monitoring(&self, service: &str, environment: &str) -> bool {
        self.sessions
            .read()
            .expect("monitor sessions lock poisoned")
            .contains_key(&(service.to_string(), environment.to_string()))
    }

    /// Snapshot of [`MonitorState`] for an active session (spec §3).
    pub fn session_state(&self, service: &str, environment: &str) -> Option<MonitorState> {
        let sessions = self.sessions.read().expect("monitor sessions lock poisoned");
        let session = sessions.get(&(service.to_string(), environment.to_string()))?;
        Some(session.state.read().expect("monitor state lock poisoned").clone())
    }

    /// Run bounded health checks for `duration`, returning as soon as a
    /// tick fails or after the window elapses healthy. Used by rollout wave
    /// gating (spec §4.3.1); never registers a session in the session table.
    pub async fn check_for(
        &self,
        service: &ServiceConfig,
        checkers: &[Arc<dyn HealthChecker>],
        duration: Duration,
        interval: Duration,
        cancel: &ShutdownSignal,
    ) -> Result<(), String> {
        let deadline = self.clock.now() + chrono::Duration::from_std(duration).unwrap_or_default();
        let mut cancel = cancel.clone();
        loop {
            run_tick(service, checkers, &cancel).await?;
            if self.clock.now() >= deadline {
                return Ok(());
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = cancel.wait() => return Err("cancelled".to_string()),
            }
        }
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapts [`Monitor::check_for`] to the [`HealthGate`] trait the rollout
/// executors depend on, with a fixed checker set and poll interval.
pub struct MonitorHealthGate {
    monitor: Arc<Monitor>,
    checkers: Vec<Arc<dyn HealthChecker>>,
    poll_interval: Duration,
}

impl MonitorHealthGate {
    pub fn new(monitor: Arc<Monitor>, checkers: Vec<Arc<dyn HealthChecker>>, poll_interval: Duration) -> Self {
        Self {
            monitor,
            checkers,
            poll_interval,
        }
    }
}

#[async_trait]
impl HealthGate for MonitorHealthGate {
    async fn monitor_for(
        &self,
        service: &ServiceConfig,
        duration: Duration,
        cancel: &ShutdownSignal,
    ) -> Result<(), HealthGateError> {
        self.monitor
            .check_for(service, &self.checkers, duration, self.poll_interval, cancel)
            .await
            .map_err(HealthGateError)
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
