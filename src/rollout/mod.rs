//! Gradual Rollout: wave planning and execution (spec §4.3, 28% of the
//! system). Three strategies — canary, percentage, group — share the same
//! two-phase contract: `plan(service) -> waves` and `execute(waves)`.

pub mod canary;
pub mod group;
pub mod percentage;
pub mod progress;

use crate::discovery::Instance;
use crate::notify::Dispatcher;
use crate::rollback::RollbackManager;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Caller-owned description of the service being rotated and the instances
/// discovered for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub environment: String,
    pub instances: Vec<Instance>,
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            environment: environment.into(),
            instances: Vec::new(),
        }
    }

    pub fn with_instances(mut self, instances: Vec<Instance>) -> Self {
        self.instances = instances;
        self
    }
}

/// One wave of a rollout plan: a set of instance ids applied together.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutWave {
    pub instance_ids: Vec<String>,
    /// 0 for the canary wave.
    pub percentage: u32,
    pub wait_duration: Duration,
    pub health_monitoring_duration: Duration,
}

impl RolloutWave {
    pub fn new(instance_ids: Vec<String>, percentage: u32) -> Self {
        Self {
            instance_ids,
            percentage,
            wait_duration: Duration::ZERO,
            health_monitoring_duration: Duration::ZERO,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RolloutError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("circular dependency among services: {0:?}")]
    CircularDependency(Vec<String>),
    #[error("apply failed on wave {wave}, instance {instance_id}: {source}")]
    ApplyFailed {
        wave: usize,
        instance_id: String,
        #[source]
        source: ApplyError,
    },
    #[error("health check failed after wave {wave}: {message}")]
    HealthCheckFailed { wave: usize, message: String },
    #[error("rollout canceled")]
    Cancelled,
    #[error("rollout paused: {0}")]
    Paused(String),
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ApplyError(pub String);

/// The operation that physically applies a new credential to one instance.
/// An external collaborator (spec §1): the crate only calls it.
#[async_trait]
pub trait ApplyToInstance: Send + Sync {
    async fn apply(&self, service: &ServiceConfig, instance: &Instance) -> Result<(), ApplyError>;
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct HealthGateError(pub String);

/// Gate a wave on post-apply health for a bounded window. Implemented by
/// [`crate::health::Monitor::gate_wave`]; injected here so rollout
/// strategies stay decoupled from the concrete checker set.
#[async_trait]
pub trait HealthGate: Send + Sync {
    async fn monitor_for(
        &self,
        service: &ServiceConfig,
        duration: Duration,
        cancel: &ShutdownSignal,
    ) -> Result<(), HealthGateError>;
}

/// A gate that always reports healthy; the default when no health gating
/// is configured for a rollout.
pub struct NoopHealthGate;

#[async_trait]
impl HealthGate for NoopHealthGate {
    async fn monitor_for(
        &self,
        _service: &ServiceConfig,
        _duration: Duration,
        _cancel: &ShutdownSignal,
    ) -> Result<(), HealthGateError> {
        Ok(())
    }
}

/// Shared collaborators every rollout executor needs: the apply operation,
/// an optional health gate, an optional rollback manager, and the
/// notification dispatcher.
pub struct RolloutContext {
    pub apply: Arc<dyn ApplyToInstance>,
    pub health_gate: Arc<dyn HealthGate>,
    pub rollback: Option<Arc<RollbackManager>>,
    pub dispatcher: Option<Arc<Dispatcher>>,
    pub cancel: ShutdownSignal,
}

impl RolloutContext {
    pub fn new(apply: Arc<dyn ApplyToInstance>, cancel: ShutdownSignal) -> Self {
        Self {
            apply,
            health_gate: Arc::new(NoopHealthGate),
            rollback: None,
            dispatcher: None,
            cancel,
        }
    }

    pub fn with_health_gate(mut self, gate: Arc<dyn HealthGate>) -> Self {
        self.health_gate = gate;
        self
    }

    pub fn with_rollback(mut self, rollback: Arc<RollbackManager>) -> Self {
        self.rollback = Some(rollback);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Apply a wave's instances, order unspecified within the wave (§5).
    /// Errors are numbered by wave index (spec §4.3.1).
    async fn apply_wave(
        &self,
        service: &ServiceConfig,
        wave_index: usize,
        wave: &RolloutWave,
    ) -> Result<(), RolloutError> {
        for instance_id in &wave.instance_ids {
            if self.cancel.is_shutdown() {
                return Err(RolloutError::Cancelled);
            }
            let instance = service
                .instances
                .iter()
                .find(|i| &i.id == instance_id)
                .ok_or_else(|| {
                    RolloutError::BadRequest(format!("unknown instance id '{instance_id}'"))
                })?;
            self.apply
                .apply(service, instance)
                .await
                .map_err(|source| RolloutError::ApplyFailed {
                    wave: wave_index,
                    instance_id: instance_id.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    async fn gate_health(
        &self,
        service: &ServiceConfig,
        wave_index: usize,
        duration: Duration,
    ) -> Result<(), RolloutError> {
        if duration.is_zero() {
            return Ok(());
        }
        self.health_gate
            .monitor_for(service, duration, &self.cancel)
            .await
            .map_err(|e| RolloutError::HealthCheckFailed {
                wave: wave_index,
                message: e.0,
            })
    }

    /// Sleep for `duration`, honoring cancellation.
    async fn wait(&self, duration: Duration) -> Result<(), RolloutError> {
        if duration.is_zero() {
            return Ok(());
        }
        let mut cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = cancel.wait() => Err(RolloutError::Cancelled),
        }
    }
}

/// Every instance of `service` must appear in exactly one wave (I1, I2).
pub fn validate_wave_coverage(
    service: &ServiceConfig,
    waves: &[RolloutWave],
) -> Result<(), RolloutError> {
    use std::collections::HashSet;

    let mut seen = HashSet::new();
    for wave in waves {
        for id in &wave.instance_ids {
            if !seen.insert(id.clone()) {
                return Err(RolloutError::BadRequest(format!(
                    "instance '{id}' appears in more than one wave"
                )));
            }
        }
    }
    let expected: HashSet<&str> = service.instances.iter().map(|i| i.id.as_str()).collect();
    let actual: HashSet<&str> = seen.iter().map(|s| s.as_str()).collect();
    if expected != actual {
        return Err(RolloutError::BadRequest(
            "plan does not cover every instance of the service exactly once".to_string(),
        ));
    }
    Ok(())
}
