//! Script-based health checker: runs an external command, injecting service
//! context as environment variables, with configurable retry and backoff
//! (spec §4.4). The command itself is an external collaborator.

use super::CheckerError;
use crate::health::HealthResult;
use crate::rollout::ServiceConfig;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Linear,
    Exponential,
}

/// Rotation context a script checker is run under (spec §4.4): populated by
/// the caller when the checker runs as part of a rotation, left `None` when
/// it's a standalone health probe.
#[derive(Debug, Clone, Default)]
pub struct ScriptCheckContext {
    pub service_type: Option<String>,
    pub endpoint: Option<String>,
    pub new_version: Option<String>,
    pub old_version: Option<String>,
    pub rotation_id: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptCheckerConfig {
    pub command: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub backoff_base: Duration,
    pub context: ScriptCheckContext,
    /// User-supplied additions to the script's environment (spec §4.4).
    pub extra_env: HashMap<String, String>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy::Linear
    }
}

impl ScriptCheckerConfig {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(10),
            max_attempts: 1,
            backoff: BackoffPolicy::Linear,
            backoff_base: Duration::from_millis(500),
            context: ScriptCheckContext::default(),
            extra_env: HashMap::new(),
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffPolicy::Linear => self.backoff_base * attempt,
            BackoffPolicy::Exponential => self.backoff_base.saturating_mul(1u32 << attempt.min(16)),
        }
    }
}

pub struct ScriptChecker {
    name: String,
    config: ScriptCheckerConfig,
}

impl ScriptChecker {
    pub fn new(name: impl Into<String>, config: ScriptCheckerConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }

    async fn run_once(&self, service: &ServiceConfig) -> Result<bool, CheckerError> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .env("DSOPS_SERVICE", &service.name)
            .env("DSOPS_ENVIRONMENT", &service.environment)
            .kill_on_drop(true);

        let ctx = &self.config.context;
        if let Some(service_type) = &ctx.service_type {
            command.env("DSOPS_TYPE", service_type);
        }
        if let Some(endpoint) = &ctx.endpoint {
            command.env("DSOPS_ENDPOINT", endpoint);
        }
        if let Some(new_version) = &ctx.new_version {
            command.env("DSOPS_NEW_VERSION", new_version);
        }
        if let Some(old_version) = &ctx.old_version {
            command.env("DSOPS_OLD_VERSION", old_version);
        }
        if let Some(rotation_id) = &ctx.rotation_id {
            command.env("DSOPS_ROTATION_ID", rotation_id);
        }
        for (key, value) in &self.config.extra_env {
            command.env(key, value);
        }

        let output = tokio::time::timeout(self.config.timeout, command.output())
            .await
            .map_err(|_| CheckerError::Timeout)?
            .map_err(|e| CheckerError::Io(e.to_string()))?;

        Ok(output.status.success())
    }
}

#[async_trait]
impl super::HealthChecker for ScriptChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "script"
    }

    async fn check(
        &self,
        service: &ServiceConfig,
        cancel: &ShutdownSignal,
    ) -> Result<HealthResult, CheckerError> {
        let started = Instant::now();
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        let mut cancel = cancel.clone();

        for attempt in 0..max_attempts {
            if attempt > 0 {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.delay_for_attempt(attempt)) => {}
                    _ = cancel.wait() => return Err(CheckerError::Cancelled),
                }
            }
            match self.run_once(service).await {
                Ok(true) => {
                    return Ok(HealthResult::healthy(
                        format!("script succeeded on attempt {}", attempt + 1),
                        started.elapsed(),
                        &crate::clock::SystemClock,
                    ))
                }
                Ok(false) => {
                    last_error = Some(format!("script exited non-zero on attempt {}", attempt + 1));
                }
                Err(CheckerError::Timeout) => {
                    last_error = Some(format!("script timed out on attempt {}", attempt + 1));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(HealthResult::unhealthy(
            last_error.unwrap_or_else(|| "script failed".to_string()),
            started.elapsed(),
            &crate::clock::SystemClock,
        ))
    }
}
