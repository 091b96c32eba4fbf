//! Canary rollout strategy (spec §4.3.1): a single designated instance is
//! rotated and observed first, then the remainder is split across a
//! default `{10%, 50%, 100%}` wave schedule.

use super::{RolloutContext, RolloutError, RolloutWave, ServiceConfig};
use crate::discovery::Instance;
use std::time::Duration;

/// One scheduled wave step: the cumulative percentage it targets and how
/// long to monitor health once that wave has been applied.
#[derive(Debug, Clone, Copy)]
pub struct WaveStep {
    pub percentage: u32,
    pub health_monitoring_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct CanaryConfig {
    /// Schedule applied to the non-canary instances, in order.
    pub wave_schedule: Vec<WaveStep>,
    /// How long to monitor the canary itself before proceeding.
    pub canary_health_monitoring_duration: Duration,
    /// Pause between non-canary waves; the final wave never waits.
    pub wait_duration: Duration,
}

impl Default for CanaryConfig {
    fn default() -> Self {
        Self {
            wave_schedule: vec![
                WaveStep { percentage: 10, health_monitoring_duration: Duration::from_secs(300) },
                WaveStep { percentage: 50, health_monitoring_duration: Duration::from_secs(300) },
                WaveStep { percentage: 100, health_monitoring_duration: Duration::from_secs(300) },
            ],
            canary_health_monitoring_duration: Duration::from_secs(300),
            wait_duration: Duration::ZERO,
        }
    }
}

pub struct CanaryStrategy {
    config: CanaryConfig,
}

impl CanaryStrategy {
    pub fn new() -> Self {
        Self { config: CanaryConfig::default() }
    }

    pub fn with_config(config: CanaryConfig) -> Self {
        Self { config }
    }

    /// The canary is the first `canary=true`-labeled instance, else the
    /// instance at position 0 (spec §4.3.1, tested by scenario 2 in §8).
    fn pick_canary(instances: &[Instance]) -> usize {
        instances
            .iter()
            .position(|i| i.labels.get("canary").map(String::as_str) == Some("true"))
            .unwrap_or(0)
    }

    /// Partition `remaining` across `self.config.wave_schedule`: each step's
    /// wave size is `floor(total * pct / 100)` clamped to `[1, remaining]`,
    /// taken in order from the front of `remaining`. Any instances left
    /// over after the last scheduled step form one final 100% wave.
    fn calculate_waves(&self, total: usize, remaining: &[String]) -> Vec<RolloutWave> {
        let mut waves = Vec::new();
        let mut cursor = 0usize;

        for step in &self.config.wave_schedule {
            if cursor >= remaining.len() {
                break;
            }
            let left = remaining.len() - cursor;
            let raw = (total * step.percentage as usize) / 100;
            let size = raw.clamp(1, left);
            let ids = remaining[cursor..cursor + size].to_vec();
            cursor += size;

            waves.push(RolloutWave {
                instance_ids: ids,
                percentage: step.percentage,
                wait_duration: self.config.wait_duration,
                health_monitoring_duration: step.health_monitoring_duration,
            });
        }

        if cursor < remaining.len() {
            let ids = remaining[cursor..].to_vec();
            waves.push(RolloutWave {
                instance_ids: ids,
                percentage: 100,
                wait_duration: Duration::ZERO,
                health_monitoring_duration: self
                    .config
                    .wave_schedule
                    .last()
                    .map(|s| s.health_monitoring_duration)
                    .unwrap_or(self.config.canary_health_monitoring_duration),
            });
        }

        if let Some(last) = waves.last_mut() {
            last.wait_duration = Duration::ZERO;
        }

        waves
    }

    /// Plan a canary rollout: wave 0 is exactly the canary at `percentage=0`;
    /// the rest is partitioned per `calculate_waves` (I1, I2).
    pub fn plan(&self, service: &ServiceConfig) -> Result<Vec<RolloutWave>, RolloutError> {
        if service.instances.is_empty() {
            return Err(RolloutError::BadRequest(
                "cannot plan a canary rollout with no instances".to_string(),
            ));
        }

        let canary_index = Self::pick_canary(&service.instances);
        let total = service.instances.len();
        let canary_id = service.instances[canary_index].id.clone();
        // Rotate so the instances immediately after the canary come first,
        // wrapping the pre-canary instances to the end (spec §8 scenario 2).
        let remaining: Vec<String> = service.instances[canary_index + 1..]
            .iter()
            .chain(service.instances[..canary_index].iter())
            .map(|i| i.id.clone())
            .collect();

        let mut waves = vec![RolloutWave {
            instance_ids: vec![canary_id],
            percentage: 0,
            wait_duration: Duration::ZERO,
            health_monitoring_duration: self.config.canary_health_monitoring_duration,
        }];
        waves.extend(self.calculate_waves(total, &remaining));

        super::validate_wave_coverage(service, &waves)?;
        Ok(waves)
    }

    /// Execute a canary plan (spec §4.3.1):
    /// 1. apply + monitor the canary; on health failure, invoke rollback
    ///    (if configured) with reason `canary_health_check_failed` and
    ///    return the health error.
    /// 2. for each following wave: apply, monitor, then sleep
    ///    `wait_duration` (the last wave skips the wait).
    pub async fn execute(
        &self,
        ctx: &RolloutContext,
        service: &ServiceConfig,
        waves: &[RolloutWave],
    ) -> Result<(), RolloutError> {
        if waves.is_empty() {
            return Err(RolloutError::BadRequest("empty rollout plan".to_string()));
        }
        if waves[0].instance_ids.len() != 1 {
            return Err(RolloutError::BadRequest(format!(
                "canary wave must contain exactly one instance, got {}",
                waves[0].instance_ids.len()
            )));
        }

        ctx.apply_wave(service, 0, &waves[0]).await?;
        if let Err(e) = ctx.gate_health(service, 0, waves[0].health_monitoring_duration).await {
            if let Some(rollback) = &ctx.rollback {
                let _ = rollback
                    .trigger_rollback(&service.name, &service.environment, "canary_health_check_failed")
                    .await;
            }
            return Err(e);
        }

        for (idx, wave) in waves.iter().enumerate().skip(1) {
            ctx.apply_wave(service, idx, wave).await?;
            ctx.gate_health(service, idx, wave.health_monitoring_duration).await?;
            let is_last = idx == waves.len() - 1;
            if !is_last {
                ctx.wait(wave.wait_duration).await?;
            }
        }

        Ok(())
    }
}

impl Default for CanaryStrategy {
    fn default() -> Self {
        Self::new()
    }
}
