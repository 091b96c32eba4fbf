//! Percentage rollout strategy (spec §4.3.2): cumulative percentage
//! targets over a configurable wave schedule, with optional pause-on-failure
//! and progress persistence keyed by `(service, environment)`.

use super::progress::{ProgressStore, RolloutProgress, RolloutStatus};
use super::{RolloutContext, RolloutError, RolloutWave, ServiceConfig};
use std::sync::Arc;
use std::time::Duration;

/// One scheduled step: the cumulative percentage of instances that should
/// have been rotated by the time this wave completes, plus how long to
/// monitor health and wait before the next wave.
#[derive(Debug, Clone, Copy)]
pub struct WaveStep {
    pub cumulative_percentage: u32,
    pub health_monitoring_duration: Duration,
    pub wait_duration: Duration,
}

#[derive(Debug, Clone)]
pub struct PercentageConfig {
    pub wave_schedule: Vec<WaveStep>,
    /// Spec §9: "pause on failure currently returns an error rather than
    /// truly suspending" — this crate exposes the `Paused` outcome but
    /// resumption is out of scope (Open Question, see DESIGN.md).
    pub pause_on_failure: bool,
}

impl Default for PercentageConfig {
    fn default() -> Self {
        Self {
            wave_schedule: vec![
                WaveStep { cumulative_percentage: 5, health_monitoring_duration: Duration::from_secs(120), wait_duration: Duration::from_secs(120) },
                WaveStep { cumulative_percentage: 25, health_monitoring_duration: Duration::from_secs(300), wait_duration: Duration::from_secs(300) },
                WaveStep { cumulative_percentage: 50, health_monitoring_duration: Duration::from_secs(300), wait_duration: Duration::from_secs(300) },
                WaveStep { cumulative_percentage: 100, health_monitoring_duration: Duration::from_secs(600), wait_duration: Duration::from_secs(600) },
            ],
            pause_on_failure: false,
        }
    }
}

pub struct PercentageStrategy {
    config: PercentageConfig,
    progress_store: Arc<dyn ProgressStore>,
}

impl PercentageStrategy {
    pub fn new(progress_store: Arc<dyn ProgressStore>) -> Self {
        Self { config: PercentageConfig::default(), progress_store }
    }

    pub fn with_config(mut self, config: PercentageConfig) -> Self {
        self.config = config;
        self
    }

    /// Plan: for each scheduled step, the instances newly added is
    /// `target_cumulative − already_rotated`, floored to at least 1 but
    /// never exceeding what remains; steps contributing zero new
    /// instances are skipped. A final catch-up wave covers any leftovers
    /// (spec §4.3.2, scenario 3 in §8).
    pub fn plan(&self, service: &ServiceConfig) -> Result<Vec<RolloutWave>, RolloutError> {
        let total = service.instances.len();
        if total == 0 {
            return Err(RolloutError::BadRequest(
                "cannot plan a percentage rollout with no instances".to_string(),
            ));
        }

        let ids: Vec<String> = service.instances.iter().map(|i| i.id.clone()).collect();
        let mut waves = Vec::new();
        let mut already_rotated = 0usize;

        for step in &self.config.wave_schedule {
            let target = (total * step.cumulative_percentage as usize) / 100;
            if target <= already_rotated {
                continue;
            }
            let remaining = total - already_rotated;
            let added = (target - already_rotated).max(1).min(remaining);
            let wave_ids = ids[already_rotated..already_rotated + added].to_vec();
            already_rotated += added;

            waves.push(RolloutWave {
                instance_ids: wave_ids,
                percentage: step.cumulative_percentage,
                wait_duration: step.wait_duration,
                health_monitoring_duration: step.health_monitoring_duration,
            });
        }

        if already_rotated < total {
            let last_duration = self
                .config
                .wave_schedule
                .last()
                .map(|s| s.health_monitoring_duration)
                .unwrap_or(Duration::ZERO);
            waves.push(RolloutWave {
                instance_ids: ids[already_rotated..].to_vec(),
                percentage: 100,
                wait_duration: Duration::ZERO,
                health_monitoring_duration: last_duration,
            });
        }

        if let Some(last) = waves.last_mut() {
            last.wait_duration = Duration::ZERO;
        }

        super::validate_wave_coverage(service, &waves)?;
        Ok(waves)
    }

    /// Execute: sequential wave application with a health gate and
    /// inter-wave wait. On any failure, returns `Paused` rather than a
    /// hard error when `pause_on_failure` is set (spec §4.3.2).
    pub async fn execute(
        &self,
        ctx: &RolloutContext,
        service: &ServiceConfig,
        waves: &[RolloutWave],
    ) -> Result<(), RolloutError> {
        if waves.is_empty() {
            return Err(RolloutError::BadRequest("empty rollout plan".to_string()));
        }

        let now = chrono::Utc::now();
        let mut progress = RolloutProgress::start(&service.name, &service.environment, waves.len(), now);
        let result = self.run_waves(ctx, service, waves, &mut progress).await;

        match &result {
            Ok(()) => {
                progress.finish(RolloutStatus::Completed, chrono::Utc::now());
            }
            Err(RolloutError::Paused(reason)) => {
                progress.pause(reason.clone(), chrono::Utc::now());
            }
            Err(_) => {
                progress.finish(RolloutStatus::Failed, chrono::Utc::now());
            }
        }
        let _ = self.progress_store.save(&progress).await;

        result
    }

    async fn run_waves(
        &self,
        ctx: &RolloutContext,
        service: &ServiceConfig,
        waves: &[RolloutWave],
        progress: &mut RolloutProgress,
    ) -> Result<(), RolloutError> {
        for (idx, wave) in waves.iter().enumerate() {
            let outcome: Result<(), RolloutError> = async {
                ctx.apply_wave(service, idx, wave).await?;
                ctx.gate_health(service, idx, wave.health_monitoring_duration).await?;
                Ok(())
            }
            .await;

            if let Err(e) = outcome {
                progress.record_failure(wave.instance_ids.len(), chrono::Utc::now());
                if self.config.pause_on_failure {
                    return Err(RolloutError::Paused(format!(
                        "wave {idx} failed, pausing rollout: {e}"
                    )));
                }
                return Err(e);
            }

            progress.advance(idx + 1, wave.instance_ids.len(), chrono::Utc::now());
            let is_last = idx == waves.len() - 1;
            if !is_last {
                ctx.wait(wave.wait_duration).await?;
            }
        }
        Ok(())
    }

    /// Load any persisted progress for `(service, environment)`.
    pub async fn load_progress(
        &self,
        service: &str,
        environment: &str,
    ) -> Result<Option<RolloutProgress>, RolloutError> {
        self.progress_store
            .load(service, environment)
            .await
            .map_err(|e| RolloutError::BadRequest(e.to_string()))
    }

    /// Clear any persisted progress for `(service, environment)`, e.g.
    /// after a successful subsequent run.
    pub async fn clear_progress(&self, service: &str, environment: &str) -> Result<(), RolloutError> {
        let now = chrono::Utc::now();
        let mut cleared = RolloutProgress::start(service, environment, 0, now);
        cleared.finish(RolloutStatus::Completed, now);
        self.progress_store
            .save(&cleared)
            .await
            .map_err(|e| RolloutError::BadRequest(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::Instance;
    use crate::rollout::progress::InMemoryProgressStore;
    use crate::rollout::{ApplyError, ApplyToInstance, NoopHealthGate};
    use crate::server::shutdown::shutdown_channel;
    use async_trait::async_trait;
    use std::sync::Arc;

    fn service(count: usize) -> ServiceConfig {
        let instances = (0..count).map(|i| Instance::new(format!("i{i}"))).collect();
        ServiceConfig::new("checkout", "prod").with_instances(instances)
    }

    fn strategy() -> PercentageStrategy {
        PercentageStrategy::new(Arc::new(InMemoryProgressStore::new()))
    }

    #[test]
    fn wave_sizes_match_cumulative_schedule() {
        // Scenario 3 from spec §8: 20 instances, schedule {5,25,50,100} ->
        // wave sizes {1,4,5,10}, cumulative {1,5,10,20}.
        let service = service(20);
        let waves = strategy().plan(&service).expect("plan succeeds");
        let sizes: Vec<usize> = waves.iter().map(|w| w.instance_ids.len()).collect();
        assert_eq!(sizes, vec![1, 4, 5, 10]);
    }

    #[test]
    fn coverage_holds_for_arbitrary_counts() {
        for count in [1, 3, 7, 19, 50] {
            let service = service(count);
            let waves = strategy().plan(&service).expect("plan succeeds");
            assert!(super::super::validate_wave_coverage(&service, &waves).is_ok());
        }
    }

    #[test]
    fn empty_service_is_bad_request() {
        let service = ServiceConfig::new("checkout", "prod");
        assert!(matches!(strategy().plan(&service), Err(RolloutError::BadRequest(_))));
    }

    struct FailingApply;

    #[async_trait]
    impl ApplyToInstance for FailingApply {
        async fn apply(&self, _service: &ServiceConfig, _instance: &Instance) -> Result<(), ApplyError> {
            Err(ApplyError("apply failed".to_string()))
        }
    }

    #[tokio::test]
    async fn failure_surfaces_as_paused_when_configured() {
        let (_ctrl, signal) = shutdown_channel();
        let ctx = RolloutContext::new(Arc::new(FailingApply), signal)
            .with_health_gate(Arc::new(NoopHealthGate));
        let service = service(4);
        let strategy = strategy().with_config(PercentageConfig {
            pause_on_failure: true,
            ..PercentageConfig::default()
        });
        let waves = strategy.plan(&service).expect("plan succeeds");
        let result = strategy.execute(&ctx, &service, &waves).await;
        assert!(matches!(result, Err(RolloutError::Paused(_))));
    }

    #[tokio::test]
    async fn failure_is_hard_error_by_default() {
        let (_ctrl, signal) = shutdown_channel();
        let ctx = RolloutContext::new(Arc::new(FailingApply), signal)
            .with_health_gate(Arc::new(NoopHealthGate));
        let service = service(4);
        let strategy = strategy();
        let waves = strategy.plan(&service).expect("plan succeeds");
        let result = strategy.execute(&ctx, &service, &waves).await;
        assert!(matches!(result, Err(RolloutError::ApplyFailed { .. })));
    }
}
