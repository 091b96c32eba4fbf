//! Group rollout strategy (spec §4.3.3): rotates a set of logical services
//! in dependency order, one topological level per wave.

use super::{RolloutContext, RolloutError, RolloutWave, ServiceConfig};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Roll back every service successfully applied in prior waves, in
    /// reverse order.
    RollbackAll,
    /// Keep applying later waves, recording the failure.
    Continue,
    /// Abort the rollout at the failed wave.
    Stop,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct VerifyError(pub String);

/// Optional cross-service check run after each wave, e.g. an integration
/// smoke test spanning the services in that level. An external
/// collaborator: this crate only invokes it and applies the configured
/// failure policy to its result.
#[async_trait]
pub trait CrossServiceVerify: Send + Sync {
    async fn verify(&self, services: &[String]) -> Result<(), VerifyError>;
}

/// Maps an instance id to the logical service it belongs to. The default
/// fallback strips the trailing `-suffix` from the instance id (spec §9:
/// "a production implementation should require an explicit
/// instance→service mapping and treat the heuristic as test-only").
pub trait InstanceServiceMap: Send + Sync {
    fn service_for(&self, instance_id: &str) -> String;
}

pub struct SuffixHeuristicMap;

impl InstanceServiceMap for SuffixHeuristicMap {
    fn service_for(&self, instance_id: &str) -> String {
        match instance_id.rsplit_once('-') {
            Some((service, _suffix)) => service.to_string(),
            None => instance_id.to_string(),
        }
    }
}

pub struct ExplicitInstanceServiceMap {
    mapping: HashMap<String, String>,
}

impl ExplicitInstanceServiceMap {
    pub fn new(mapping: HashMap<String, String>) -> Self {
        Self { mapping }
    }
}

impl InstanceServiceMap for ExplicitInstanceServiceMap {
    fn service_for(&self, instance_id: &str) -> String {
        self.mapping
            .get(instance_id)
            .cloned()
            .unwrap_or_else(|| SuffixHeuristicMap.service_for(instance_id))
    }
}

pub struct GroupConfig {
    /// service -> services it depends on.
    pub dependencies: HashMap<String, Vec<String>>,
    pub failure_policy: FailurePolicy,
    pub wait_duration: Duration,
    pub health_monitoring_duration: Duration,
}

impl GroupConfig {
    pub fn new(dependencies: HashMap<String, Vec<String>>) -> Self {
        Self {
            dependencies,
            failure_policy: FailurePolicy::Stop,
            wait_duration: Duration::ZERO,
            health_monitoring_duration: Duration::from_secs(60),
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }
}

pub struct GroupStrategy {
    config: GroupConfig,
    instance_map: Box<dyn InstanceServiceMap>,
    verify: Option<Box<dyn CrossServiceVerify>>,
}

impl GroupStrategy {
    pub fn new(config: GroupConfig) -> Self {
        Self { config, instance_map: Box::new(SuffixHeuristicMap), verify: None }
    }

    pub fn with_instance_map(mut self, map: Box<dyn InstanceServiceMap>) -> Self {
        self.instance_map = map;
        self
    }

    pub fn with_verify(mut self, verify: Box<dyn CrossServiceVerify>) -> Self {
        self.verify = Some(verify);
        self
    }

    /// Kahn's algorithm: services with no unresolved prerequisites form the
    /// next level; a cycle (not all services consumed) is
    /// `CircularDependency` (spec §4.3.3, scenario 4 in §8).
    pub fn plan(&self, services: &[String]) -> Result<Vec<Vec<String>>, RolloutError> {
        let mut in_degree: HashMap<&str, usize> = services.iter().map(|s| (s.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = services.iter().map(|s| (s.as_str(), Vec::new())).collect();

        for service in services {
            let deps = self.config.dependencies.get(service).map(Vec::as_slice).unwrap_or(&[]);
            for dep in deps {
                if let Some(count) = in_degree.get_mut(service.as_str()) {
                    *count += 1;
                }
                dependents.entry(dep.as_str()).or_default().push(service.as_str());
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(name, _)| *name)
            .collect();
        let mut ready_sorted: Vec<&str> = ready.drain(..).collect();
        ready_sorted.sort();
        let mut queue: VecDeque<&str> = ready_sorted.into_iter().collect();

        let mut levels = Vec::new();
        let mut consumed = HashSet::new();

        while !queue.is_empty() {
            let mut level: Vec<&str> = queue.drain(..).collect();
            level.sort();
            for name in &level {
                consumed.insert(*name);
            }

            let mut next_ready = Vec::new();
            for name in &level {
                if let Some(deps) = dependents.get(name) {
                    for dependent in deps {
                        if consumed.contains(dependent) {
                            continue;
                        }
                        let count = in_degree.get_mut(dependent).expect("known service");
                        *count -= 1;
                        if *count == 0 {
                            next_ready.push(*dependent);
                        }
                    }
                }
            }
            next_ready.sort();
            next_ready.dedup();
            queue.extend(next_ready);

            levels.push(level.into_iter().map(str::to_string).collect());
        }

        if consumed.len() != services.len() {
            let unresolved: Vec<String> = services.iter().filter(|s| !consumed.contains(s.as_str())).cloned().collect();
            return Err(RolloutError::CircularDependency(unresolved));
        }

        Ok(levels)
    }

    fn instances_for_services<'a>(&self, service: &'a ServiceConfig, members: &[String]) -> Vec<String> {
        service
            .instances
            .iter()
            .filter(|i| members.contains(&self.instance_map.service_for(&i.id)))
            .map(|i| i.id.clone())
            .collect()
    }

    /// Build one [`RolloutWave`] per topological level, using
    /// `instance_map` to route each of `service`'s instances to the level
    /// that owns its logical service.
    pub fn waves_for(&self, service: &ServiceConfig, levels: &[Vec<String>]) -> Vec<RolloutWave> {
        levels
            .iter()
            .enumerate()
            .map(|(idx, members)| {
                let is_last = idx == levels.len() - 1;
                RolloutWave {
                    instance_ids: self.instances_for_services(service, members),
                    percentage: ((idx + 1) * 100 / levels.len().max(1)) as u32,
                    wait_duration: if is_last { Duration::ZERO } else { self.config.wait_duration },
                    health_monitoring_duration: self.config.health_monitoring_duration,
                }
            })
            .collect()
    }

    /// Execute each level as a wave; within a wave, instances of every
    /// service in that level are applied together (spec §4.3.3).
    pub async fn execute(
        &self,
        ctx: &RolloutContext,
        service: &ServiceConfig,
        levels: &[Vec<String>],
    ) -> Result<(), RolloutError> {
        let waves = self.waves_for(service, levels);
        let mut applied: Vec<(usize, &RolloutWave)> = Vec::new();

        for (idx, wave) in waves.iter().enumerate() {
            let outcome: Result<(), RolloutError> = async {
                ctx.apply_wave(service, idx, wave).await?;
                ctx.gate_health(service, idx, wave.health_monitoring_duration).await?;
                if let Some(verify) = &self.verify {
                    verify
                        .verify(&levels[idx])
                        .await
                        .map_err(|e| RolloutError::HealthCheckFailed { wave: idx, message: e.0 })?;
                }
                Ok(())
            }
            .await;

            match outcome {
                Ok(()) => {
                    applied.push((idx, wave));
                    let is_last = idx == waves.len() - 1;
                    if !is_last {
                        ctx.wait(wave.wait_duration).await?;
                    }
                }
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::Stop => return Err(e),
                    FailurePolicy::Continue => {
                        tracing::warn!(wave = idx, error = %e, "group wave failed, continuing per policy");
                        continue;
                    }
                    FailurePolicy::RollbackAll => {
                        if let Some(rollback) = &ctx.rollback {
                            for (applied_idx, _) in applied.iter().rev() {
                                let reason = format!(
                                    "group rollout wave {idx} failed, rolling back wave {applied_idx}"
                                );
                                for member in &levels[*applied_idx] {
                                    let _ = rollback
                                        .manual_rollback(member, &service.environment, &reason)
                                        .await;
                                }
                            }
                        }
                        return Err(e);
                    }
                },
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn deps(pairs: &[(&str, &[&str])]) -> HashMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(name, deps)| (name.to_string(), deps.iter().map(|d| d.to_string()).collect()))
            .collect()
    }

    #[test]
    fn topo_sort_yields_expected_levels() {
        // Scenario 4 from spec §8: B->A, C->A, D->{B,C} yields [A], [B,C], [D].
        let dependencies = deps(&[("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])]);
        let strategy = GroupStrategy::new(GroupConfig::new(dependencies));
        let services = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        let levels = strategy.plan(&services).expect("plan succeeds");
        assert_eq!(levels, vec![vec!["A".to_string()], vec!["B".to_string(), "C".to_string()], vec!["D".to_string()]]);
    }

    #[test]
    fn cycle_is_reported() {
        // Adding A->C on top of the scenario above introduces a cycle.
        let dependencies = deps(&[("B", &["A"]), ("C", &["A", "D"]), ("D", &["B", "C"])]);
        let strategy = GroupStrategy::new(GroupConfig::new(dependencies));
        let services = vec!["A".to_string(), "B".to_string(), "C".to_string(), "D".to_string()];
        assert!(matches!(strategy.plan(&services), Err(RolloutError::CircularDependency(_))));
    }

    #[test]
    fn suffix_heuristic_strips_trailing_segment() {
        let map = SuffixHeuristicMap;
        assert_eq!(map.service_for("checkout-1"), "checkout");
        assert_eq!(map.service_for("checkout-us-east-1"), "checkout-us-east");
        assert_eq!(map.service_for("checkout"), "checkout");
    }

    #[test]
    fn explicit_map_overrides_heuristic() {
        let mut mapping = HashMap::new();
        mapping.insert("oddly-named-1".to_string(), "checkout".to_string());
        let map = ExplicitInstanceServiceMap::new(mapping);
        assert_eq!(map.service_for("oddly-named-1"), "checkout");
        assert_eq!(map.service_for("unmapped-2"), "unmapped");
    }

    #[tokio::test]
    async fn independent_services_share_the_first_level() {
        let dependencies = deps(&[("A", &[]), ("B", &[])]);
        let strategy = GroupStrategy::new(GroupConfig::new(dependencies));
        let services = vec!["A".to_string(), "B".to_string()];
        let levels = strategy.plan(&services).expect("plan succeeds");
        assert_eq!(levels, vec![vec!["A".to_string(), "B".to_string()]]);
    }

    struct FailingApply {
        fails_at_instance: String,
    }

    #[async_trait]
    impl super::super::ApplyToInstance for FailingApply {
        async fn apply(
            &self,
            _service: &ServiceConfig,
            instance: &crate::discovery::Instance,
        ) -> Result<(), super::super::ApplyError> {
            if instance.id == self.fails_at_instance {
                return Err(super::super::ApplyError("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn continue_policy_proceeds_to_later_waves_after_a_failure() {
        use crate::discovery::Instance;
        use crate::server::shutdown_channel;

        let dependencies = deps(&[("B", &["A"])]);
        let strategy = GroupStrategy::new(GroupConfig::new(dependencies).with_failure_policy(FailurePolicy::Continue));
        let service = ServiceConfig::new("svc", "test")
            .with_instances(vec![Instance::new("a-1"), Instance::new("b-1")]);
        let levels = vec![vec!["a".to_string()], vec!["b".to_string()]];

        let (_controller, signal) = shutdown_channel();
        let ctx = RolloutContext::new(std::sync::Arc::new(FailingApply { fails_at_instance: "a-1".to_string() }), signal);

        let result = strategy.execute(&ctx, &service, &levels).await;
        assert!(result.is_ok(), "Continue policy must not surface the failure as an error");
    }
}
