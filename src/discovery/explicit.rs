//! Explicit discovery: the caller lists instances directly.

use super::{Discovery, DiscoveryError, Instance};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::HashSet;

pub struct ExplicitDiscovery {
    instances: Vec<Instance>,
}

impl ExplicitDiscovery {
    pub fn new(instances: Vec<Instance>) -> Self {
        Self { instances }
    }
}

#[async_trait]
impl Discovery for ExplicitDiscovery {
    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.instances.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "explicit discovery requires at least one instance".to_string(),
            ));
        }
        if self.instances.iter().any(|i| i.id.trim().is_empty()) {
            return Err(DiscoveryError::InvalidConfig(
                "explicit discovery instances must have a non-empty id".to_string(),
            ));
        }
        let mut seen = HashSet::with_capacity(self.instances.len());
        for instance in &self.instances {
            if !seen.insert(&instance.id) {
                return Err(DiscoveryError::InvalidConfig(format!(
                    "duplicate instance id '{}'",
                    instance.id
                )));
            }
        }
        Ok(())
    }

    async fn discover(&self, _cancel: ShutdownSignal) -> Result<Vec<Instance>, DiscoveryError> {
        self.validate()?;
        Ok(self.instances.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::shutdown::shutdown_channel;

    #[tokio::test]
    async fn discover_returns_instances_verbatim() {
        let instances = vec![Instance::new("i1"), Instance::new("i2")];
        let discovery = ExplicitDiscovery::new(instances.clone());
        let (_ctrl, signal) = shutdown_channel();
        let discovered = discovery.discover(signal).await.unwrap();
        assert_eq!(discovered, instances);
    }

    #[test]
    fn validate_rejects_empty_list() {
        let discovery = ExplicitDiscovery::new(vec![]);
        assert!(discovery.validate().is_err());
    }

    #[test]
    fn validate_rejects_duplicate_ids() {
        let discovery = ExplicitDiscovery::new(vec![Instance::new("dup"), Instance::new("dup")]);
        assert!(discovery.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_id() {
        let discovery = ExplicitDiscovery::new(vec![Instance::new("")]);
        assert!(discovery.validate().is_err());
    }
}
