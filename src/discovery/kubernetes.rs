//! Kubernetes label-selector discovery.
//!
//! `discover` is a placeholder: the actual Kubernetes API client is an
//! external collaborator out of scope for this crate (spec §1). The
//! contract it must honor is "return instances labeled with all selectors".

use super::{Discovery, DiscoveryError, Instance};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::HashMap;

pub struct KubernetesDiscovery {
    selectors: HashMap<String, String>,
}

impl KubernetesDiscovery {
    pub fn new(selectors: HashMap<String, String>) -> Self {
        Self { selectors }
    }
}

#[async_trait]
impl Discovery for KubernetesDiscovery {
    fn validate(&self) -> Result<(), DiscoveryError> {
        if self.selectors.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "kubernetes discovery requires at least one selector".to_string(),
            ));
        }
        for (key, value) in &self.selectors {
            if key.trim().is_empty() || value.trim().is_empty() {
                return Err(DiscoveryError::InvalidConfig(
                    "kubernetes selector keys and values must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn discover(&self, _cancel: ShutdownSignal) -> Result<Vec<Instance>, DiscoveryError> {
        self.validate()?;
        Err(DiscoveryError::Io(
            "kubernetes discovery requires an external cluster client; not implemented by this crate".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_requires_at_least_one_selector() {
        let discovery = KubernetesDiscovery::new(HashMap::new());
        assert!(discovery.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_selector_value() {
        let mut selectors = HashMap::new();
        selectors.insert("app".to_string(), "".to_string());
        let discovery = KubernetesDiscovery::new(selectors);
        assert!(discovery.validate().is_err());
    }

    #[test]
    fn validate_accepts_nonempty_selector() {
        let mut selectors = HashMap::new();
        selectors.insert("app".to_string(), "payments".to_string());
        let discovery = KubernetesDiscovery::new(selectors);
        assert!(discovery.validate().is_ok());
    }
}
