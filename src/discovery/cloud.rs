//! Cloud-provider label-selector discovery (AWS/GCP/Azure).
//!
//! Like [`super::kubernetes::KubernetesDiscovery`], `discover` defers to an
//! external collaborator — the cloud provider's discovery API client is out
//! of scope for this crate.

use super::{Discovery, DiscoveryError, Instance};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::HashMap;

const VALID_PROVIDERS: [&str; 3] = ["aws", "gcp", "azure"];

pub struct CloudDiscovery {
    cloud_provider: Option<String>,
    region: Option<String>,
    selectors: HashMap<String, String>,
}

impl CloudDiscovery {
    pub fn new(
        cloud_provider: Option<String>,
        region: Option<String>,
        selectors: HashMap<String, String>,
    ) -> Self {
        Self {
            cloud_provider,
            region,
            selectors,
        }
    }
}

#[async_trait]
impl Discovery for CloudDiscovery {
    fn validate(&self) -> Result<(), DiscoveryError> {
        let provider = self
            .cloud_provider
            .as_deref()
            .ok_or_else(|| DiscoveryError::InvalidConfig("cloud_provider is required".to_string()))?;
        if !VALID_PROVIDERS.contains(&provider) {
            return Err(DiscoveryError::InvalidConfig(format!(
                "unknown cloud_provider '{provider}', expected one of aws, gcp, azure"
            )));
        }

        if matches!(provider, "aws" | "azure")
            && self.region.as_deref().unwrap_or("").trim().is_empty()
        {
            return Err(DiscoveryError::InvalidConfig(format!(
                "region is required for cloud_provider '{provider}'"
            )));
        }

        if self.selectors.is_empty() {
            return Err(DiscoveryError::InvalidConfig(
                "cloud discovery requires at least one selector".to_string(),
            ));
        }
        for (key, value) in &self.selectors {
            if key.trim().is_empty() || value.trim().is_empty() {
                return Err(DiscoveryError::InvalidConfig(
                    "cloud selector keys and values must be non-empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    async fn discover(&self, _cancel: ShutdownSignal) -> Result<Vec<Instance>, DiscoveryError> {
        self.validate()?;
        Err(DiscoveryError::Io(format!(
            "cloud discovery for '{}' requires an external provider API client; not implemented by this crate",
            self.cloud_provider.as_deref().unwrap_or("unknown")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selectors() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("app".to_string(), "payments".to_string());
        m
    }

    #[test]
    fn rejects_unknown_provider() {
        let d = CloudDiscovery::new(Some("digitalocean".to_string()), None, selectors());
        assert!(matches!(d.validate(), Err(DiscoveryError::InvalidConfig(_))));
    }

    #[test]
    fn aws_requires_region() {
        let d = CloudDiscovery::new(Some("aws".to_string()), None, selectors());
        assert!(d.validate().is_err());
        let d = CloudDiscovery::new(Some("aws".to_string()), Some("us-east-1".to_string()), selectors());
        assert!(d.validate().is_ok());
    }

    #[test]
    fn gcp_does_not_require_region() {
        let d = CloudDiscovery::new(Some("gcp".to_string()), None, selectors());
        assert!(d.validate().is_ok());
    }

    #[test]
    fn requires_at_least_one_selector() {
        let d = CloudDiscovery::new(Some("gcp".to_string()), None, HashMap::new());
        assert!(d.validate().is_err());
    }
}
