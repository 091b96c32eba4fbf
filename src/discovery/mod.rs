//! Instance discovery (spec §4.2).
//!
//! Discovery is a uniform interface over four config-driven variants that
//! share one shape (`{type, instances[], selectors{}, endpoint,
//! cloud_provider, region}`). `validate` is the cheap pre-flight; `discover`
//! is I/O bearing and must honor cancellation.

mod cloud;
mod endpoint;
mod explicit;
mod kubernetes;

pub use cloud::CloudDiscovery;
pub use endpoint::EndpointDiscovery;
pub use explicit::ExplicitDiscovery;
pub use kubernetes::KubernetesDiscovery;

use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single discovered instance of a service.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Instance {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            labels: HashMap::new(),
            endpoint: None,
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Caller-facing discovery configuration; the `kind` field selects which
/// variant `build` constructs.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub instances: Vec<Instance>,
    #[serde(default)]
    pub selectors: HashMap<String, String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub cloud_provider: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("invalid discovery config: {0}")]
    InvalidConfig(String),
    #[error("discovery request failed: {0}")]
    Io(String),
    #[error("discovery request timed out")]
    Timeout,
    #[error("discovery canceled")]
    Cancelled,
    #[error("no instances discovered")]
    NoInstances,
}

/// Uniform instance-enumeration contract. `validate` is pure and cheap;
/// `discover` is I/O bearing and must honor `cancel`.
#[async_trait]
pub trait Discovery: Send + Sync {
    fn validate(&self) -> Result<(), DiscoveryError>;

    async fn discover(&self, cancel: ShutdownSignal) -> Result<Vec<Instance>, DiscoveryError>;
}

/// Construct the discovery implementation named by `config.kind`.
pub fn build(config: DiscoveryConfig) -> Result<Box<dyn Discovery>, DiscoveryError> {
    match config.kind.as_str() {
        "explicit" => Ok(Box::new(ExplicitDiscovery::new(config.instances))),
        "kubernetes" => Ok(Box::new(KubernetesDiscovery::new(config.selectors))),
        "cloud" => Ok(Box::new(CloudDiscovery::new(
            config.cloud_provider,
            config.region,
            config.selectors,
        ))),
        "endpoint" => Ok(Box::new(EndpointDiscovery::new(config.endpoint))),
        other => Err(DiscoveryError::InvalidConfig(format!(
            "unknown discovery type '{other}'"
        ))),
    }
}
