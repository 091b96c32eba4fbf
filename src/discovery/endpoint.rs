//! HTTP endpoint discovery: `GET endpoint` returns the instance list.

use super::{Discovery, DiscoveryError, Instance};
use crate::config;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde::Deserialize;

const USER_AGENT: &str = concat!("dsops/", env!("CARGO_PKG_VERSION"));

pub struct EndpointDiscovery {
    endpoint: Option<String>,
}

impl EndpointDiscovery {
    pub fn new(endpoint: Option<String>) -> Self {
        Self { endpoint }
    }
}

#[derive(Debug, Deserialize)]
struct EndpointResponse {
    #[serde(default)]
    instances: Vec<Instance>,
}

#[async_trait]
impl Discovery for EndpointDiscovery {
    fn validate(&self) -> Result<(), DiscoveryError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| DiscoveryError::InvalidConfig("endpoint is required".to_string()))?;
        let url = url::Url::parse(endpoint)
            .map_err(|e| DiscoveryError::InvalidConfig(format!("invalid endpoint URL: {e}")))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(DiscoveryError::InvalidConfig(
                "endpoint must be an http(s) URL".to_string(),
            ));
        }
        Ok(())
    }

    async fn discover(&self, mut cancel: ShutdownSignal) -> Result<Vec<Instance>, DiscoveryError> {
        self.validate()?;
        let endpoint = self.endpoint.as_deref().expect("validated above");

        let client = reqwest::Client::builder()
            .timeout(config::discovery_http_timeout())
            .build()
            .map_err(|e| DiscoveryError::Io(e.to_string()))?;

        let request = client
            .get(endpoint)
            .header("Accept", "application/json")
            .header("User-Agent", USER_AGENT)
            .send();

        let response = tokio::select! {
            result = request => result.map_err(|e| {
                if e.is_timeout() {
                    DiscoveryError::Timeout
                } else {
                    DiscoveryError::Io(e.to_string())
                }
            })?,
            _ = cancel.wait() => return Err(DiscoveryError::Cancelled),
        };

        if !response.status().is_success() {
            return Err(DiscoveryError::Io(format!(
                "discovery endpoint returned {}",
                response.status()
            )));
        }

        let body: EndpointResponse = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Io(format!("invalid discovery response body: {e}")))?;

        let instances: Vec<Instance> = body
            .instances
            .into_iter()
            .filter(|i| !i.id.trim().is_empty())
            .collect();

        if instances.is_empty() {
            return Err(DiscoveryError::NoInstances);
        }

        Ok(instances)
    }
}
