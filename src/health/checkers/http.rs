//! HTTP health checker: polls a URL and evaluates status code, response
//! time, and optional rate-limit headers (spec §4.4).

use super::CheckerError;
use crate::health::HealthResult;
use crate::rollout::ServiceConfig;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct HttpCheckerConfig {
    pub url: String,
    pub method: String,
    pub headers: HashMap<String, String>,
    pub timeout: Duration,
    pub expected_status_codes: Vec<u16>,
    pub response_time_threshold: Option<Duration>,
}

impl HttpCheckerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "GET".to_string(),
            headers: HashMap::new(),
            timeout: Duration::from_secs(10),
            expected_status_codes: vec![200],
            response_time_threshold: None,
        }
    }
}

pub struct HttpChecker {
    name: String,
    config: HttpCheckerConfig,
    client: reqwest::Client,
}

impl HttpChecker {
    pub fn new(name: impl Into<String>, config: HttpCheckerConfig) -> Result<Self, CheckerError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| CheckerError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            name: name.into(),
            config,
            client,
        })
    }
}

#[async_trait]
impl super::HealthChecker for HttpChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "http"
    }

    async fn check(
        &self,
        _service: &ServiceConfig,
        _cancel: &ShutdownSignal,
    ) -> Result<HealthResult, CheckerError> {
        let method = reqwest::Method::from_bytes(self.config.method.as_bytes())
            .map_err(|_| CheckerError::InvalidConfig(format!("invalid HTTP method '{}'", self.config.method)))?;

        let mut request = self.client.request(method, &self.config.url);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CheckerError::Timeout
            } else {
                CheckerError::Io(e.to_string())
            }
        })?;
        let elapsed = started.elapsed();

        let status = response.status().as_u16();
        let mut metadata = HashMap::new();
        if let Some(remaining) = response.headers().get("X-RateLimit-Remaining") {
            if let Ok(value) = remaining.to_str() {
                metadata.insert(
                    "rate_limit_remaining".to_string(),
                    serde_json::Value::String(value.to_string()),
                );
            }
        }

        if !self.config.expected_status_codes.contains(&status) {
            return Ok(
                HealthResult::unhealthy(format!("unexpected status code {status}"), elapsed, &crate::clock::SystemClock)
                    .with_metadata("status_code", serde_json::json!(status)),
            );
        }

        if let Some(threshold) = self.config.response_time_threshold {
            if elapsed > threshold {
                return Ok(HealthResult::unhealthy(
                    format!("response time {elapsed:?} exceeded threshold {threshold:?}"),
                    elapsed,
                    &crate::clock::SystemClock,
                )
                .with_metadata("status_code", serde_json::json!(status)));
            }
        }

        let mut result = HealthResult::healthy(
            format!("status {status} in {elapsed:?}"),
            elapsed,
            &crate::clock::SystemClock,
        )
        .with_metadata("status_code", serde_json::json!(status));
        for (key, value) in metadata {
            result = result.with_metadata(key, value);
        }
        Ok(result)
    }
}
