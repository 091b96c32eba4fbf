//! Generic webhook provider: POSTs a JSON body (or a rendered text
//! template, when configured) with configurable method and retry/backoff.

use super::{NotificationProvider, ProviderError};
use crate::notify::{RotationEvent, RotationEventKind};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tera::{Context, Tera};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub base_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy::Fixed,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryConfig {
    /// `attempt` is the 1-indexed count of attempts already made. Exponential
    /// backoff is `2^(n-1) * base_delay` (spec §4.6/§8).
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        match self.backoff {
            BackoffPolicy::Fixed => self.base_delay,
            BackoffPolicy::Linear => self.base_delay * attempt,
            BackoffPolicy::Exponential => self
                .base_delay
                .saturating_mul(1u32 << attempt.saturating_sub(1).min(16)),
        }
    }
}

pub struct WebhookProvider {
    url: String,
    method: String,
    /// A Tera template rendering the request body as text. When `None`,
    /// the default JSON payload (spec's fallback behavior) is sent.
    body_template: Option<String>,
    retry: RetryConfig,
    client: reqwest::Client,
}

impl WebhookProvider {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: "POST".to_string(),
            body_template: None,
            retry: RetryConfig::default(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    pub fn with_body_template(mut self, template: impl Into<String>) -> Self {
        self.body_template = Some(template.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    fn default_payload(event: &RotationEvent) -> serde_json::Value {
        json!({
            "id": event.id.to_string(),
            "kind": event.kind,
            "service": event.service,
            "environment": event.environment,
            "timestamp": event.timestamp,
            "title": event.title(),
            "metadata": event.metadata,
        })
    }

    /// Render the configured template, falling back to the default JSON
    /// payload if no template is set or rendering fails. Content-Type is
    /// always `application/json` (spec §4.6), regardless of which body wins.
    fn render_body(&self, event: &RotationEvent) -> (String, &'static str) {
        if let Some(template) = &self.body_template {
            let mut context = Context::new();
            context.insert("id", &event.id.to_string());
            context.insert("kind", &event.kind);
            context.insert("service", &event.service);
            context.insert("environment", &event.environment);
            context.insert("timestamp", &event.timestamp.to_rfc3339());
            context.insert("title", &event.title());
            context.insert("metadata", &event.metadata);

            match Tera::one_off(template, &context, false) {
                Ok(rendered) => return (rendered, "application/json"),
                Err(e) => {
                    tracing::warn!(error = %e, "webhook body template failed to render, falling back to JSON");
                }
            }
        }
        (Self::default_payload(event).to_string(), "application/json")
    }
}

#[async_trait]
impl NotificationProvider for WebhookProvider {
    fn name(&self) -> &str {
        "webhook"
    }

    fn supports_event(&self, _kind: RotationEventKind) -> bool {
        true
    }

    fn validate(&self) -> Result<(), ProviderError> {
        url::Url::parse(&self.url).map_err(|e| ProviderError::InvalidConfig(format!("invalid webhook URL: {e}")))?;
        reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| ProviderError::InvalidConfig(format!("invalid HTTP method '{}'", self.method)))?;
        if let Some(template) = &self.body_template {
            Tera::one_off(template, &Context::new(), false)
                .map_err(|e| ProviderError::InvalidConfig(format!("invalid body template: {e}")))?;
        }
        Ok(())
    }

    async fn send(&self, event: &RotationEvent, cancel: &ShutdownSignal) -> Result<(), ProviderError> {
        let (body, content_type) = self.render_body(event);
        let method = reqwest::Method::from_bytes(self.method.as_bytes())
            .map_err(|_| ProviderError::InvalidConfig(format!("invalid HTTP method '{}'", self.method)))?;

        let mut cancel = cancel.clone();
        let mut last_error = None;
        for attempt in 1..=self.retry.max_attempts.max(1) {
            if attempt > 1 {
                tokio::select! {
                    _ = tokio::time::sleep(self.retry.delay_for_attempt(attempt - 1)) => {}
                    _ = cancel.wait() => {
                        return Err(ProviderError::DeliveryFailed("canceled between retry attempts".to_string()));
                    }
                }
            }
            let result = self
                .client
                .request(method.clone(), &self.url)
                .header("Content-Type", content_type)
                .body(body.clone())
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) => {
                    last_error = Some(format!("webhook returned {}", response.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }
        }
        Err(ProviderError::DeliveryFailed(
            last_error.unwrap_or_else(|| "webhook delivery failed".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> RotationEvent {
        RotationEvent::new(RotationEventKind::RotationCompleted, "checkout", "prod")
    }

    #[test]
    fn validate_rejects_malformed_url() {
        let provider = WebhookProvider::new("not a url");
        assert!(provider.validate().is_err());
    }

    #[test]
    fn validate_rejects_invalid_method() {
        let provider = WebhookProvider::new("https://example.com/hook").with_method("FLY");
        assert!(provider.validate().is_err());
    }

    #[test]
    fn default_payload_is_json_when_no_template_configured() {
        let provider = WebhookProvider::new("https://example.com/hook");
        let (body, content_type) = provider.render_body(&event());
        assert_eq!(content_type, "application/json");
        assert!(body.contains("\"service\":\"checkout\""));
    }

    #[test]
    fn template_renders_but_content_type_stays_json() {
        let provider = WebhookProvider::new("https://example.com/hook")
            .with_body_template("{{ service }}/{{ environment }}: {{ title }}");
        let (body, content_type) = provider.render_body(&event());
        assert_eq!(content_type, "application/json");
        assert_eq!(body, "checkout/prod: [dsops] Rotation completed: checkout (prod)");
    }

    #[test]
    fn invalid_template_falls_back_to_json() {
        let provider = WebhookProvider::new("https://example.com/hook").with_body_template("{{ unterminated");
        let (_, content_type) = provider.render_body(&event());
        assert_eq!(content_type, "application/json");
    }
}
