//! PagerDuty Events API v2 provider. Only pages on failure events (spec
//! §4.6.4); recovery events resolve the same incident via its dedup key.

use super::{NotificationProvider, ProviderError};
use crate::notify::{RotationEvent, RotationEventKind};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde_json::json;

const SUMMARY_MAX_LEN: usize = 1024;
const VALID_SEVERITIES: [&str; 4] = ["critical", "error", "warning", "info"];

pub struct PagerDutyProvider {
    routing_key: String,
    severity: String,
    auto_resolve: bool,
    client: reqwest::Client,
}

impl PagerDutyProvider {
    pub fn new(routing_key: impl Into<String>, severity: impl Into<String>) -> Self {
        Self {
            routing_key: routing_key.into(),
            severity: severity.into(),
            auto_resolve: true,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_auto_resolve(mut self, auto_resolve: bool) -> Self {
        self.auto_resolve = auto_resolve;
        self
    }

    /// `dsops-{service}-{environment}[-{rotation_id}]` (spec §4.6.4) so a
    /// trigger and its matching resolve share one incident even when
    /// several rotations of the same `(service, environment)` overlap.
    fn dedup_key(event: &RotationEvent) -> String {
        format!("dsops-{}-{}-{}", event.service, event.environment, event.id)
    }

    /// `completed+success` resolves the incident; everything else trigers
    /// it (spec §4.6.4). This crate's `RotationEventKind` folds kind and
    /// status into one enum, so "completed+success" is `RotationCompleted`
    /// or `RollbackCompleted`.
    fn action(kind: RotationEventKind) -> &'static str {
        match kind {
            RotationEventKind::RotationCompleted | RotationEventKind::RollbackCompleted => "resolve",
            _ => "trigger",
        }
    }

    fn truncate_summary(summary: &str) -> String {
        if summary.chars().count() <= SUMMARY_MAX_LEN {
            return summary.to_string();
        }
        summary.chars().take(SUMMARY_MAX_LEN - 1).collect::<String>() + "…"
    }

    fn build_payload(&self, event: &RotationEvent) -> serde_json::Value {
        let dedup_key = Self::dedup_key(event);
        let action = Self::action(event.kind);

        let mut payload = json!({
            "routing_key": self.routing_key,
            "event_action": action,
            "dedup_key": dedup_key,
        });

        if action == "trigger" {
            payload["payload"] = json!({
                "summary": Self::truncate_summary(&event.title()),
                "source": format!("{}/{}", event.service, event.environment),
                "severity": self.severity,
                "timestamp": event.timestamp.to_rfc3339(),
                "custom_details": event.metadata,
            });
        }

        payload
    }
}

#[async_trait]
impl NotificationProvider for PagerDutyProvider {
    fn name(&self) -> &str {
        "pagerduty"
    }

    fn supports_event(&self, kind: RotationEventKind) -> bool {
        if matches!(kind, RotationEventKind::RotationCompleted | RotationEventKind::RollbackCompleted) {
            return self.auto_resolve;
        }
        kind.is_failure()
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.routing_key.trim().is_empty() {
            return Err(ProviderError::InvalidConfig("routing_key is required".to_string()));
        }
        if !VALID_SEVERITIES.contains(&self.severity.as_str()) {
            return Err(ProviderError::InvalidConfig(format!(
                "invalid severity '{}', expected one of {:?}",
                self.severity, VALID_SEVERITIES
            )));
        }
        Ok(())
    }

    async fn send(&self, event: &RotationEvent, _cancel: &ShutdownSignal) -> Result<(), ProviderError> {
        let payload = self.build_payload(event);
        let response = self
            .client
            .post("https://events.pagerduty.com/v2/enqueue")
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::DeliveryFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::DeliveryFailed(format!(
                "pagerduty events API returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_unknown_severity() {
        let provider = PagerDutyProvider::new("key", "catastrophic");
        assert!(provider.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_routing_key() {
        let provider = PagerDutyProvider::new("", "critical");
        assert!(provider.validate().is_err());
    }

    #[test]
    fn failure_events_trigger_with_dedup_key() {
        let provider = PagerDutyProvider::new("key", "critical");
        let event = RotationEvent::new(RotationEventKind::RotationFailed, "checkout", "prod");
        let payload = provider.build_payload(&event);
        assert_eq!(payload["event_action"], "trigger");
        assert_eq!(payload["dedup_key"], format!("dsops-checkout-prod-{}", event.id));
        assert!(payload["payload"]["summary"].is_string());
    }

    #[test]
    fn rollback_completed_resolves_without_a_payload_block() {
        let provider = PagerDutyProvider::new("key", "critical");
        let event = RotationEvent::new(RotationEventKind::RollbackCompleted, "checkout", "prod");
        let payload = provider.build_payload(&event);
        assert_eq!(payload["event_action"], "resolve");
        assert!(payload.get("payload").is_none());
    }

    #[test]
    fn rotation_completed_also_resolves() {
        let provider = PagerDutyProvider::new("key", "critical");
        let event = RotationEvent::new(RotationEventKind::RotationCompleted, "checkout", "prod");
        let payload = provider.build_payload(&event);
        assert_eq!(payload["event_action"], "resolve");
    }

    #[test]
    fn disabling_auto_resolve_drops_resolve_events() {
        let provider = PagerDutyProvider::new("key", "critical").with_auto_resolve(false);
        assert!(!provider.supports_event(RotationEventKind::RotationCompleted));
        assert!(!provider.supports_event(RotationEventKind::RollbackCompleted));
        assert!(provider.supports_event(RotationEventKind::RotationFailed));
    }

    #[test]
    fn summary_is_truncated_to_1024_characters() {
        let long_service = "x".repeat(2000);
        let event = RotationEvent::new(RotationEventKind::RotationFailed, long_service, "prod");
        let summary = PagerDutyProvider::truncate_summary(&event.title());
        assert_eq!(summary.chars().count(), SUMMARY_MAX_LEN);
    }

    #[test]
    fn supports_event_only_admits_failures_and_rollback_completion() {
        let provider = PagerDutyProvider::new("key", "critical");
        assert!(provider.supports_event(RotationEventKind::RotationFailed));
        assert!(provider.supports_event(RotationEventKind::RollbackCompleted));
        assert!(!provider.supports_event(RotationEventKind::RotationStarted));
    }
}
