//! Slack provider: posts a Block Kit message to an incoming webhook URL
//! (spec §4.6): header, a two-field service/environment section with
//! optional strategy/duration fields, an optional error block, an
//! optional per-event-type mentions block, and a context block carrying a
//! Slack date-format timestamp.

use super::{NotificationProvider, ProviderError};
use crate::notify::{RotationEvent, RotationEventKind};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;

pub struct SlackProvider {
    webhook_url: String,
    /// Mention lists per event kind; only consulted for `failed` and
    /// `rollback` events (spec §4.6).
    mentions: HashMap<RotationEventKind, Vec<String>>,
    client: reqwest::Client,
}

impl SlackProvider {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            mentions: HashMap::new(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_mentions(mut self, kind: RotationEventKind, user_ids: Vec<String>) -> Self {
        self.mentions.insert(kind, user_ids);
        self
    }

    fn wants_mentions(kind: RotationEventKind) -> bool {
        kind.is_failure()
            || matches!(
                kind,
                RotationEventKind::RollbackTriggered | RotationEventKind::RollbackCompleted
            )
    }

    fn metadata_str<'a>(event: &'a RotationEvent, key: &str) -> Option<&'a str> {
        event.metadata.get(key).and_then(|v| v.as_str())
    }

    /// `<!date^epoch^{date_short_pretty} at {time}|fallback>`: Slack's own
    /// date-format token syntax, rendered client-side in the viewer's
    /// timezone (spec §4.6: "a Slack date-format timestamp").
    fn slack_timestamp(event: &RotationEvent) -> String {
        let fallback = event.timestamp.format("%Y-%m-%d %H:%M:%S UTC");
        format!(
            "<!date^{}^{{date_short_pretty}} at {{time}}|{}>",
            event.timestamp.timestamp(),
            fallback
        )
    }

    fn build_payload(&self, event: &RotationEvent) -> serde_json::Value {
        let mut blocks = vec![json!({
            "type": "header",
            "text": { "type": "plain_text", "text": event.title(), "emoji": true },
        })];

        let mut fields = vec![
            json!({ "type": "mrkdwn", "text": format!("*Service:*\n{}", event.service) }),
            json!({ "type": "mrkdwn", "text": format!("*Environment:*\n{}", event.environment) }),
        ];
        if let Some(strategy) = Self::metadata_str(event, "strategy") {
            fields.push(json!({ "type": "mrkdwn", "text": format!("*Strategy:*\n{strategy}") }));
        }
        if let Some(duration) = event.metadata.get("duration_seconds").or_else(|| event.metadata.get("duration_ms")) {
            fields.push(json!({ "type": "mrkdwn", "text": format!("*Duration:*\n{duration}") }));
        }
        blocks.push(json!({ "type": "section", "fields": fields }));

        if let Some(error) = Self::metadata_str(event, "error") {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n{error}") },
            }));
        }

        if Self::wants_mentions(event.kind) {
            if let Some(user_ids) = self.mentions.get(&event.kind) {
                if !user_ids.is_empty() {
                    let mentions = user_ids.iter().map(|id| format!("<@{id}>")).collect::<Vec<_>>().join(" ");
                    blocks.push(json!({
                        "type": "section",
                        "text": { "type": "mrkdwn", "text": mentions },
                    }));
                }
            }
        }

        blocks.push(json!({
            "type": "context",
            "elements": [{ "type": "mrkdwn", "text": Self::slack_timestamp(event) }],
        }));

        json!({ "blocks": blocks })
    }
}

#[async_trait]
impl NotificationProvider for SlackProvider {
    fn name(&self) -> &str {
        "slack"
    }

    fn supports_event(&self, _kind: RotationEventKind) -> bool {
        true
    }

    fn validate(&self) -> Result<(), ProviderError> {
        url::Url::parse(&self.webhook_url)
            .map_err(|e| ProviderError::InvalidConfig(format!("invalid Slack webhook URL: {e}")))?;
        Ok(())
    }

    async fn send(&self, event: &RotationEvent, _cancel: &ShutdownSignal) -> Result<(), ProviderError> {
        let payload = self.build_payload(event);
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ProviderError::DeliveryFailed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ProviderError::DeliveryFailed(format!(
                "slack webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: RotationEventKind) -> RotationEvent {
        RotationEvent::new(kind, "checkout", "prod")
    }

    #[test]
    fn validate_rejects_malformed_url() {
        let provider = SlackProvider::new("not a url");
        assert!(provider.validate().is_err());
    }

    #[test]
    fn header_and_service_environment_fields_are_always_present() {
        let provider = SlackProvider::new("https://hooks.slack.com/services/x");
        let payload = provider.build_payload(&event(RotationEventKind::RotationCompleted));
        let blocks = payload["blocks"].as_array().unwrap();
        assert_eq!(blocks[0]["type"], "header");
        let fields = blocks[1]["fields"].as_array().unwrap();
        assert!(fields[0]["text"].as_str().unwrap().contains("checkout"));
        assert!(fields[1]["text"].as_str().unwrap().contains("prod"));
    }

    #[test]
    fn mentions_block_present_only_for_failure_and_rollback_kinds() {
        let provider = SlackProvider::new("https://hooks.slack.com/services/x")
            .with_mentions(RotationEventKind::RotationFailed, vec!["U1".to_string()]);

        let failed = provider.build_payload(&event(RotationEventKind::RotationFailed));
        let mentions_text = failed["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .find_map(|b| b["text"]["text"].as_str().filter(|t| t.contains("<@U1>")));
        assert!(mentions_text.is_some());

        let completed = provider.build_payload(&event(RotationEventKind::RotationCompleted));
        let has_mentions = completed["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .any(|b| b["text"]["text"].as_str().is_some_and(|t| t.contains("<@")));
        assert!(!has_mentions);
    }

    #[test]
    fn error_block_included_when_metadata_has_error() {
        let mut event = event(RotationEventKind::RotationFailed);
        event.metadata = json!({ "error": "health check failed" });
        let provider = SlackProvider::new("https://hooks.slack.com/services/x");
        let payload = provider.build_payload(&event);
        let has_error_block = payload["blocks"]
            .as_array()
            .unwrap()
            .iter()
            .any(|b| b["text"]["text"].as_str().is_some_and(|t| t.contains("*Error:*")));
        assert!(has_error_block);
    }

    #[test]
    fn context_block_carries_slack_date_token() {
        let provider = SlackProvider::new("https://hooks.slack.com/services/x");
        let payload = provider.build_payload(&event(RotationEventKind::RotationStarted));
        let last = payload["blocks"].as_array().unwrap().last().unwrap();
        assert_eq!(last["type"], "context");
        assert!(last["elements"][0]["text"].as_str().unwrap().starts_with("<!date^"));
    }
}
