//! Notification provider implementations (spec §4.6): Slack, email,
//! generic webhook, and PagerDuty.

pub mod email;
pub mod pagerduty;
pub mod slack;
pub mod webhook;

pub use email::EmailProvider;
pub use pagerduty::PagerDutyProvider;
pub use slack::SlackProvider;
pub use webhook::WebhookProvider;

use super::{RotationEvent, RotationEventKind};
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
    #[error("delivery failed: {0}")]
    DeliveryFailed(String),
}

/// A destination the Dispatcher can deliver [`RotationEvent`]s to.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this provider wants to receive events of `kind`. Most
    /// providers return `true` unconditionally; PagerDuty only pages on
    /// failures (spec §4.6.4).
    fn supports_event(&self, kind: RotationEventKind) -> bool;

    /// Cheap pre-flight configuration check, run once at registration.
    fn validate(&self) -> Result<(), ProviderError>;

    /// Deliver `event`. Between retry attempts, implementations must honor
    /// `cancel` (spec §4.6: "Between attempts, cancellation is honored").
    async fn send(&self, event: &RotationEvent, cancel: &ShutdownSignal) -> Result<(), ProviderError>;
}
