//! Process-level configuration read from the environment.
//!
//! Mirrors the small `fn ..._from_env() -> T` helpers the rest of the
//! ambient stack uses instead of a generic configuration framework: each
//! knob is independent, has a sane default, and is read lazily rather than
//! parsed into one monolithic struct at startup.

use std::time::Duration;

/// Port the health/readiness/metrics server listens on.
pub fn health_port() -> u16 {
    std::env::var("DSOPS_HEALTH_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
}

/// Whether automatic rollback is enabled for the rollback manager.
pub fn automatic_rollback_enabled() -> bool {
    std::env::var("DSOPS_AUTOMATIC_ROLLBACK")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(true)
}

/// Bounded queue capacity for the notification dispatcher.
pub fn dispatcher_queue_capacity() -> usize {
    std::env::var("DSOPS_DISPATCHER_QUEUE_CAPACITY")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100)
}

/// Default rollback-attempt timeout.
pub fn rollback_attempt_timeout() -> Duration {
    std::env::var("DSOPS_ROLLBACK_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

/// Default discovery HTTP request timeout.
pub fn discovery_http_timeout() -> Duration {
    Duration::from_secs(30)
}

/// Webhook URL the demo wiring in `main` registers a [`crate::notify::providers::WebhookProvider`]
/// against. Unset by default; the dispatcher simply has no providers to
/// fan out to.
pub fn webhook_url() -> Option<String> {
    std::env::var("DSOPS_WEBHOOK_URL").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_env_unset() {
        std::env::remove_var("DSOPS_HEALTH_PORT");
        assert_eq!(health_port(), 8080);
        assert_eq!(dispatcher_queue_capacity(), 100);
        assert_eq!(rollback_attempt_timeout(), Duration::from_secs(30));
    }
}
