//! Prometheus metrics registry.
//!
//! Ambient observability infrastructure: exposed at `/metrics` by
//! [`crate::server::health::run_health_server`] regardless of which
//! subsystem is currently active. Counts are cheap, lock-free atomics
//! under the hood (the `prometheus` crate's counter types).

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),
    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Shared, cloneable handle to the process metrics registry.
#[derive(Clone)]
pub struct SharedMetrics(Arc<Inner>);

struct Inner {
    registry: Registry,
    rotations_started: IntCounter,
    rotations_completed: IntCounter,
    rotations_failed: IntCounter,
    rollback_attempts: IntCounterVec,
    notifications_dropped: IntCounter,
}

impl SharedMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let rotations_started = IntCounter::with_opts(Opts::new(
            "dsops_rotations_started_total",
            "Rotations started, by all strategies combined",
        ))?;
        let rotations_completed = IntCounter::with_opts(Opts::new(
            "dsops_rotations_completed_total",
            "Rotations that completed every wave successfully",
        ))?;
        let rotations_failed = IntCounter::with_opts(Opts::new(
            "dsops_rotations_failed_total",
            "Rotations that ended in a hard failure",
        ))?;
        let rollback_attempts = IntCounterVec::new(
            Opts::new(
                "dsops_rollback_attempts_total",
                "Rollback attempts, labeled by final state",
            ),
            &["state"],
        )?;
        let notifications_dropped = IntCounter::with_opts(Opts::new(
            "dsops_notifications_dropped_total",
            "Events dropped by the dispatcher because the queue was full",
        ))?;

        registry.register(Box::new(rotations_started.clone()))?;
        registry.register(Box::new(rotations_completed.clone()))?;
        registry.register(Box::new(rotations_failed.clone()))?;
        registry.register(Box::new(rollback_attempts.clone()))?;
        registry.register(Box::new(notifications_dropped.clone()))?;

        Ok(Self(Arc::new(Inner {
            registry,
            rotations_started,
            rotations_completed,
            rotations_failed,
            rollback_attempts,
            notifications_dropped,
        })))
    }

    pub fn record_rotation_started(&self) {
        self.0.rotations_started.inc();
    }

    pub fn record_rotation_completed(&self) {
        self.0.rotations_completed.inc();
    }

    pub fn record_rotation_failed(&self) {
        self.0.rotations_failed.inc();
    }

    pub fn record_rollback_attempt(&self, final_state: &str) {
        self.0.rollback_attempts.with_label_values(&[final_state]).inc();
    }

    pub fn record_notification_dropped(&self) {
        self.0.notifications_dropped.inc();
    }

    /// Encode the registry in Prometheus text exposition format.
    pub fn encode(&self) -> Result<Vec<u8>, MetricsError> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.0.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        Ok(buffer)
    }
}
