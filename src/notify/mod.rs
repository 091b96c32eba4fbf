//! Notification Dispatcher (spec §4.6, 12% of the system): a bounded-queue
//! fan-out of rotation events to pluggable providers (Slack, email,
//! webhook, PagerDuty).

pub mod providers;

use crate::clock::{Clock, SystemClock};
use crate::config;
use crate::metrics::SharedMetrics;
use crate::server::shutdown::{shutdown_channel, ShutdownController, ShutdownSignal};
use chrono::{DateTime, Utc};
use providers::NotificationProvider;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Per-event delivery timeout the dispatcher worker enforces on every
/// provider (spec line 151: "short per-event timeouts (\u{2264} 5 s)").
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opaque identifier for one rotation attempt, shared across every event
/// emitted while that attempt is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RotationId(Uuid);

impl RotationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RotationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RotationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationEventKind {
    RotationStarted,
    RotationCompleted,
    RotationFailed,
    RollbackTriggered,
    RollbackCompleted,
    RollbackFailed,
}

impl RotationEventKind {
    /// Whether this kind represents an outcome severe enough to page
    /// (spec §4.6.4: PagerDuty only triggers on failures).
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            RotationEventKind::RotationFailed | RotationEventKind::RollbackFailed
        )
    }
}

/// A single notifiable occurrence within a rotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub id: RotationId,
    pub kind: RotationEventKind,
    pub service: String,
    pub environment: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl RotationEvent {
    pub fn new(kind: RotationEventKind, service: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            id: RotationId::new(),
            kind,
            service: service.into(),
            environment: environment.into(),
            timestamp: Utc::now(),
            metadata: serde_json::Value::Null,
        }
    }

    pub fn with_id(mut self, id: RotationId) -> Self {
        self.id = id;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn title(&self) -> String {
        let label = match self.kind {
            RotationEventKind::RotationStarted => "Rotation started",
            RotationEventKind::RotationCompleted => "Rotation completed",
            RotationEventKind::RotationFailed => "Rotation failed",
            RotationEventKind::RollbackTriggered => "Rollback triggered",
            RotationEventKind::RollbackCompleted => "Rollback completed",
            RotationEventKind::RollbackFailed => "Rollback failed",
        };
        format!("[dsops] {label}: {} ({})", self.service, self.environment)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatcherError {
    #[error("dispatcher already started")]
    AlreadyStarted,
    #[error("dispatcher not started")]
    NotStarted,
}

struct RegisteredProvider {
    provider: Arc<dyn NotificationProvider>,
}

/// Bounded-queue fan-out worker: `send` never blocks the caller for long —
/// once the queue is full, the newest event is dropped and counted rather
/// than applying backpressure to whatever triggered the notification.
pub struct Dispatcher {
    queue: RwLock<Option<mpsc::Sender<RotationEvent>>>,
    providers: RwLock<Vec<RegisteredProvider>>,
    capacity: usize,
    dropped_total: AtomicU64,
    metrics: Option<SharedMetrics>,
    clock: Arc<dyn Clock>,
    /// Recreated on every `start()` so a stopped-then-restarted dispatcher
    /// doesn't inherit a signal that's already shut down.
    cancel: RwLock<Option<(ShutdownController, ShutdownSignal)>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            queue: RwLock::new(None),
            providers: RwLock::new(Vec::new()),
            capacity: config::dispatcher_queue_capacity(),
            dropped_total: AtomicU64::new(0),
            metrics: None,
            clock: Arc::new(SystemClock),
            cancel: RwLock::new(None),
        }
    }

    pub fn with_metrics(mut self, metrics: SharedMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn register(&self, provider: Arc<dyn NotificationProvider>) {
        self.providers
            .write()
            .expect("dispatcher providers lock poisoned")
            .push(RegisteredProvider { provider });
    }

    pub fn dropped_total(&self) -> u64 {
        self.dropped_total.load(Ordering::Relaxed)
    }

    /// Start the background worker. Idempotent only in the sense that a
    /// second call fails cleanly rather than spawning a duplicate worker.
    pub fn start(self: &Arc<Self>) -> Result<(), DispatcherError> {
        let mut queue = self.queue.write().expect("dispatcher queue lock poisoned");
        if queue.is_some() {
            return Err(DispatcherError::AlreadyStarted);
        }
        let (tx, mut rx) = mpsc::channel(self.capacity);
        *queue = Some(tx);
        drop(queue);
        *self.cancel.write().expect("dispatcher cancel lock poisoned") = Some(shutdown_channel());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                this.deliver(event).await;
            }
            debug!("dispatcher worker exiting: queue closed");
        });
        Ok(())
    }

    pub fn stop(&self) -> Result<(), DispatcherError> {
        let mut queue = self.queue.write().expect("dispatcher queue lock poisoned");
        let result = queue.take().ok_or(DispatcherError::NotStarted).map(|_| ());
        if let Some((ctrl, _)) = self.cancel.read().expect("dispatcher cancel lock poisoned").as_ref() {
            ctrl.shutdown();
        }
        result
    }

    /// Enqueue `event` for delivery. If the queue is full the event is
    /// dropped and `dropped_total` is incremented; callers are never
    /// blocked waiting for provider I/O.
    pub async fn send(&self, event: RotationEvent) {
        let sender = self.queue.read().expect("dispatcher queue lock poisoned").clone();
        let Some(sender) = sender else {
            warn!("dispatcher not started; dropping event");
            self.record_drop();
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(_)) = sender.try_send(event) {
            warn!("dispatcher queue full; dropping event");
            self.record_drop();
        }
    }

    fn record_drop(&self) {
        self.dropped_total.fetch_add(1, Ordering::Relaxed);
        if let Some(metrics) = &self.metrics {
            metrics.record_notification_dropped();
        }
    }

    async fn deliver(&self, event: RotationEvent) {
        let providers: Vec<Arc<dyn NotificationProvider>> = self
            .providers
            .read()
            .expect("dispatcher providers lock poisoned")
            .iter()
            .map(|p| Arc::clone(&p.provider))
            .collect();
        let cancel = self
            .cancel
            .read()
            .expect("dispatcher cancel lock poisoned")
            .as_ref()
            .map(|(_, signal)| signal.clone())
            .unwrap_or_else(|| shutdown_channel().1);

        for provider in providers {
            if !provider.supports_event(event.kind) {
                continue;
            }
            match tokio::time::timeout(DELIVERY_TIMEOUT, provider.send(&event, &cancel)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(provider = provider.name(), error = %e, "notification delivery failed");
                }
                Err(_) => {
                    error!(provider = provider.name(), "notification delivery timed out");
                }
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
