//! Process entry point: wires the five subsystems together and runs one
//! example canary rotation end to end, alongside the health/readiness/
//! metrics server. Driving this from a real CLI is out of scope (spec §1);
//! this binary exists to prove the wiring, the way the teacher's `main.rs`
//! wires controller + server + event sinks into one process.

use async_trait::async_trait;
use dsops::config;
use dsops::discovery::{Discovery, ExplicitDiscovery, Instance};
use dsops::notify::providers::WebhookProvider;
use dsops::notify::{Dispatcher, RotationEvent, RotationEventKind};
use dsops::registry::{self, ValidationOutcome};
use dsops::rollback::{RestoreError, RollbackManager, Restorer};
use dsops::rollout::canary::CanaryStrategy;
use dsops::rollout::{ApplyError, ApplyToInstance, NoopHealthGate, RolloutContext, ServiceConfig};
use dsops::server::{run_health_server, shutdown_channel, wait_for_signal, ReadinessState};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Demo `ApplyToInstance`: logs the instance it would rotate rather than
/// calling a real secret backend (out of scope per spec §1).
struct LoggingApply;

#[async_trait]
impl ApplyToInstance for LoggingApply {
    async fn apply(&self, service: &ServiceConfig, instance: &Instance) -> Result<(), ApplyError> {
        info!(service = %service.name, instance = %instance.id, "applying rotated credential");
        Ok(())
    }
}

/// Demo `Restorer`: always restores and verifies successfully. A real
/// deployment injects one backed by the secret backend's API.
struct NoopRestorer;

#[async_trait]
impl Restorer for NoopRestorer {
    async fn restore(&self, service: &str, environment: &str) -> Result<(), RestoreError> {
        info!(service, environment, "restoring previous credential version");
        Ok(())
    }

    async fn verify(&self, service: &str, environment: &str) -> Result<bool, RestoreError> {
        info!(service, environment, "verifying restored credential");
        Ok(true)
    }
}

fn demo_service() -> ServiceConfig {
    ServiceConfig::new("checkout", "staging").with_instances(vec![
        Instance::new("checkout-1").with_label("canary", "true"),
        Instance::new("checkout-2"),
        Instance::new("checkout-3"),
        Instance::new("checkout-4"),
        Instance::new("checkout-5"),
    ])
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!("starting dsops secret rotation orchestrator");

    let (shutdown_controller, shutdown_signal) = shutdown_channel();
    let readiness = ReadinessState::new();
    let metrics = dsops::metrics::SharedMetrics::new().expect("failed to build metrics registry");

    let health_readiness = readiness.clone();
    let health_metrics = metrics.clone();
    let health_handle = tokio::spawn(async move {
        if let Err(e) = run_health_server(config::health_port(), health_readiness, health_metrics).await {
            warn!(error = %e, "health server failed");
        }
    });

    // Capability registry + strategy validation (spec §4.1).
    let catalog = registry::global();
    match catalog.validate_provider_strategy("aws-secrets-manager", "versioned") {
        Ok(ValidationOutcome::Valid) => info!("strategy 'versioned' is valid for aws-secrets-manager"),
        Ok(ValidationOutcome::ValidWithWarning(w)) => warn!(warning = %w, "strategy valid with warning"),
        Err(e) => error!(error = %e, "strategy validation failed"),
    }

    // Notification dispatcher (spec §4.6); without a configured webhook URL
    // it simply has no providers and every send is a silent no-op.
    let dispatcher = Arc::new(Dispatcher::new().with_metrics(metrics.clone()));
    if let Some(url) = config::webhook_url() {
        dispatcher.register(Arc::new(WebhookProvider::new(url)));
        info!("webhook notification provider registered");
    } else {
        info!("DSOPS_WEBHOOK_URL not set; notifications will have no providers");
    }
    dispatcher.start().expect("dispatcher starts exactly once");

    // Rollback manager (spec §4.5).
    let rollback = Arc::new(
        RollbackManager::new(Arc::new(NoopRestorer))
            .with_dispatcher(Arc::clone(&dispatcher))
            .with_metrics(metrics.clone())
            .with_cancel(shutdown_signal.clone()),
    );

    // Instance discovery (spec §4.2) + canary rollout (spec §4.3.1).
    let service = demo_service();
    let discovery = ExplicitDiscovery::new(service.instances.clone());
    discovery.validate().expect("demo discovery config is valid");
    let discovered = discovery
        .discover(shutdown_signal.clone())
        .await
        .expect("demo discovery succeeds");
    let service = service.with_instances(discovered);

    readiness.set_ready();
    info!("orchestrator ready");

    let rollout_ctx = RolloutContext::new(Arc::new(LoggingApply), shutdown_signal.clone())
        .with_health_gate(Arc::new(NoopHealthGate))
        .with_rollback(Arc::clone(&rollback))
        .with_dispatcher(Arc::clone(&dispatcher));

    let strategy = CanaryStrategy::new();
    let rotation_run = async {
        dispatcher
            .send(RotationEvent::new(RotationEventKind::RotationStarted, service.name.as_str(), service.environment.as_str()))
            .await;
        let plan = match strategy.plan(&service) {
            Ok(plan) => plan,
            Err(e) => {
                error!(error = %e, "failed to plan demo rollout");
                return;
            }
        };
        match strategy.execute(&rollout_ctx, &service, &plan).await {
            Ok(()) => {
                info!("demo canary rollout completed");
                dispatcher
                    .send(RotationEvent::new(
                        RotationEventKind::RotationCompleted,
                        service.name.as_str(),
                        service.environment.as_str(),
                    ))
                    .await;
            }
            Err(e) => {
                error!(error = %e, "demo canary rollout failed");
                dispatcher
                    .send(RotationEvent::new(RotationEventKind::RotationFailed, service.name.as_str(), service.environment.as_str()))
                    .await;
            }
        }
    };

    tokio::select! {
        _ = rotation_run => {
            info!("demo rotation run finished, waiting for shutdown signal");
        }
        signal = wait_for_signal() => {
            info!(signal = signal, "initiating graceful shutdown");
        }
    }

    readiness.set_not_ready();
    shutdown_controller.shutdown();
    dispatcher.stop().ok();
    health_handle.abort();

    info!("dsops orchestrator shut down gracefully");
    Ok(())
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
