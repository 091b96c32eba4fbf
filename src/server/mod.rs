//! HTTP server for health, readiness and metrics endpoints, plus graceful
//! shutdown coordination.
//!
//! - `/healthz` - Liveness: is the process alive?
//! - `/readyz` - Readiness: has the orchestrator finished initializing?
//! - `/metrics` - Prometheus metrics in text format

pub mod health;
pub mod shutdown;

pub use health::{run_health_server, ReadinessState};
pub use shutdown::{shutdown_channel, wait_for_signal, ShutdownController, ShutdownSignal};
