//! Health checker variants (spec §4.4): SQL, HTTP and script-based.

pub mod http;
pub mod script;
pub mod sql;

pub use self::http::HttpChecker;
pub use script::ScriptChecker;
pub use sql::SqlChecker;

use crate::health::HealthResult;
use crate::rollout::ServiceConfig;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum CheckerError {
    #[error("checker timed out")]
    Timeout,
    #[error("checker canceled")]
    Cancelled,
    #[error("checker I/O error: {0}")]
    Io(String),
    #[error("checker configuration error: {0}")]
    InvalidConfig(String),
}

/// A checker that fails if either it returns an error or its result is
/// `healthy=false` — both count as a failed tick (spec §4.4).
#[async_trait]
pub trait HealthChecker: Send + Sync {
    fn name(&self) -> &str;
    fn protocol(&self) -> &'static str;
    async fn check(
        &self,
        service: &ServiceConfig,
        cancel: &ShutdownSignal,
    ) -> Result<HealthResult, CheckerError>;
}
