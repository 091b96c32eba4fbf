//! SQL health checker: ping, query-latency and connection-pool probes
//! against a database (spec §4.4). The actual database driver is an
//! external collaborator (spec §1); this module only defines the probe
//! contract and the pass/fail policy around it.

use super::CheckerError;
use crate::health::HealthResult;
use crate::rollout::ServiceConfig;
use crate::server::shutdown::ShutdownSignal;
use async_trait::async_trait;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct SqlCheckerOptions {
    pub ping_enabled: bool,
    pub query_latency_enabled: bool,
    pub query_latency_threshold: Duration,
    pub connection_pool_enabled: bool,
    /// Percentage of the pool in use at or above which the pool is
    /// reported degraded rather than healthy (spec §4.4's
    /// `ConnectionPoolWarnPct`). Distinct from the unhealthy threshold,
    /// which fires only once the pool is fully exhausted.
    pub connection_pool_warn_pct: f64,
}

impl Default for SqlCheckerOptions {
    fn default() -> Self {
        Self {
            ping_enabled: true,
            query_latency_enabled: false,
            query_latency_threshold: Duration::from_millis(250),
            connection_pool_enabled: false,
            connection_pool_warn_pct: 80.0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PoolStats {
    pub free_connections: u32,
    pub in_use_connections: u32,
}

/// The database driver this checker polls. Implemented externally per
/// backend (Postgres, MySQL, ...); this crate only consumes it.
#[async_trait]
pub trait SqlProbe: Send + Sync {
    async fn ping(&self) -> Result<(), CheckerError>;
    async fn run_latency_probe_query(&self) -> Result<(), CheckerError>;
    async fn pool_stats(&self) -> Result<PoolStats, CheckerError>;
}

pub struct SqlChecker {
    name: String,
    probe: std::sync::Arc<dyn SqlProbe>,
    options: SqlCheckerOptions,
}

impl SqlChecker {
    pub fn new(name: impl Into<String>, probe: std::sync::Arc<dyn SqlProbe>, options: SqlCheckerOptions) -> Self {
        Self {
            name: name.into(),
            probe,
            options,
        }
    }
}

#[async_trait]
impl super::HealthChecker for SqlChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "sql"
    }

    async fn check(
        &self,
        _service: &ServiceConfig,
        _cancel: &ShutdownSignal,
    ) -> Result<HealthResult, CheckerError> {
        let started = Instant::now();

        if self.options.ping_enabled {
            self.probe.ping().await?;
        }

        if self.options.query_latency_enabled {
            let probe_started = Instant::now();
            self.probe.run_latency_probe_query().await?;
            let latency = probe_started.elapsed();
            if latency > self.options.query_latency_threshold {
                return Ok(HealthResult::unhealthy(
                    format!("query latency {latency:?} exceeded threshold {:?}", self.options.query_latency_threshold),
                    started.elapsed(),
                    &crate::clock::SystemClock,
                ));
            }
        }

        if self.options.connection_pool_enabled {
            let stats = self.probe.pool_stats().await?;
            let max = stats.free_connections + stats.in_use_connections;
            if max > 0 && stats.in_use_connections >= max {
                return Ok(HealthResult::unhealthy(
                    format!(
                        "connection pool exhausted: {} free, {} in use",
                        stats.free_connections, stats.in_use_connections
                    ),
                    started.elapsed(),
                    &crate::clock::SystemClock,
                )
                .with_metadata("free_connections", serde_json::json!(stats.free_connections)));
            }
            if max > 0 {
                let used_pct = (stats.in_use_connections as f64 / max as f64) * 100.0;
                if used_pct >= self.options.connection_pool_warn_pct {
                    return Ok(HealthResult::healthy(
                        format!(
                            "connection pool at {used_pct:.1}% ({} free, {} in use)",
                            stats.free_connections, stats.in_use_connections
                        ),
                        started.elapsed(),
                        &crate::clock::SystemClock,
                    )
                    .with_metadata("status", serde_json::json!("degraded"))
                    .with_metadata("free_connections", serde_json::json!(stats.free_connections)));
                }
            }
        }

        Ok(HealthResult::healthy("database reachable", started.elapsed(), &crate::clock::SystemClock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::checkers::HealthChecker;
    use std::sync::Arc;

    struct FakeProbe {
        ping_ok: bool,
        latency: Duration,
        stats: PoolStats,
    }

    #[async_trait]
    impl SqlProbe for FakeProbe {
        async fn ping(&self) -> Result<(), CheckerError> {
            if self.ping_ok {
                Ok(())
            } else {
                Err(CheckerError::Io("connection refused".to_string()))
            }
        }

        async fn run_latency_probe_query(&self) -> Result<(), CheckerError> {
            tokio::time::sleep(self.latency).await;
            Ok(())
        }

        async fn pool_stats(&self) -> Result<PoolStats, CheckerError> {
            Ok(self.stats)
        }
    }

    fn service() -> ServiceConfig {
        ServiceConfig::new("svc", "prod")
    }

    fn cancel() -> ShutdownSignal {
        crate::server::shutdown::shutdown_channel().1
    }

    #[tokio::test]
    async fn ping_failure_propagates_as_error() {
        let probe = Arc::new(FakeProbe {
            ping_ok: false,
            latency: Duration::ZERO,
            stats: PoolStats {
                free_connections: 5,
                in_use_connections: 0,
            },
        });
        let checker = SqlChecker::new("db", probe, SqlCheckerOptions::default());
        assert!(checker.check(&service(), &cancel()).await.is_err());
    }

    #[tokio::test]
    async fn exhausted_pool_is_reported_unhealthy() {
        let probe = Arc::new(FakeProbe {
            ping_ok: true,
            latency: Duration::ZERO,
            stats: PoolStats {
                free_connections: 0,
                in_use_connections: 10,
            },
        });
        let options = SqlCheckerOptions {
            connection_pool_enabled: true,
            ..SqlCheckerOptions::default()
        };
        let checker = SqlChecker::new("db", probe, options);
        let result = checker.check(&service(), &cancel()).await.unwrap();
        assert!(!result.healthy);
    }

    #[tokio::test]
    async fn pool_above_warn_threshold_is_degraded_not_unhealthy() {
        let probe = Arc::new(FakeProbe {
            ping_ok: true,
            latency: Duration::ZERO,
            stats: PoolStats {
                free_connections: 1,
                in_use_connections: 9,
            },
        });
        let options = SqlCheckerOptions {
            connection_pool_enabled: true,
            connection_pool_warn_pct: 80.0,
            ..SqlCheckerOptions::default()
        };
        let checker = SqlChecker::new("db", probe, options);
        let result = checker.check(&service(), &cancel()).await.unwrap();
        assert!(result.healthy);
        assert_eq!(result.status(), crate::health::HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn slow_query_over_threshold_is_reported_unhealthy() {
        let probe = Arc::new(FakeProbe {
            ping_ok: true,
            latency: Duration::from_millis(50),
            stats: PoolStats {
                free_connections: 5,
                in_use_connections: 0,
            },
        });
        let options = SqlCheckerOptions {
            query_latency_enabled: true,
            query_latency_threshold: Duration::from_millis(5),
            ..SqlCheckerOptions::default()
        };
        let checker = SqlChecker::new("db", probe, options);
        let result = checker.check(&service(), &cancel()).await.unwrap();
        assert!(!result.healthy);
    }

    #[tokio::test]
    async fn healthy_when_all_enabled_probes_pass() {
        let probe = Arc::new(FakeProbe {
            ping_ok: true,
            latency: Duration::from_millis(1),
            stats: PoolStats {
                free_connections: 9,
                in_use_connections: 1,
            },
        });
        let options = SqlCheckerOptions {
            ping_enabled: true,
            query_latency_enabled: true,
            query_latency_threshold: Duration::from_millis(100),
            connection_pool_enabled: true,
            connection_pool_warn_pct: 80.0,
        };
        let checker = SqlChecker::new("db", probe, options);
        let result = checker.check(&service(), &cancel()).await.unwrap();
        assert!(result.healthy);
        assert_eq!(result.status(), crate::health::HealthStatus::Healthy);
    }
}
