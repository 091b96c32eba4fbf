use super::*;
use crate::discovery::Instance;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

struct ScriptedChecker {
    name: String,
    results: Mutex<Vec<Result<bool, ()>>>,
}

impl ScriptedChecker {
    fn new(name: &str, results: Vec<Result<bool, ()>>) -> Arc<dyn HealthChecker> {
        Arc::new(Self {
            name: name.to_string(),
            results: Mutex::new(results),
        })
    }
}

#[async_trait]
impl HealthChecker for ScriptedChecker {
    fn name(&self) -> &str {
        &self.name
    }

    fn protocol(&self) -> &'static str {
        "scripted"
    }

    async fn check(
        &self,
        _service: &ServiceConfig,
        _cancel: &crate::server::shutdown::ShutdownSignal,
    ) -> Result<HealthResult, CheckerError> {
        let mut results = self.results.lock().unwrap();
        let outcome = if results.len() > 1 {
            results.remove(0)
        } else if let Some(last) = results.last().copied() {
            last
        } else {
            Ok(true)
        };
        match outcome {
            Ok(true) => Ok(HealthResult::healthy("ok", Duration::from_millis(1), &SystemClock)),
            Ok(false) => Ok(HealthResult::unhealthy("unhealthy", Duration::from_millis(1), &SystemClock)),
            Err(()) => Err(CheckerError::Io("boom".to_string())),
        }
    }
}

struct CountingTrigger {
    count: AtomicU32,
}

impl CountingTrigger {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            count: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl RollbackTrigger for CountingTrigger {
    async fn trigger(&self, _service: &str, _environment: &str, _reason: &str) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

fn service() -> ServiceConfig {
    ServiceConfig::new("checkout", "prod").with_instances(vec![Instance::new("i1")])
}

#[tokio::test]
async fn starting_a_second_session_for_the_same_key_is_rejected() {
    let monitor = Arc::new(Monitor::new());
    let config = MonitorConfig::new(
        Duration::from_millis(20),
        3,
        vec![ScriptedChecker::new("always-ok", vec![Ok(true)])],
    );
    let trigger = CountingTrigger::new();

    monitor
        .start_monitoring(service(), config.clone(), trigger.clone())
        .expect("first session starts");
    let err = monitor
        .start_monitoring(service(), config, trigger)
        .expect_err("second session for same key is rejected");
    assert!(matches!(err, HealthMonitorError::AlreadyMonitoring { .. }));

    monitor.stop_monitoring("checkout", "prod").unwrap();
}

#[tokio::test]
async fn session_triggers_rollback_after_consecutive_failure_threshold() {
    let monitor = Arc::new(Monitor::new());
    let config = MonitorConfig::new(
        Duration::from_millis(5),
        2,
        vec![ScriptedChecker::new("flaky", vec![Ok(false), Ok(false)])],
    );
    let trigger = CountingTrigger::new();

    monitor
        .start_monitoring(service(), config, trigger.clone())
        .expect("session starts");

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(trigger.count.load(Ordering::SeqCst), 1);
    assert!(!monitor.is_monitoring("checkout", "prod"));
}

#[tokio::test]
async fn stopping_a_session_not_present_is_an_error() {
    let monitor = Monitor::new();
    let err = monitor
        .stop_monitoring("checkout", "prod")
        .expect_err("no session is active");
    assert!(matches!(err, HealthMonitorError::NotMonitoring { .. }));
}

#[tokio::test]
async fn check_for_returns_ok_once_duration_elapses_while_healthy() {
    let monitor = Monitor::new();
    let checkers = vec![ScriptedChecker::new("always-ok", vec![Ok(true)])];
    let (_ctrl, cancel) = crate::server::shutdown::shutdown_channel();
    let result = monitor
        .check_for(
            &service(),
            &checkers,
            Duration::from_millis(20),
            Duration::from_millis(5),
            &cancel,
        )
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn check_for_fails_fast_on_first_unhealthy_tick() {
    let monitor = Monitor::new();
    let checkers = vec![ScriptedChecker::new("fails", vec![Ok(false)])];
    let (_ctrl, cancel) = crate::server::shutdown::shutdown_channel();
    let result = monitor
        .check_for(
            &service(),
            &checkers,
            Duration::from_secs(5),
            Duration::from_millis(5),
            &cancel,
        )
        .await;
    assert!(result.is_err());
}
