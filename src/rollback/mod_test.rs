use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

struct ScriptedRestorer {
    restore_failures: u32,
    restore_calls: AtomicU32,
    verify_result: Mutex<Result<bool, RestoreError>>,
    restore_delay: Duration,
}

impl ScriptedRestorer {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            restore_failures: 0,
            restore_calls: AtomicU32::new(0),
            verify_result: Mutex::new(Ok(true)),
            restore_delay: Duration::ZERO,
        })
    }

    fn failing_restore_times(n: u32) -> Arc<Self> {
        Arc::new(Self {
            restore_failures: n,
            restore_calls: AtomicU32::new(0),
            verify_result: Mutex::new(Ok(true)),
            restore_delay: Duration::ZERO,
        })
    }

    fn with_verify_result(result: Result<bool, RestoreError>) -> Arc<Self> {
        Arc::new(Self {
            restore_failures: 0,
            restore_calls: AtomicU32::new(0),
            verify_result: Mutex::new(result),
            restore_delay: Duration::ZERO,
        })
    }

    fn slow() -> Arc<Self> {
        Arc::new(Self {
            restore_failures: 0,
            restore_calls: AtomicU32::new(0),
            verify_result: Mutex::new(Ok(true)),
            restore_delay: Duration::from_millis(100),
        })
    }
}

#[async_trait::async_trait]
impl Restorer for ScriptedRestorer {
    async fn restore(&self, _service: &str, _environment: &str) -> Result<(), RestoreError> {
        if !self.restore_delay.is_zero() {
            tokio::time::sleep(self.restore_delay).await;
        }
        let call = self.restore_calls.fetch_add(1, Ordering::SeqCst);
        if call < self.restore_failures {
            Err(RestoreError("restore backend unavailable".to_string()))
        } else {
            Ok(())
        }
    }

    async fn verify(&self, _service: &str, _environment: &str) -> Result<bool, RestoreError> {
        self.verify_result.lock().unwrap().clone()
    }
}

#[tokio::test]
async fn manual_rollback_succeeds_and_reaches_completed() {
    let manager = RollbackManager::new(ScriptedRestorer::succeeding());
    manager.manual_rollback("checkout", "prod", "health check failed").await.unwrap();
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Completed));
}

#[tokio::test]
async fn rollback_retries_transient_restore_failures_then_succeeds() {
    let manager = RollbackManager::new(ScriptedRestorer::failing_restore_times(1)).with_max_retries(2);
    manager.manual_rollback("checkout", "prod", "reason").await.unwrap();
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Completed));
}

#[tokio::test]
async fn rollback_fails_after_exhausting_all_retries() {
    let manager = RollbackManager::new(ScriptedRestorer::failing_restore_times(10)).with_max_retries(1);
    let result = manager.manual_rollback("checkout", "prod", "reason").await;
    assert!(matches!(result, Err(RollbackError::RestoreFailed { attempts: 2, .. })));
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Failed));
}

#[tokio::test]
async fn rollback_fails_when_verification_reports_unhealthy() {
    let manager = RollbackManager::new(ScriptedRestorer::with_verify_result(Ok(false)));
    let result = manager.manual_rollback("checkout", "prod", "reason").await;
    assert!(matches!(result, Err(RollbackError::VerificationFailed(_))));
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Failed));
}

#[tokio::test]
async fn concurrent_rollback_for_the_same_key_is_rejected() {
    let manager = Arc::new(RollbackManager::new(ScriptedRestorer::slow()));

    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.manual_rollback("checkout", "prod", "first").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = manager.manual_rollback("checkout", "prod", "second").await;

    assert!(matches!(second, Err(RollbackError::AlreadyInProgress { .. })));
    first.await.unwrap().unwrap();
}

#[tokio::test]
async fn reset_only_succeeds_from_a_terminal_state() {
    let manager = RollbackManager::new(ScriptedRestorer::succeeding());
    manager.manual_rollback("checkout", "prod", "reason").await.unwrap();
    assert!(manager.reset("checkout", "prod").is_ok());
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Idle));
}

#[tokio::test]
async fn reset_on_an_unknown_key_is_not_found() {
    let manager = RollbackManager::new(ScriptedRestorer::succeeding());
    assert!(matches!(
        manager.reset("checkout", "prod"),
        Err(RollbackError::NotFound { .. })
    ));
}

#[tokio::test]
async fn rollback_trigger_impl_drives_the_same_state_machine() {
    let manager = RollbackManager::new(ScriptedRestorer::succeeding());
    RollbackTrigger::trigger(&manager, "checkout", "prod", "monitor threshold reached").await;
    assert_eq!(manager.current_state("checkout", "prod"), Some(State::Completed));
}
