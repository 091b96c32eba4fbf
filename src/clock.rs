//! Clock abstraction for testable time-dependent logic.
//!
//! Production code uses [`SystemClock`], which delegates to `chrono::Utc::now()`.
//! Tests use [`MockClock`] to control time deterministically, which matters for
//! health-monitor interval ticks, rollback timeout budgets and wave waits.

use chrono::{DateTime, Utc};

/// Trait for getting the current time.
///
/// Injected wherever a subsystem needs "now" so tests can control it.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to `chrono::Utc::now()`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Mock clock for testing with controllable time.
#[cfg(test)]
pub struct MockClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

#[cfg(test)]
impl MockClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    #[allow(dead_code)]
    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("MockClock lock poisoned") = now;
    }

    #[allow(dead_code)]
    pub fn advance(&self, duration: chrono::Duration) {
        let mut now = self.now.lock().expect("MockClock lock poisoned");
        *now += duration;
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("MockClock lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_returns_recent_time() {
        let clock = SystemClock;
        assert!(clock.now().timestamp() > 1_577_836_800);
    }

    #[test]
    fn mock_clock_is_fixed_until_advanced() {
        let fixed = Utc::now();
        let clock = MockClock::new(fixed);
        assert_eq!(clock.now(), fixed);
        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(clock.now(), fixed + chrono::Duration::seconds(30));
    }
}
