//! Consecutive-failure circuit breaker for the quota client.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow normally
    Closed,
    /// Calls are rejected until the recovery period elapses
    Open,
    /// A single probe call is in flight to test recovery
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Opens after `failure_threshold` consecutive failures, half-opens after
/// `recovery`, and closes again on the first success.
#[derive(Debug)]
pub struct CircuitBreaker {
    failure_threshold: u32,
    recovery: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, recovery: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            recovery,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may be attempted now.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    pub(crate) fn allow_at(&self, now: Instant) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open | CircuitState::HalfOpen => {
                let elapsed = inner
                    .opened_at
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or_default();
                if elapsed < self.recovery {
                    return false;
                }
                // A probe that never reported back is replaced after another
                // recovery period.
                debug!(from = ?inner.state, "Circuit breaker letting a probe through");
                inner.state = CircuitState::HalfOpen;
                inner.opened_at = Some(now);
                true
            }
        }
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Closed {
            debug!("Circuit breaker closed after successful call");
        }
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    pub fn on_failure(&self) {
        self.on_failure_at(Instant::now())
    }

    pub(crate) fn on_failure_at(&self, now: Instant) {
        let mut inner = self.inner.lock();
        inner.failures = inner.failures.saturating_add(1);

        // A failed probe reopens immediately.
        if inner.state == CircuitState::HalfOpen || inner.failures >= self.failure_threshold {
            if inner.state != CircuitState::Open {
                warn!(failures = inner.failures, "Circuit breaker opened");
            }
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        let now = Instant::now();

        breaker.on_failure_at(now);
        breaker.on_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(breaker.allow_at(now));

        breaker.on_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_at(now + Duration::from_secs(29)));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        let now = Instant::now();

        breaker.on_failure_at(now);
        breaker.on_success();
        breaker.on_failure_at(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_recovery() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        let now = Instant::now();

        breaker.on_failure_at(now);
        assert!(!breaker.allow_at(now + Duration::from_secs(10)));
        assert!(breaker.allow_at(now + Duration::from_secs(30)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        // Only the first caller after recovery gets to probe.
        assert!(!breaker.allow_at(now + Duration::from_secs(31)));
        assert!(!breaker.allow_at(now + Duration::from_secs(59)));

        breaker.on_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_lost_probe_is_replaced_after_recovery() {
        let breaker = CircuitBreaker::new(1, Duration::from_secs(30));
        let now = Instant::now();

        breaker.on_failure_at(now);
        assert!(breaker.allow_at(now + Duration::from_secs(30)));
        assert!(!breaker.allow_at(now + Duration::from_secs(45)));
        assert!(breaker.allow_at(now + Duration::from_secs(60)));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[test]
    fn test_failed_probe_reopens() {
        let breaker = CircuitBreaker::new(5, Duration::from_secs(30));
        let now = Instant::now();

        for _ in 0..5 {
            breaker.on_failure_at(now);
        }
        let later = now + Duration::from_secs(31);
        assert!(breaker.allow_at(later));

        breaker.on_failure_at(later);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_at(later + Duration::from_secs(1)));
    }
}
