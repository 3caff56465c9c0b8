use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::resilience::{CircuitBreakerBehavior, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};

/// Closed/Open/HalfOpen breaker guarding a single external dependency
/// (a broker provider connection, the store's durable tier).
///
/// Transitions:
/// - Closed -> Open: `failure_threshold` consecutive failures.
/// - Open -> HalfOpen: `timeout` has elapsed since opening.
/// - HalfOpen -> Closed: `success_threshold` consecutive successes.
/// - HalfOpen -> Open: any failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
    opened_at: Mutex<Option<Instant>>,
    consecutive_failures: AtomicU32,
    consecutive_successes: AtomicU32,
    half_open_calls: AtomicU32,
    total_calls: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    total_duration_nanos: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(CircuitState::Closed),
            opened_at: Mutex::new(None),
            consecutive_failures: AtomicU32::new(0),
            consecutive_successes: AtomicU32::new(0),
            half_open_calls: AtomicU32::new(0),
            total_calls: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            total_duration_nanos: AtomicU64::new(0),
        }
    }

    /// Moves Open -> HalfOpen if the recovery timeout has elapsed. Called
    /// lazily from `should_allow`/`state` rather than on a timer.
    fn maybe_recover(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        if *state != CircuitState::Open {
            return;
        }
        let elapsed = self
            .opened_at
            .lock()
            .expect("circuit breaker mutex poisoned")
            .map(|t| t.elapsed())
            .unwrap_or(Duration::ZERO);
        if elapsed >= self.config.timeout {
            *state = CircuitState::HalfOpen;
            self.half_open_calls.store(0, Ordering::SeqCst);
            self.consecutive_successes.store(0, Ordering::SeqCst);
        }
    }

    fn record_call(&self, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.total_duration_nanos
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }
}

impl CircuitBreakerBehavior for CircuitBreaker {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> CircuitState {
        self.maybe_recover();
        *self.state.lock().expect("circuit breaker mutex poisoned")
    }

    fn should_allow(&self) -> bool {
        self.maybe_recover();
        let state = *self.state.lock().expect("circuit breaker mutex poisoned");
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                // Allow a single probe at a time.
                self.half_open_calls.fetch_add(1, Ordering::SeqCst) == 0
            }
        }
    }

    fn record_success(&self, duration: Duration) {
        self.record_call(duration);
        self.success_count.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::SeqCst);

        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        if *state == CircuitState::HalfOpen {
            let successes = self.consecutive_successes.fetch_add(1, Ordering::SeqCst) + 1;
            if successes >= self.config.success_threshold {
                *state = CircuitState::Closed;
                self.consecutive_successes.store(0, Ordering::SeqCst);
            }
        }
    }

    fn record_failure(&self, duration: Duration) {
        self.record_call(duration);
        self.failure_count.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        match *state {
            CircuitState::Closed => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.config.failure_threshold {
                    *state = CircuitState::Open;
                    *self.opened_at.lock().expect("circuit breaker mutex poisoned") = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                *state = CircuitState::Open;
                *self.opened_at.lock().expect("circuit breaker mutex poisoned") = Some(Instant::now());
                self.consecutive_successes.store(0, Ordering::SeqCst);
            }
            CircuitState::Open => {}
        }
    }

    fn is_healthy(&self) -> bool {
        self.metrics().is_healthy()
    }

    fn force_open(&self) {
        *self.state.lock().expect("circuit breaker mutex poisoned") = CircuitState::Open;
        *self.opened_at.lock().expect("circuit breaker mutex poisoned") = Some(Instant::now());
    }

    fn force_closed(&self) {
        *self.state.lock().expect("circuit breaker mutex poisoned") = CircuitState::Closed;
        self.consecutive_failures.store(0, Ordering::SeqCst);
        self.consecutive_successes.store(0, Ordering::SeqCst);
        *self.opened_at.lock().expect("circuit breaker mutex poisoned") = None;
    }

    fn metrics(&self) -> CircuitBreakerMetrics {
        CircuitBreakerMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::SeqCst),
            half_open_calls: self.half_open_calls.load(Ordering::SeqCst),
            total_duration: Duration::from_nanos(self.total_duration_nanos.load(Ordering::Relaxed)),
            current_state: self.state(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: 3,
            timeout: Duration::from_millis(50),
            success_threshold: 2,
        }
    }

    #[test]
    fn opens_after_threshold_consecutive_failures() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            breaker.record_failure(Duration::from_millis(1));
        }
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.should_allow());
    }

    #[test]
    fn success_resets_consecutive_failure_count() {
        let breaker = CircuitBreaker::new("test", test_config());
        breaker.record_failure(Duration::from_millis(1));
        breaker.record_failure(Duration::from_millis(1));
        breaker.record_success(Duration::from_millis(1));
        breaker.record_failure(Duration::from_millis(1));
        // Only one consecutive failure since the success reset the streak.
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_opens_after_timeout_and_closes_on_successes() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            breaker.record_failure(Duration::from_millis(1));
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.should_allow());
        // Second probe is rejected until the first resolves.
        assert!(!breaker.should_allow());

        breaker.record_success(Duration::from_millis(1));
        breaker.record_success(Duration::from_millis(1));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("test", test_config());
        for _ in 0..3 {
            breaker.record_failure(Duration::from_millis(1));
        }
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure(Duration::from_millis(1));
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[test]
    fn force_open_and_force_closed_override_state() {
        let breaker = CircuitBreaker::new("test", test_config());
        breaker.force_open();
        assert_eq!(breaker.state(), CircuitState::Open);
        breaker.force_closed();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
