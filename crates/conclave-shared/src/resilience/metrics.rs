use crate::resilience::CircuitState;
use std::time::Duration;

/// Point-in-time snapshot of a circuit breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    pub half_open_calls: u32,
    pub total_duration: Duration,
    pub current_state: CircuitState,
}

impl CircuitBreakerMetrics {
    pub fn new(current_state: CircuitState) -> Self {
        Self {
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            half_open_calls: 0,
            total_duration: Duration::ZERO,
            current_state,
        }
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.failure_count as f64 / self.total_calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        1.0 - self.failure_rate()
    }

    pub fn average_duration(&self) -> Duration {
        if self.total_calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.total_calls as u32
        }
    }

    /// Calls per second implied by `total_duration`, useful for quick sanity
    /// checks in dashboards rather than precise load measurement.
    pub fn calls_per_second(&self) -> f64 {
        let secs = self.total_duration.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.total_calls as f64 / secs
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.current_state, CircuitState::Closed) && self.failure_rate() < 0.5
    }

    pub fn state_description(&self) -> &'static str {
        match self.current_state {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    pub fn format_summary(&self) -> String {
        format!(
            "state={} calls={} success_rate={:.1}% avg_latency={:?}",
            self.state_description(),
            self.total_calls,
            self.success_rate() * 100.0,
            self.average_duration()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_metrics_report_zero_rates() {
        let metrics = CircuitBreakerMetrics::new(CircuitState::Closed);
        assert_eq!(metrics.failure_rate(), 0.0);
        assert_eq!(metrics.success_rate(), 1.0);
        assert!(metrics.is_healthy());
    }

    #[test]
    fn open_state_is_never_healthy() {
        let metrics = CircuitBreakerMetrics::new(CircuitState::Open);
        assert!(!metrics.is_healthy());
    }
}
