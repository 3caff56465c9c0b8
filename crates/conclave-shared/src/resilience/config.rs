use std::time::Duration;

/// Per-breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a half-open probe.
    pub timeout: Duration,
    /// Consecutive successes (while half-open) before the breaker closes.
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}
