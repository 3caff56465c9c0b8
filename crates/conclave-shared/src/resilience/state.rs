use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls flow through normally.
    Closed,
    /// Calls fail fast; the breaker periodically allows a probe after the
    /// recovery timeout elapses.
    Open,
    /// Recovering: a limited number of calls are allowed through to test
    /// whether the protected component has recovered.
    HalfOpen,
}
