//! # Resilience Primitives
//!
//! Circuit breaker protection for the broker client and store client,
//! ported from the teacher's `tasker-shared::resilience` module.

mod behavior;
mod breaker;
mod config;
mod metrics;
mod state;

pub use behavior::CircuitBreakerBehavior;
pub use breaker::CircuitBreaker;
pub use config::CircuitBreakerConfig;
pub use metrics::CircuitBreakerMetrics;
pub use state::CircuitState;
