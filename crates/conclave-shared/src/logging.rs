//! # Logging Bootstrap
//!
//! Structured tracing initialization shared by both binaries, following
//! the teacher's `bin/server.rs` convention of an env-filter driven
//! subscriber with JSON output in production and pretty output locally.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global tracing subscriber. Safe to call once per process;
/// a second call is a no-op (the underlying `try_init` swallows the error).
pub fn init(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = fmt().with_env_filter(filter).with_target(true);

    let result = if json {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    };

    if let Err(err) = result {
        eprintln!("tracing subscriber already initialized: {err}");
    }
}
