//! Domain types, layered configuration, error taxonomy, and resilience
//! primitives shared by every Conclave crate.

pub mod config;
pub mod domain;
pub mod errors;
pub mod logging;
pub mod resilience;

pub use config::ConclaveConfig;
pub use errors::{ConclaveError, ConclaveResult, ErrorKind, TaskDiagnostic};
