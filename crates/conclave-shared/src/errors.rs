//! # Error Taxonomy
//!
//! Unified error type for the Conclave workspace, following the §7 error
//! kind taxonomy: `InvalidInput`, `NotFound`, `Conflict`, `BrokerUnavailable`,
//! `StoreUnavailable`, `StageTimeout`, `StageFailed`, `Aborted`, `Internal`.

use thiserror::Error;

/// Workspace-wide result type.
pub type ConclaveResult<T> = Result<T, ConclaveError>;

/// Structured diagnostic attached to a failed or aborted task (§3 `error`).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct TaskDiagnostic {
    pub kind: ErrorKind,
    pub message: String,
    pub stage: String,
}

/// The §7 error kind taxonomy, surfaced in `error.kind` and HTTP responses.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Conflict,
    BrokerUnavailable,
    StoreUnavailable,
    StageTimeout,
    StageFailed,
    Aborted,
    Internal,
}

impl ErrorKind {
    /// HTTP status code this error kind maps to (§7 "API errors map to HTTP status codes").
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::BrokerUnavailable | ErrorKind::StoreUnavailable => 503,
            ErrorKind::StageTimeout
            | ErrorKind::StageFailed
            | ErrorKind::Aborted
            | ErrorKind::Internal => 500,
        }
    }
}

/// Comprehensive error type for Conclave operations.
#[derive(Debug, Error)]
pub enum ConclaveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("concurrent mutation could not linearize for {task_id}")]
    Conflict { task_id: String },

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("stage '{stage}' exceeded its deadline after exhausted retries")]
    StageTimeout { stage: String },

    #[error("stage '{stage}' reported a structured failure: {message}")]
    StageFailed { stage: String, message: String },

    #[error("task aborted by caller")]
    Aborted,

    #[error("record already exists: {0}")]
    AlreadyExists(String),

    #[error("database error during {operation}: {reason}")]
    DatabaseError { operation: String, reason: String },

    #[error("messaging error: {0}")]
    MessagingError(String),

    #[error("configuration error: {0}")]
    ConfigError(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ConclaveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConclaveError::InvalidInput(_) => ErrorKind::InvalidInput,
            ConclaveError::NotFound(_) => ErrorKind::NotFound,
            ConclaveError::Conflict { .. } => ErrorKind::Conflict,
            ConclaveError::BrokerUnavailable(_) => ErrorKind::BrokerUnavailable,
            ConclaveError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            ConclaveError::StageTimeout { .. } => ErrorKind::StageTimeout,
            ConclaveError::StageFailed { .. } => ErrorKind::StageFailed,
            ConclaveError::Aborted => ErrorKind::Aborted,
            ConclaveError::AlreadyExists(_) => ErrorKind::Conflict,
            ConclaveError::DatabaseError { .. } => ErrorKind::StoreUnavailable,
            ConclaveError::MessagingError(_) => ErrorKind::BrokerUnavailable,
            ConclaveError::ConfigError(_) => ErrorKind::Internal,
            ConclaveError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the operation that produced this error is worthwhile.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ConclaveError::BrokerUnavailable(_)
                | ConclaveError::StoreUnavailable(_)
                | ConclaveError::Conflict { .. }
        )
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}

impl From<sqlx::Error> for ConclaveError {
    fn from(err: sqlx::Error) -> Self {
        ConclaveError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ConclaveError {
    fn from(err: serde_json::Error) -> Self {
        ConclaveError::Internal(format!("serialization failure: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping_matches_taxonomy() {
        assert_eq!(ConclaveError::InvalidInput("x".into()).http_status(), 400);
        assert_eq!(ConclaveError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            ConclaveError::Conflict {
                task_id: "t".into()
            }
            .http_status(),
            409
        );
        assert_eq!(
            ConclaveError::BrokerUnavailable("x".into()).http_status(),
            503
        );
        assert_eq!(
            ConclaveError::StoreUnavailable("x".into()).http_status(),
            503
        );
    }

    #[test]
    fn recoverable_errors_are_dependency_failures() {
        assert!(ConclaveError::BrokerUnavailable("x".into()).is_recoverable());
        assert!(ConclaveError::StoreUnavailable("x".into()).is_recoverable());
        assert!(ConclaveError::Conflict {
            task_id: "t".into()
        }
        .is_recoverable());
        assert!(!ConclaveError::InvalidInput("x".into()).is_recoverable());
        assert!(!ConclaveError::Aborted.is_recoverable());
    }

    #[test]
    fn display_messages_are_stable() {
        let err = ConclaveError::StageTimeout {
            stage: "reasoning".into(),
        };
        assert_eq!(
            err.to_string(),
            "stage 'reasoning' exceeded its deadline after exhausted retries"
        );
    }
}
