//! Error Handling Infrastructure
//!
//! This module defines the two error families used throughout sqlconsole.
//!
//! # Hard failures (`ConsoleError`)
//! Returned from library calls and rendered as error envelopes:
//! - `ValidationFailed`: request rejected before any statement ran
//! - `ConnectionFailed`: the connection handle is unusable
//! - `QueryFailed`: a standalone query outside a session failed
//! - `EngineError`: engine-specific failure outside statement execution
//! - `ConfigError`: configuration file or connection registry errors
//! - `SessionConflict`: a session id is already running
//!
//! # Statement failures (`StatementError`)
//! Produced by drivers for a single statement. They are never propagated out of
//! a session run; the orchestrator records them in the statement's result set.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for sqlconsole operations
#[derive(Error, Debug)]
pub enum ConsoleError {
    /// Request rejected before execution
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Database connection failed or became unusable
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// Engine-specific database error
    #[error("Engine error ({engine}): {detail}")]
    EngineError { engine: String, detail: String },

    /// Configuration error (file not found, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Session id is already bound to a running session
    #[error("Session conflict: {0}")]
    SessionConflict(String),
}

impl ConsoleError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::ValidationFailed(_) => "VALIDATION_FAILED",
            Self::ConnectionFailed(_) => "CONNECTION_FAILED",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::EngineError { .. } => "ENGINE_ERROR",
            Self::ConfigError(_) => "CONFIG_ERROR",
            Self::SessionConflict(_) => "SESSION_CONFLICT",
        }
    }

    /// Get human-readable error message (no credentials or file contents)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Create a validation error
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::ValidationFailed(message.into())
    }

    /// Create a connection failed error
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed(message.into())
    }

    /// Create a query failed error
    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    /// Create an engine-specific error
    pub fn engine_error(engine: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::EngineError { engine: engine.into(), detail: detail.into() }
    }

    /// Create a configuration error
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError(message.into())
    }

    /// Create a session conflict error
    pub fn session_conflict(message: impl Into<String>) -> Self {
        Self::SessionConflict(message.into())
    }
}

/// Result type alias for sqlconsole operations
pub type Result<T> = std::result::Result<T, ConsoleError>;

/// How a statement failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementErrorKind {
    /// The driver reported an error
    Failed,
    /// The statement was interrupted by an out-of-band cancel
    Canceled,
}

/// Error raised by a driver while executing one statement
///
/// Carries what a caller can act on: message, reported code, SQLSTATE, the
/// driver's numeric error number and its error class name. A canceled
/// statement reports `QUERY_CANCELED` as its code and keeps the driver's
/// number in `errno`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct StatementError {
    pub kind: StatementErrorKind,
    pub message: String,
    pub code: Option<String>,
    pub sql_state: Option<String>,
    pub errno: Option<i64>,
    pub name: Option<String>,
}

/// Code reported for statements interrupted by a cancel request
pub const CANCELED_CODE: &str = "QUERY_CANCELED";

impl StatementError {
    /// Create a plain driver failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Failed,
            message: message.into(),
            code: None,
            sql_state: None,
            errno: None,
            name: None,
        }
    }

    /// Create a cancellation failure
    pub fn canceled(message: impl Into<String>) -> Self {
        Self {
            kind: StatementErrorKind::Canceled,
            message: message.into(),
            code: Some(CANCELED_CODE.to_string()),
            sql_state: None,
            errno: None,
            name: Some("QueryCanceled".to_string()),
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        let code = code.into();
        self.errno = code.parse().ok();
        self.code = Some(code);
        self
    }

    #[must_use]
    pub fn with_sql_state(mut self, sql_state: impl Into<String>) -> Self {
        self.sql_state = Some(sql_state.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Re-tag an error as a cancellation
    ///
    /// The reported code becomes `QUERY_CANCELED`; the driver's number,
    /// SQLSTATE and name are kept.
    #[must_use]
    pub fn into_canceled(mut self) -> Self {
        self.kind = StatementErrorKind::Canceled;
        self.code = Some(CANCELED_CODE.to_string());
        self
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.kind == StatementErrorKind::Canceled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ConsoleError::validation_failed("test").error_code(), "VALIDATION_FAILED");
        assert_eq!(ConsoleError::connection_failed("test").error_code(), "CONNECTION_FAILED");
        assert_eq!(ConsoleError::query_failed("test").error_code(), "QUERY_FAILED");
        assert_eq!(ConsoleError::engine_error("mysql", "test").error_code(), "ENGINE_ERROR");
        assert_eq!(ConsoleError::config_error("test").error_code(), "CONFIG_ERROR");
        assert_eq!(ConsoleError::session_conflict("test").error_code(), "SESSION_CONFLICT");
    }

    #[test]
    fn test_error_messages() {
        let err = ConsoleError::validation_failed("too many statements");
        assert!(err.message().contains("too many statements"));

        let err = ConsoleError::engine_error("postgres", "connection timeout");
        assert!(err.message().contains("postgres"));
        assert!(err.message().contains("connection timeout"));
    }

    #[test]
    fn test_statement_error_builders() {
        let err = StatementError::failed("Table 'x' doesn't exist")
            .with_code("1146")
            .with_sql_state("42S02")
            .with_name("ServerError");

        assert_eq!(err.kind, StatementErrorKind::Failed);
        assert_eq!(err.code.as_deref(), Some("1146"));
        assert_eq!(err.errno, Some(1146));
        assert_eq!(err.sql_state.as_deref(), Some("42S02"));
        assert_eq!(err.to_string(), "Table 'x' doesn't exist");
        assert!(!err.is_canceled());
    }

    #[test]
    fn test_into_canceled_reports_canceled_code() {
        let err = StatementError::failed("interrupted").with_code("9").with_name("OperationInterrupted").into_canceled();
        assert!(err.is_canceled());
        assert_eq!(err.code.as_deref(), Some(CANCELED_CODE));
        assert_eq!(err.errno, Some(9));
        assert_eq!(err.name.as_deref(), Some("OperationInterrupted"));

        let err = StatementError::failed("canceling statement").with_code("57014").with_sql_state("57014").into_canceled();
        assert_eq!(err.code.as_deref(), Some(CANCELED_CODE));
        assert_eq!(err.sql_state.as_deref(), Some("57014"));

        let err = StatementError::failed("interrupted").into_canceled();
        assert_eq!(err.code.as_deref(), Some(CANCELED_CODE));
        assert_eq!(err.errno, None);
    }
}
