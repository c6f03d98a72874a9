//! JSON Output Envelope Types
//!
//! This module defines the structured JSON output format for all CLI commands.
//! Every command writes either a `SuccessEnvelope` or an `ErrorEnvelope` to stdout.
//!
//! # Output Contract
//! - Success: `{"ok": true, "engine": "...", "command": "...", "data": {...}, "meta": {...}}`
//! - Error: `{"ok": false, "engine": "...", "command": "...", "error": {"code": "...", "message": "..."}}`
//!
//! Statement failures inside a session are NOT error envelopes: a session that
//! ran is a success envelope whose `data.session.status` may be `error`.

use serde::{Deserialize, Serialize};

use crate::error::ConsoleError;
use crate::session::ExecutionResponse;

/// Success envelope for command results
///
/// Generic over the data type to support different command return values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessEnvelope<T> {
    /// Always true for success envelopes
    pub ok: bool,

    /// Database engine used (postgres, mysql, sqlite; empty when none was involved)
    pub engine: String,

    /// Command that was executed (run, split, limit, connect, connections)
    pub command: String,

    /// Command-specific data
    pub data: T,

    /// Execution metadata
    pub meta: Metadata,
}

impl<T> SuccessEnvelope<T> {
    /// Create a new success envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, data: T, meta: Metadata) -> Self {
        Self { ok: true, engine: engine.into(), command: command.into(), data, meta }
    }
}

/// Error envelope for command failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Always false for error envelopes
    pub ok: bool,

    /// Database engine (empty string if not engine-specific)
    pub engine: String,

    /// Command that was attempted
    pub command: String,

    /// Error information
    pub error: ErrorInfo,
}

impl ErrorEnvelope {
    /// Create a new error envelope
    pub fn new(engine: impl Into<String>, command: impl Into<String>, error: ErrorInfo) -> Self {
        Self { ok: false, engine: engine.into(), command: command.into(), error }
    }

    /// Create error envelope from `ConsoleError`
    pub fn from_error(engine: impl Into<String>, command: impl Into<String>, err: &ConsoleError) -> Self {
        Self::new(engine, command, ErrorInfo::new(err.error_code(), err.message()))
    }
}

/// Error information structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g., `VALIDATION_FAILED`, `CONNECTION_FAILED`)
    pub code: String,

    /// Human-readable error message (no sensitive data)
    pub message: String,
}

impl ErrorInfo {
    /// Create a new error info
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { code: code.into(), message: message.into() }
    }
}

/// Execution metadata included in all success responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Execution time in milliseconds
    pub execution_ms: u64,

    /// Rows returned across all statements (for `run`, None for other commands)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_returned: Option<u64>,
}

impl Metadata {
    /// Create new metadata with just execution time
    #[must_use]
    pub const fn new(execution_ms: u64) -> Self {
        Self { execution_ms, rows_returned: None }
    }

    /// Create new metadata with execution time and row count
    #[must_use]
    pub const fn with_rows(execution_ms: u64, rows_returned: u64) -> Self {
        Self { execution_ms, rows_returned: Some(rows_returned) }
    }

    /// Metadata summarizing an executed session
    #[must_use]
    pub fn for_session(response: &ExecutionResponse) -> Self {
        let rows = response
            .query_result_sets
            .iter()
            .filter(|r| !r.status.is_error())
            .map(|r| r.row_count)
            .sum();
        Self::with_rows(response.session.timing.duration_ms, rows)
    }
}
