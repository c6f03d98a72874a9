//! sqlconsole - Multi-Statement SQL Execution Pipeline
//!
//! sqlconsole takes a raw SQL submission, splits it into statements, caps
//! unbounded reads, runs every statement in order on one connection and
//! returns a session result with per-statement timing, rows and errors.
//!
//! # Core Principles
//! - Lexical splitting only (no SQL parsing)
//! - Partial results are never lost: statements that ran are always reported
//! - Statement failures are data, not errors
//! - Cancellation is explicit and out-of-band, keyed by session id
//! - JSON-only output on stdout, logs on stderr
//!
//! # Architecture
//! The CLI and the JSON-RPC server are thin wrappers over the same library
//! pipeline: [`splitter`] → [`limit`] → [`orchestrator`] → [`session`].
//!
//! # Module Organization
//! - [`error`] - Error types and handling
//! - [`output`] - JSON output envelope types
//! - [`splitter`] - Statement splitting
//! - [`limit`] - Row-limit rewriting
//! - [`classify`] - Statement verb classification and titles
//! - [`engine`] - Connection capability and drivers
//! - [`session`] - Session result model and persistence sink
//! - [`cancel`] - Cancellation registry
//! - [`orchestrator`] - Statement execution pipeline
//! - [`config`] - Configuration management
//! - [`rpc`] - JSON-RPC server

pub mod cancel;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod limit;
pub mod orchestrator;
pub mod output;
pub mod rpc;
pub mod session;
pub mod splitter;

// Re-export commonly used types for convenience
pub use cancel::{ActiveSession, CancelOutcome, CancellationRegistry};
pub use classify::{classify_statement, derive_title, SqlOp};
pub use config::{
    list_connections, resolve_connection, save_connection, ConfigLocation, ConsoleConfig,
    StoredConnection,
};
pub use engine::{
    connect, CancelHandle, ColumnMeta, Connection, ConnectionConfig, DatabaseType, EngineConnection,
    ResultRow, StatementOptions, StatementOutput,
};
pub use error::{ConsoleError, Result, StatementError, StatementErrorKind};
pub use limit::enforce_row_limit;
pub use orchestrator::{ExecuteRequest, ExecutionSettings, Orchestrator, PreparedBatch};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use session::{
    ExecutionResponse, ExecutionStatus, JsonLinesSink, QueryResultSet, QuerySession, ResultStatus,
    SessionSink, Stopwatch, Timing,
};
pub use splitter::split_statements;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_public_api_exports() {
        let settings = ExecutionSettings::default();
        let _orchestrator = Orchestrator::new(settings);
        let _registry = CancellationRegistry::new();

        assert_eq!(split_statements("SELECT 1; SELECT 2").len(), 2);
        assert_eq!(DatabaseType::Postgres.as_str(), "postgres");
    }
}
