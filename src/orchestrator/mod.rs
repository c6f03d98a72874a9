//! Execution Orchestrator
//!
//! Runs the statements of one submission in source order against a single
//! connection and assembles the session result model.
//!
//! # Pipeline
//! 1. `prepare`: validate the request, split the SQL, apply the row-limit rewrite
//! 2. `run`: ping, register for cancellation, execute statement by statement
//! 3. `execute`: `prepare` + `run`, then hand the response to the session sink
//!
//! # Failure model
//! - Validation failures reject the whole batch before anything runs
//! - Statement failures are recorded in their result set, never returned as `Err`
//! - An unusable connection (failed ping) is the only hard failure of `run`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::cancel::CancellationRegistry;
use crate::engine::{Connection, StatementOptions};
use crate::error::{ConsoleError, Result};
use crate::limit::enforce_row_limit;
use crate::session::{
    ExecutionResponse, QueryResultSet, QuerySession, SessionContext, SessionSink, Stopwatch, Timing,
};
use crate::splitter::split_statements;

/// Longest accepted `database` name
pub const MAX_DATABASE_NAME_LEN: usize = 64;

/// One client-submitted execution request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    pub connection_id: String,

    /// Generated when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    pub sql: String,

    /// Falls back to `ExecutionSettings::stop_on_error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_error: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tab_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Execution limits and defaults
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Batches with more statements are rejected
    pub max_statements: usize,

    /// Row cap applied by the rewrite and by the drivers; `None` disables both
    pub max_rows: Option<u64>,

    /// Rewrite `SELECT`/`WITH` statements to carry a `LIMIT`
    pub enforce_row_limit: bool,

    pub stop_on_error: bool,

    /// JSON-lines file receiving finished sessions
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        Self {
            max_statements: 100,
            max_rows: Some(10_000),
            enforce_row_limit: true,
            stop_on_error: true,
            history_file: None,
        }
    }
}

/// A validated request, split into the statements that will run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedBatch {
    pub context: SessionContext,
    pub statements: Vec<String>,
}

/// Drives execution requests through the pipeline
pub struct Orchestrator {
    registry: CancellationRegistry,
    settings: ExecutionSettings,
    sink: Option<Arc<dyn SessionSink>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(settings: ExecutionSettings) -> Self {
        Self { registry: CancellationRegistry::new(), settings, sink: None }
    }

    /// Share an existing registry (e.g. with a transport that accepts cancels)
    #[must_use]
    pub fn with_registry(mut self, registry: CancellationRegistry) -> Self {
        self.registry = registry;
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn SessionSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    #[must_use]
    pub const fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    #[must_use]
    pub const fn settings(&self) -> &ExecutionSettings {
        &self.settings
    }

    /// Validate a request and produce the statements to run
    pub fn prepare(&self, request: ExecuteRequest) -> Result<PreparedBatch> {
        if request.connection_id.trim().is_empty() {
            return Err(ConsoleError::validation_failed("connectionId is required"));
        }

        if let Some(database) = &request.database {
            if !is_valid_database_name(database) {
                return Err(ConsoleError::validation_failed(format!(
                    "Invalid database name '{database}': expected 1-{MAX_DATABASE_NAME_LEN} characters of [A-Za-z0-9_.-]"
                )));
            }
        }

        let mut statements = split_statements(&request.sql);
        if statements.len() > self.settings.max_statements {
            return Err(ConsoleError::validation_failed(format!(
                "Too many statements: {} (maximum is {})",
                statements.len(),
                self.settings.max_statements
            )));
        }

        if self.settings.enforce_row_limit {
            if let Some(max_rows) = self.settings.max_rows {
                statements = statements.iter().map(|sql| enforce_row_limit(sql, max_rows)).collect();
            }
        }

        let session_id = request
            .session_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Ok(PreparedBatch {
            context: SessionContext {
                session_id,
                user_id: request.user_id,
                tab_id: request.tab_id,
                connection_id: request.connection_id,
                database: request.database,
                sql_text: request.sql,
                source: request.source,
                stop_on_error: request.stop_on_error.unwrap_or(self.settings.stop_on_error),
            },
            statements,
        })
    }

    /// Execute a prepared batch on `conn`
    ///
    /// Statements run strictly one after another. With `stop_on_error`, the
    /// first failing statement ends the batch. A cancel always ends the batch
    /// and marks the session as an error, even when it lands between
    /// statements.
    pub async fn run<C: Connection>(&self, conn: &C, batch: PreparedBatch) -> Result<ExecutionResponse> {
        let PreparedBatch { context, statements } = batch;
        let stopwatch = Stopwatch::start();

        if statements.is_empty() {
            tracing::debug!(session_id = %context.session_id, "no statements to run");
            let session = QuerySession::assemble(context, &[], Timing::instant(stopwatch.started_at()));
            return Ok(ExecutionResponse { session, query_result_sets: Vec::new(), results: Vec::new() });
        }

        conn.ping().await?;
        let active = self.registry.register_active(&context.session_id, conn.cancel_handle())?;

        let options = StatementOptions {
            database: context.database.as_deref(),
            query_id: &context.session_id,
            max_rows: self.settings.max_rows,
        };

        let mut result_sets = Vec::with_capacity(statements.len());
        let mut results = Vec::with_capacity(statements.len());

        for (set_index, sql) in statements.iter().enumerate() {
            if active.is_canceled() {
                tracing::debug!(session_id = %context.session_id, set_index, "skipping statements after cancel");
                break;
            }

            tracing::debug!(session_id = %context.session_id, set_index, sql = %sql, "executing statement");
            let statement_watch = Stopwatch::start();
            let outcome = conn.execute_statement(sql, &options).await;
            let timing = statement_watch.finish();

            let (result_set, rows) = match outcome {
                Ok(output) => QueryResultSet::success(set_index, sql, output, timing),
                Err(error) => {
                    let error = if active.is_canceled() { error.into_canceled() } else { error };
                    tracing::debug!(
                        session_id = %context.session_id,
                        set_index,
                        canceled = error.is_canceled(),
                        error = %error,
                        "statement failed"
                    );
                    QueryResultSet::failure(set_index, sql, &error, timing)
                }
            };

            let failed = result_set.status.is_error();
            result_sets.push(result_set);
            results.push(rows);

            if failed && (context.stop_on_error || active.is_canceled()) {
                break;
            }
        }

        let canceled = active.is_canceled();
        drop(active);

        let mut session = QuerySession::assemble(context, &result_sets, stopwatch.finish());
        if canceled {
            session.mark_canceled();
        }
        tracing::info!(
            session_id = %session.session_id,
            status = ?session.status,
            result_sets = session.result_set_count,
            statements = statements.len(),
            duration_ms = session.timing.duration_ms,
            "session finished"
        );

        Ok(ExecutionResponse { session, query_result_sets: result_sets, results })
    }

    /// Prepare, run and persist one request
    pub async fn execute<C: Connection>(&self, conn: &C, request: ExecuteRequest) -> Result<ExecutionResponse> {
        let batch = self.prepare(request)?;
        let response = self.run(conn, batch).await?;

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.persist(&response) {
                tracing::warn!(session_id = %response.session.session_id, error = %e, "failed to persist session");
            }
        }

        Ok(response)
    }
}

/// `^[A-Za-z0-9_.-]{1,64}$`
#[must_use]
pub fn is_valid_database_name(name: &str) -> bool {
    (1..=MAX_DATABASE_NAME_LEN).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}
