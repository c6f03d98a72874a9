//! Session Result Model
//!
//! Data shapes produced by one execution request:
//! - [`QuerySession`] summarizes the whole submission
//! - [`QueryResultSet`] records one executed statement, in `setIndex` order
//! - [`ExecutionResponse`] bundles both with the raw row lists
//!
//! All shapes serialize with camelCase keys.
//!
//! # Clocks
//! `startedAt`/`finishedAt` come from the wall clock (epoch milliseconds) and
//! are for display only. `durationMs` is measured with a monotonic clock.
//! The two are reconciled by one rule only: when the wall-clock pair would
//! contradict the measured duration, `finishedAt` becomes
//! `startedAt + durationMs`.

use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::time::Instant;

use crate::classify::{classify_statement, derive_title, SqlOp};
use crate::engine::{ColumnMeta, ResultRow, StatementOutput};
use crate::error::{ConsoleError, Result, StatementError, StatementErrorKind};

/// Session-level outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Error,
}

/// Outcome of one statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
    /// The statement was interrupted by a cancel request
    Canceled,
}

impl ResultStatus {
    #[must_use]
    pub const fn is_error(self) -> bool {
        !matches!(self, Self::Success)
    }
}

/// Wall-clock bounds plus monotonic duration of a timed span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    /// Epoch milliseconds
    pub started_at: i64,
    /// Epoch milliseconds, never before `started_at`
    pub finished_at: i64,
    pub duration_ms: u64,
}

impl Timing {
    /// Combine wall-clock bounds with a monotonic duration
    #[must_use]
    pub fn reconcile(started_at: i64, finished_at: i64, duration_ms: u64) -> Self {
        let duration = i64::try_from(duration_ms).unwrap_or(i64::MAX);
        let contradicts = finished_at < started_at || (finished_at == started_at && duration > 0);

        let finished_at = if contradicts { started_at.saturating_add(duration) } else { finished_at };

        Self { started_at, finished_at, duration_ms }
    }

    /// A zero-length span at `at`
    #[must_use]
    pub const fn instant(at: i64) -> Self {
        Self { started_at: at, finished_at: at, duration_ms: 0 }
    }
}

/// Pairs a wall-clock start with a monotonic start
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started_at: i64,
    start: Instant,
}

impl Stopwatch {
    #[must_use]
    pub fn start() -> Self {
        Self { started_at: chrono::Utc::now().timestamp_millis(), start: Instant::now() }
    }

    /// Wall-clock start in epoch milliseconds
    #[must_use]
    pub const fn started_at(&self) -> i64 {
        self.started_at
    }

    #[must_use]
    pub fn finish(&self) -> Timing {
        let duration_ms = u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX);
        Timing::reconcile(self.started_at, chrono::Utc::now().timestamp_millis(), duration_ms)
    }
}

/// Diagnostic identity of a failed statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Numeric driver code, when the code is a number
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errno: Option<i64>,
}

/// Outcome of one executed statement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResultSet {
    pub set_index: usize,
    pub sql_text: String,
    pub sql_op: SqlOp,
    pub title: String,

    /// Row schema, `None` for statements that return no rows
    pub columns: Option<Vec<ColumnMeta>>,
    pub row_count: u64,
    pub limited: bool,
    pub limit: Option<u64>,
    pub affected_rows: Option<u64>,

    pub status: ResultStatus,
    pub error_message: Option<String>,
    pub error_code: Option<String>,
    pub error_sql_state: Option<String>,
    pub error_meta: Option<ErrorMeta>,
    pub warnings: Vec<String>,

    #[serde(flatten)]
    pub timing: Timing,
}

impl QueryResultSet {
    /// Record a successful statement; returns the result set and its rows
    #[must_use]
    pub fn success(
        set_index: usize,
        sql: &str,
        output: StatementOutput,
        timing: Timing,
    ) -> (Self, Vec<ResultRow>) {
        let sql_op = classify_statement(sql);
        let title = derive_title(&sql_op, sql);

        let result = Self {
            set_index,
            sql_text: sql.to_string(),
            sql_op,
            title,
            columns: output.columns,
            row_count: output.row_count,
            limited: output.limited,
            limit: output.limit,
            affected_rows: output.affected_rows,
            status: ResultStatus::Success,
            error_message: None,
            error_code: None,
            error_sql_state: None,
            error_meta: None,
            warnings: output.warnings,
            timing,
        };
        (result, output.rows)
    }

    /// Record a failed statement; the row list is one synthetic diagnostic row
    #[must_use]
    pub fn failure(
        set_index: usize,
        sql: &str,
        error: &StatementError,
        timing: Timing,
    ) -> (Self, Vec<ResultRow>) {
        let sql_op = classify_statement(sql);
        let title = derive_title(&sql_op, sql);
        let status = match error.kind {
            StatementErrorKind::Failed => ResultStatus::Error,
            StatementErrorKind::Canceled => ResultStatus::Canceled,
        };

        let result = Self {
            set_index,
            sql_text: sql.to_string(),
            sql_op,
            title,
            columns: None,
            row_count: 0,
            limited: false,
            limit: None,
            affected_rows: None,
            status,
            error_message: Some(error.message.clone()),
            error_code: error.code.clone(),
            error_sql_state: error.sql_state.clone(),
            error_meta: Some(ErrorMeta {
                name: error.name.clone(),
                errno: error.errno,
            }),
            warnings: Vec::new(),
            timing,
        };
        (result, vec![diagnostic_row(error, sql)])
    }
}

/// `{error, code, sql}` row standing in for the rows of a failed statement
fn diagnostic_row(error: &StatementError, sql: &str) -> ResultRow {
    let mut row = ResultRow::new();
    row.insert("error".to_string(), serde_json::Value::String(error.message.clone()));
    row.insert(
        "code".to_string(),
        error.code.clone().map_or(serde_json::Value::Null, serde_json::Value::String),
    );
    row.insert("sql".to_string(), serde_json::Value::String(sql.to_string()));
    row
}

/// Caller-supplied identity of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: String,
    pub user_id: Option<String>,
    pub tab_id: Option<String>,
    pub connection_id: String,
    pub database: Option<String>,
    /// The full original submission
    pub sql_text: String,
    pub source: Option<String>,
    pub stop_on_error: bool,
}

/// Summary of one execution request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuerySession {
    pub session_id: String,
    pub user_id: Option<String>,
    pub tab_id: Option<String>,
    pub connection_id: String,
    pub database: Option<String>,
    pub sql_text: String,
    pub source: Option<String>,

    pub status: ExecutionStatus,
    /// First statement-level error message
    pub error_message: Option<String>,

    #[serde(flatten)]
    pub timing: Timing,

    pub result_set_count: usize,
    pub stop_on_error: bool,
}

impl QuerySession {
    /// Build the session summary from its result sets
    #[must_use]
    pub fn assemble(context: SessionContext, results: &[QueryResultSet], timing: Timing) -> Self {
        let first_error = results.iter().find(|r| r.status.is_error());

        Self {
            session_id: context.session_id,
            user_id: context.user_id,
            tab_id: context.tab_id,
            connection_id: context.connection_id,
            database: context.database,
            sql_text: context.sql_text,
            source: context.source,
            status: if first_error.is_some() { ExecutionStatus::Error } else { ExecutionStatus::Success },
            error_message: first_error.and_then(|r| r.error_message.clone()),
            timing,
            result_set_count: results.len(),
            stop_on_error: context.stop_on_error,
        }
    }

    /// Record a cancel that no statement reported
    ///
    /// The session becomes an error; an earlier statement error message is kept.
    pub fn mark_canceled(&mut self) {
        self.status = ExecutionStatus::Error;
        self.error_message.get_or_insert_with(|| SESSION_CANCELED_MESSAGE.to_string());
    }
}

/// Session error message when the cancel landed between statements
pub const SESSION_CANCELED_MESSAGE: &str = "Session canceled by user request";

/// Everything returned for one execution request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResponse {
    pub session: QuerySession,
    /// Ordered by `setIndex`
    pub query_result_sets: Vec<QueryResultSet>,
    /// Row lists, index-aligned with `query_result_sets`
    pub results: Vec<Vec<ResultRow>>,
}

/// Receives finished sessions for durable storage
pub trait SessionSink: Send + Sync {
    fn persist(&self, response: &ExecutionResponse) -> Result<()>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord<'a> {
    session: &'a QuerySession,
    query_result_sets: &'a [QueryResultSet],
}

/// Appends one JSON line per session (rows omitted) to a history file
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    write_lock: parking_lot::Mutex<()>,
}

impl JsonLinesSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), write_lock: parking_lot::Mutex::new(()) }
    }

    #[must_use]
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SessionSink for JsonLinesSink {
    fn persist(&self, response: &ExecutionResponse) -> Result<()> {
        let record = HistoryRecord {
            session: &response.session,
            query_result_sets: &response.query_result_sets,
        };
        let mut line = serde_json::to_string(&record)
            .map_err(|e| ConsoleError::config_error(format!("Failed to serialize session: {e}")))?;
        line.push('\n');

        let _guard = self.write_lock.lock();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    ConsoleError::config_error(format!("Failed to create history directory: {e}"))
                })?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| ConsoleError::config_error(format!("Failed to open history file: {e}")))?;

        file.write_all(line.as_bytes())
            .map_err(|e| ConsoleError::config_error(format!("Failed to write history file: {e}")))
    }
}
