//! `SQLite` Connection Implementation
//!
//! This module implements the `Connection` trait for `SQLite` databases.
//!
//! # Features
//! - File-based connections (`/path/to/db.sqlite`)
//! - In-memory connections (`:memory:`)
//! - Cancellation through `sqlite3_interrupt`
//!
//! # Implementation Notes
//! - Uses `rusqlite` (synchronous driver); statements run on the blocking pool
//! - One `rusqlite::Connection` per `SqliteConnection`, behind a mutex
//! - BLOB data is Base64-encoded for JSON safety
//! - Row caps enforced while stepping the statement (one extra row is read
//!   to detect truncation)
//! - The `database` context is ignored: a `SQLite` file is a single catalog

use parking_lot::Mutex;
use rusqlite::{ErrorCode, InterruptHandle, OpenFlags, Row};
use std::sync::Arc;

use crate::engine::{
    encode_binary, float_to_json, CancelHandle, ColumnMeta, Connection, ConnectionConfig,
    DatabaseType, ResultRow, StatementOptions, StatementOutput,
};
use crate::error::{ConsoleError, Result, StatementError};

/// `SQLite` connection
pub struct SqliteConnection {
    conn: Arc<Mutex<rusqlite::Connection>>,
    interrupt: Arc<SqliteCancelHandle>,
}

impl SqliteConnection {
    /// Open a connection from a config
    pub fn open(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::SQLite {
            return Err(ConsoleError::validation_failed(format!(
                "Expected SQLite engine, got {}",
                config.engine
            )));
        }

        let file_path = config
            .file
            .as_ref()
            .ok_or_else(|| ConsoleError::validation_failed("SQLite requires 'file' parameter"))?;

        let path_str = file_path.to_str().ok_or_else(|| {
            ConsoleError::validation_failed("SQLite file path contains invalid UTF-8 characters")
        })?;

        Self::open_path(path_str)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open_path(":memory:")
    }

    fn open_path(path: &str) -> Result<Self> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = rusqlite::Connection::open_with_flags(path, flags).map_err(|e| {
            ConsoleError::connection_failed(format!("Failed to open SQLite database: {e}"))
        })?;
        let handle = conn.get_interrupt_handle();

        tracing::debug!(path, "opened sqlite connection");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            interrupt: Arc::new(SqliteCancelHandle { handle }),
        })
    }
}

/// Cancels the running `SQLite` statement via `sqlite3_interrupt`
pub struct SqliteCancelHandle {
    handle: InterruptHandle,
}

#[async_trait::async_trait]
impl CancelHandle for SqliteCancelHandle {
    async fn cancel(&self) -> Result<()> {
        self.handle.interrupt();
        Ok(())
    }
}

impl Connection for SqliteConnection {
    fn engine(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn execute_statement(
        &self,
        sql: &str,
        options: &StatementOptions<'_>,
    ) -> std::result::Result<StatementOutput, StatementError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        let max_rows = options.max_rows;

        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            run_statement(&guard, &sql, max_rows)
        })
        .await
        .map_err(|e| StatementError::failed(format!("SQLite statement task failed: {e}")))?
    }

    async fn ping(&self) -> Result<()> {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .map(|_| ())
                .map_err(|e| ConsoleError::connection_failed(format!("SQLite ping failed: {e}")))
        })
        .await
        .map_err(|e| ConsoleError::connection_failed(format!("SQLite ping task failed: {e}")))?
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        let handle: Arc<dyn CancelHandle> = self.interrupt.clone();
        Some(handle)
    }
}

/// Execute one statement and collect its output
fn run_statement(
    conn: &rusqlite::Connection,
    sql: &str,
    max_rows: Option<u64>,
) -> std::result::Result<StatementOutput, StatementError> {
    let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;

    if stmt.column_count() == 0 {
        // INSERT, UPDATE, DELETE, DDL, transaction control
        let affected = stmt.execute([]).map_err(map_sqlite_error)?;
        return Ok(StatementOutput::affected(affected as u64));
    }

    let column_names: Vec<String> = stmt.column_names().iter().map(|s| (*s).to_string()).collect();
    let columns = column_names.iter().map(|name| ColumnMeta::new(name.clone(), None)).collect();

    let fetch_limit = max_rows.map(|cap| cap.saturating_add(1));
    let mut rows_data = Vec::new();
    let mut rows = stmt.query([]).map_err(map_sqlite_error)?;

    while let Some(row) = rows.next().map_err(map_sqlite_error)? {
        rows_data.push(row_to_json(&column_names, row).map_err(map_sqlite_error)?);

        if fetch_limit.is_some_and(|limit| rows_data.len() as u64 >= limit) {
            break;
        }
    }

    Ok(StatementOutput::with_rows(columns, rows_data, max_rows))
}

/// Map a `rusqlite` error onto the statement error model
fn map_sqlite_error(err: rusqlite::Error) -> StatementError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            with_failure_code(StatementError::failed(err.to_string()), failure)
        }
        // Raised while preparing, e.g. syntax errors; `msg` omits the echoed SQL
        rusqlite::Error::SqlInputError { error, msg, .. } => {
            with_failure_code(StatementError::failed(msg.as_str()), error)
        }
        _ => StatementError::failed(err.to_string()).with_name("SqliteError"),
    }
}

fn with_failure_code(mapped: StatementError, failure: &rusqlite::ffi::Error) -> StatementError {
    let mapped = mapped
        .with_code(failure.extended_code.to_string())
        .with_name(format!("{:?}", failure.code));
    if failure.code == ErrorCode::OperationInterrupted {
        mapped.into_canceled()
    } else {
        mapped
    }
}

/// Convert a `SQLite` row to a JSON object
fn row_to_json(column_names: &[String], row: &Row) -> std::result::Result<ResultRow, rusqlite::Error> {
    let mut values = ResultRow::new();

    for (idx, name) in column_names.iter().enumerate() {
        values.insert(name.clone(), sqlite_value_to_json(row, idx)?);
    }

    Ok(values)
}

/// Convert `SQLite` value to JSON value
fn sqlite_value_to_json(
    row: &Row,
    idx: usize,
) -> std::result::Result<serde_json::Value, rusqlite::Error> {
    use rusqlite::types::ValueRef;

    let value_ref = row.get_ref(idx)?;

    Ok(match value_ref {
        ValueRef::Null => serde_json::Value::Null,
        ValueRef::Integer(i) => serde_json::Value::Number(i.into()),
        ValueRef::Real(f) => float_to_json(f),
        ValueRef::Text(s) => {
            let text = std::str::from_utf8(s).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    idx,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            serde_json::Value::String(text.to_string())
        }
        ValueRef::Blob(b) => encode_binary(b),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatementErrorKind;
    use pretty_assertions::assert_eq;

    fn options(max_rows: Option<u64>) -> StatementOptions<'static> {
        StatementOptions { database: None, query_id: "test", max_rows }
    }

    #[tokio::test]
    async fn test_ping_memory() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        assert!(conn.ping().await.is_ok());
        assert_eq!(conn.engine(), DatabaseType::SQLite);
    }

    #[test]
    fn test_open_wrong_engine() {
        let mut config = ConnectionConfig::sqlite(":memory:".into());
        config.engine = DatabaseType::Postgres;

        let result = SqliteConnection::open(&config);
        assert!(result.is_err());
        assert!(result.err().unwrap().message().contains("Expected SQLite engine"));
    }

    #[test]
    fn test_open_missing_file() {
        let config = ConnectionConfig {
            engine: DatabaseType::SQLite,
            file: None,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
        };

        let result = SqliteConnection::open(&config);
        assert!(result.is_err());
        assert!(result.err().unwrap().message().contains("SQLite requires 'file' parameter"));
    }

    #[tokio::test]
    async fn test_ddl_dml_and_select() {
        let conn = SqliteConnection::open_in_memory().unwrap();

        let created = conn
            .execute_statement("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &options(None))
            .await
            .unwrap();
        assert!(created.columns.is_none());
        assert_eq!(created.affected_rows, Some(0));

        let inserted = conn
            .execute_statement("INSERT INTO users (name) VALUES ('Alice'), ('Bob')", &options(None))
            .await
            .unwrap();
        assert_eq!(inserted.affected_rows, Some(2));

        let selected = conn
            .execute_statement("SELECT id, name FROM users ORDER BY id", &options(None))
            .await
            .unwrap();
        let columns = selected.columns.unwrap();
        assert_eq!(columns.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(), vec!["id", "name"]);
        assert_eq!(selected.row_count, 2);
        assert_eq!(selected.rows[0]["name"], serde_json::json!("Alice"));
        assert_eq!(selected.affected_rows, None);
    }

    #[tokio::test]
    async fn test_row_cap_sets_limited() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let sql = "WITH RECURSIVE n(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM n WHERE x < 50) \
                   SELECT x FROM n";

        let output = conn.execute_statement(sql, &options(Some(10))).await.unwrap();
        assert_eq!(output.row_count, 10);
        assert!(output.limited);
        assert_eq!(output.limit, Some(10));

        let output = conn.execute_statement(sql, &options(Some(50))).await.unwrap();
        assert_eq!(output.row_count, 50);
        assert!(!output.limited);
    }

    #[tokio::test]
    async fn test_blob_and_real_values() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let output = conn
            .execute_statement("SELECT X'48656C6C6F' AS data, 2.5 AS ratio, NULL AS missing", &options(None))
            .await
            .unwrap();

        let row = &output.rows[0];
        assert_eq!(row["data"], serde_json::json!("SGVsbG8="));
        assert_eq!(row["ratio"], serde_json::json!(2.5));
        assert_eq!(row["missing"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn test_syntax_error_maps_to_statement_error() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.execute_statement("SELEC 1", &options(None)).await.unwrap_err();

        assert_eq!(err.kind, StatementErrorKind::Failed);
        assert!(err.message.contains("syntax error"));
        assert_eq!(err.code.as_deref(), Some("1"));
        assert_eq!(err.errno, Some(1));
        assert_eq!(err.name.as_deref(), Some("Unknown"));
    }

    #[test]
    fn test_interrupted_failure_maps_to_canceled() {
        let failure = rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_INTERRUPT);
        let err = map_sqlite_error(rusqlite::Error::SqliteFailure(failure, Some("interrupted".into())));

        assert!(err.is_canceled());
        assert_eq!(err.code.as_deref(), Some(crate::error::CANCELED_CODE));
        assert_eq!(err.errno, Some(9));
        assert_eq!(err.name.as_deref(), Some("OperationInterrupted"));
    }

    #[tokio::test]
    async fn test_missing_table_error() {
        let conn = SqliteConnection::open_in_memory().unwrap();
        let err = conn.execute_statement("SELECT * FROM nope", &options(None)).await.unwrap_err();
        assert!(err.message.contains("no such table"));
    }
}
