//! `MySQL` Connection Implementation
//!
//! This module implements the `Connection` trait for `MySQL` and `MariaDB`.
//!
//! # Features
//! - Client-server connections via TCP
//! - Column metadata from the result header, so empty results still report columns
//! - Cancellation with `KILL QUERY` issued from a side connection
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - The `database` context is applied with `USE`
//! - Binary column data is Base64-encoded when it is not valid UTF-8
//! - DATE/DATETIME values rendered as ISO 8601 strings

use mysql_async::prelude::*;
use mysql_async::{Column, Conn, Opts, OptsBuilder, Row, Value};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::engine::{
    encode_binary, float_to_json, CancelHandle, ColumnMeta, Connection, ConnectionConfig,
    DatabaseType, ResultRow, StatementOptions, StatementOutput,
};
use crate::error::{ConsoleError, Result, StatementError};

/// Server error raised in the session whose query was killed
const ER_QUERY_INTERRUPTED: u16 = 1317;

struct Session {
    conn: Conn,
    /// Database last selected with `USE`
    database: Option<String>,
}

/// `MySQL` connection
pub struct MySqlConnection {
    session: Mutex<Session>,
    cancel: Arc<MySqlCancelHandle>,
}

impl MySqlConnection {
    /// Connect to the server described by `config`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::MySQL {
            return Err(ConsoleError::validation_failed(format!(
                "Expected MySQL engine, got {}",
                config.engine
            )));
        }

        let opts = Opts::from(build_mysql_opts(config)?);
        let conn = Conn::new(opts.clone()).await.map_err(|e| {
            ConsoleError::connection_failed(format!("Failed to connect to MySQL: {e}"))
        })?;

        let connection_id = conn.id();
        tracing::debug!(connection_id, "opened mysql connection");

        Ok(Self {
            session: Mutex::new(Session { conn, database: config.database.clone() }),
            cancel: Arc::new(MySqlCancelHandle { opts, connection_id }),
        })
    }
}

/// Kills the running query of one connection by id
pub struct MySqlCancelHandle {
    opts: Opts,
    connection_id: u32,
}

#[async_trait::async_trait]
impl CancelHandle for MySqlCancelHandle {
    async fn cancel(&self) -> Result<()> {
        let mut side = Conn::new(self.opts.clone()).await.map_err(|e| {
            ConsoleError::engine_error("mysql", format!("Failed to open cancel connection: {e}"))
        })?;

        let kill = format!("KILL QUERY {}", self.connection_id);
        let outcome = side.query_drop(kill).await;
        if let Err(e) = side.disconnect().await {
            tracing::debug!(error = %e, "failed to close mysql cancel connection");
        }

        outcome.map_err(|e| ConsoleError::engine_error("mysql", format!("KILL QUERY failed: {e}")))
    }
}

impl Connection for MySqlConnection {
    fn engine(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    async fn execute_statement(
        &self,
        sql: &str,
        options: &StatementOptions<'_>,
    ) -> std::result::Result<StatementOutput, StatementError> {
        let mut session = self.session.lock().await;

        if let Some(database) = options.database {
            if session.database.as_deref() != Some(database) {
                let use_db = format!("USE `{}`", database.replace('`', "``"));
                session.conn.query_drop(use_db).await.map_err(map_mysql_error)?;
                session.database = Some(database.to_string());
            }
        }

        execute_query(&mut session.conn, sql, options.max_rows).await
    }

    async fn ping(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session
            .conn
            .ping()
            .await
            .map_err(|e| ConsoleError::connection_failed(format!("MySQL ping failed: {e}")))
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        let handle: Arc<dyn CancelHandle> = self.cancel.clone();
        Some(handle)
    }
}

/// Build `MySQL` connection options from `ConnectionConfig`
fn build_mysql_opts(config: &ConnectionConfig) -> Result<OptsBuilder> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| ConsoleError::validation_failed("MySQL requires 'host' parameter"))?;

    let port = config
        .port
        .ok_or_else(|| ConsoleError::validation_failed("MySQL requires 'port' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| ConsoleError::validation_failed("MySQL requires 'user' parameter"))?;

    let opts = OptsBuilder::default()
        .ip_or_hostname(host)
        .tcp_port(port)
        .user(Some(user))
        .pass(config.password.as_ref())
        .db_name(config.database.as_ref());

    Ok(opts)
}

/// Run one statement through the text protocol
async fn execute_query(
    conn: &mut Conn,
    sql: &str,
    max_rows: Option<u64>,
) -> std::result::Result<StatementOutput, StatementError> {
    let mut result = conn.query_iter(sql).await.map_err(map_mysql_error)?;

    let header: Vec<Column> = result.columns_ref().to_vec();
    let warning_count = result.warnings();

    if header.is_empty() {
        // INSERT, UPDATE, DELETE, DDL, transaction control
        let affected = result.affected_rows();
        result.drop_result().await.map_err(map_mysql_error)?;

        let mut output = StatementOutput::affected(affected);
        output.warnings = warnings_note(warning_count);
        return Ok(output);
    }

    let columns: Vec<ColumnMeta> = header
        .iter()
        .map(|col| ColumnMeta::new(col.name_str().to_string(), Some(column_type_name(col))))
        .collect();

    let fetch_limit = max_rows.map(|cap| cap.saturating_add(1));
    let mut rows_data = Vec::new();

    while let Some(row) = result.next().await.map_err(map_mysql_error)? {
        rows_data.push(row_to_json(&columns, &row));
        if fetch_limit.is_some_and(|limit| rows_data.len() as u64 >= limit) {
            break;
        }
    }

    // Remaining rows must be consumed before the connection can be reused
    result.drop_result().await.map_err(map_mysql_error)?;

    let mut output = StatementOutput::with_rows(columns, rows_data, max_rows);
    output.warnings = warnings_note(warning_count);
    Ok(output)
}

fn warnings_note(count: u16) -> Vec<String> {
    if count == 0 {
        Vec::new()
    } else {
        vec![format!("{count} warning(s); run SHOW WARNINGS for details")]
    }
}

/// Type name of a column, e.g. `MYSQL_TYPE_LONG` becomes `long`
fn column_type_name(column: &Column) -> String {
    let raw = format!("{:?}", column.column_type());
    raw.trim_start_matches("MYSQL_TYPE_").to_lowercase()
}

fn map_mysql_error(err: mysql_async::Error) -> StatementError {
    match err {
        mysql_async::Error::Server(server) => {
            map_server_error(server.code, &server.message, &server.state)
        }
        other => StatementError::failed(other.to_string()).with_name("MySqlError"),
    }
}

/// Map a server error packet onto the statement error model
fn map_server_error(code: u16, message: &str, state: &str) -> StatementError {
    let mapped = StatementError::failed(message)
        .with_code(code.to_string())
        .with_sql_state(state)
        .with_name("ServerError");

    if code == ER_QUERY_INTERRUPTED {
        mapped.into_canceled()
    } else {
        mapped
    }
}

/// Convert a `MySQL` row to a JSON object in column order
fn row_to_json(columns: &[ColumnMeta], row: &Row) -> ResultRow {
    let mut values = ResultRow::new();

    for (idx, column) in columns.iter().enumerate() {
        let value = row.as_ref(idx).map_or(serde_json::Value::Null, mysql_value_to_json);
        values.insert(column.name.clone(), value);
    }

    values
}

/// Convert `MySQL` value to JSON value
fn mysql_value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => serde_json::Value::String(s.to_string()),
            Err(_) => encode_binary(bytes),
        },

        Value::Int(i) => serde_json::Value::Number((*i).into()),
        Value::UInt(u) => serde_json::Value::Number((*u).into()),
        Value::Float(f) => float_to_json(f64::from(*f)),
        Value::Double(d) => float_to_json(*d),

        Value::Date(year, month, day, hour, minute, second, micro) => serde_json::Value::String(format!(
            "{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"
        )),

        Value::Time(is_negative, days, hours, minutes, seconds, micros) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = *days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{micros:06}"
            ))
        }
    }
}
