//! `PostgreSQL` Connection Implementation
//!
//! This module implements the `Connection` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP
//! - Statement execution over the extended protocol (prepare, then query or execute)
//! - Server-side cancellation through the protocol cancel request
//! - Rich type system support (JSON/JSONB, timestamps, UUID, etc.)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - The `database` context maps to the `search_path` of the session
//! - JSON/JSONB preserved as nested JSON
//! - BYTEA data is Base64-encoded for JSON safety
//! - Values the driver cannot decode become `null` plus a warning

use futures_util::TryStreamExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{FromSql, ToSql};
use tokio_postgres::{CancelToken, Client, Config, NoTls, Row};

use crate::engine::{
    encode_binary, float_to_json, CancelHandle, ColumnMeta, Connection, ConnectionConfig,
    DatabaseType, ResultRow, StatementOptions, StatementOutput,
};
use crate::error::{ConsoleError, Result, StatementError};

/// `PostgreSQL` connection
pub struct PostgresConnection {
    client: Client,
    cancel: Arc<PostgresCancelHandle>,
    /// Schema last applied through `SET search_path`
    search_path: Mutex<Option<String>>,
}

impl PostgresConnection {
    /// Connect to the server described by `config`
    pub async fn connect(config: &ConnectionConfig) -> Result<Self> {
        if config.engine != DatabaseType::Postgres {
            return Err(ConsoleError::validation_failed(format!(
                "Expected PostgreSQL engine, got {}",
                config.engine
            )));
        }

        let pg_config = build_pg_config(config)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            ConsoleError::connection_failed(format!("Failed to connect to PostgreSQL: {e}"))
        })?;

        // Connection errors are logged without the config to avoid leaking credentials
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!(error = %e, "postgres connection task ended");
            }
        });

        let cancel = Arc::new(PostgresCancelHandle { token: client.cancel_token() });
        tracing::debug!("opened postgres connection");

        Ok(Self { client, cancel, search_path: Mutex::new(None) })
    }

    /// Point `search_path` at `database` unless it is already there
    async fn apply_database(&self, database: Option<&str>) -> std::result::Result<(), StatementError> {
        let Some(database) = database else {
            return Ok(());
        };
        if self.search_path.lock().as_deref() == Some(database) {
            return Ok(());
        }

        let statement = format!("SET search_path TO {}", quote_identifier(database));
        self.client.batch_execute(&statement).await.map_err(|e| map_pg_error(&e))?;
        *self.search_path.lock() = Some(database.to_string());
        Ok(())
    }
}

/// Sends a protocol-level cancel request for the running statement
pub struct PostgresCancelHandle {
    token: CancelToken,
}

#[async_trait::async_trait]
impl CancelHandle for PostgresCancelHandle {
    async fn cancel(&self) -> Result<()> {
        self.token.cancel_query(NoTls).await.map_err(|e| {
            ConsoleError::engine_error("postgres", format!("Failed to send cancel request: {e}"))
        })
    }
}

impl Connection for PostgresConnection {
    fn engine(&self) -> DatabaseType {
        DatabaseType::Postgres
    }

    async fn execute_statement(
        &self,
        sql: &str,
        options: &StatementOptions<'_>,
    ) -> std::result::Result<StatementOutput, StatementError> {
        self.apply_database(options.database).await?;

        let stmt = self.client.prepare(sql).await.map_err(|e| map_pg_error(&e))?;

        if stmt.columns().is_empty() {
            // INSERT, UPDATE, DELETE, DDL, transaction control
            let affected = self.client.execute(&stmt, &[]).await.map_err(|e| map_pg_error(&e))?;
            return Ok(StatementOutput::affected(affected));
        }

        let columns: Vec<ColumnMeta> = stmt
            .columns()
            .iter()
            .map(|c| ColumnMeta::new(c.name(), Some(c.type_().name().to_string())))
            .collect();

        let rows = self
            .client
            .query_raw(&stmt, std::iter::empty::<&dyn ToSql>())
            .await
            .map_err(|e| map_pg_error(&e))?;
        let mut rows = std::pin::pin!(rows);

        let fetch_limit = options.max_rows.map(|cap| cap.saturating_add(1));
        let mut warnings = Vec::new();
        let mut rows_data = Vec::new();

        // Dropping the stream early discards the rest of the portal
        while let Some(row) = rows.try_next().await.map_err(|e| map_pg_error(&e))? {
            rows_data.push(row_to_json(&columns, &row, &mut warnings));
            if fetch_limit.is_some_and(|limit| rows_data.len() as u64 >= limit) {
                break;
            }
        }

        let mut output = StatementOutput::with_rows(columns, rows_data, options.max_rows);
        output.warnings = warnings;
        Ok(output)
    }

    async fn ping(&self) -> Result<()> {
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| ConsoleError::connection_failed(format!("PostgreSQL ping failed: {e}")))
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        let handle: Arc<dyn CancelHandle> = self.cancel.clone();
        Some(handle)
    }
}

/// Build `PostgreSQL` connection config from `ConnectionConfig`
fn build_pg_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config
        .host
        .as_ref()
        .ok_or_else(|| ConsoleError::validation_failed("PostgreSQL requires 'host' parameter"))?;

    let port = config
        .port
        .ok_or_else(|| ConsoleError::validation_failed("PostgreSQL requires 'port' parameter"))?;

    let user = config
        .user
        .as_ref()
        .ok_or_else(|| ConsoleError::validation_failed("PostgreSQL requires 'user' parameter"))?;

    let mut pg_config = Config::new();
    pg_config.host(host).port(port).user(user);

    if let Some(password) = &config.password {
        pg_config.password(password);
    }

    // "*" keeps the server default database
    match config.database.as_deref() {
        Some("*") | None => {}
        Some(db) => {
            pg_config.dbname(db);
        }
    }

    Ok(pg_config)
}

/// Quote an identifier for use in a `SET` statement
fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Map a driver error onto the statement error model
fn map_pg_error(err: &tokio_postgres::Error) -> StatementError {
    let Some(db_error) = err.as_db_error() else {
        return StatementError::failed(err.to_string()).with_name("PostgresError");
    };

    let sql_state = db_error.code().code();
    let mapped = StatementError::failed(db_error.message())
        .with_code(sql_state)
        .with_sql_state(sql_state)
        .with_name(db_error.severity());

    if *db_error.code() == SqlState::QUERY_CANCELED {
        mapped.into_canceled()
    } else {
        mapped
    }
}

/// Convert a `PostgreSQL` row to a JSON object
fn row_to_json(columns: &[ColumnMeta], row: &Row, warnings: &mut Vec<String>) -> ResultRow {
    let mut values = ResultRow::new();

    for (idx, column) in columns.iter().enumerate() {
        let value = postgres_value_to_json(row, idx).unwrap_or_else(|e| {
            let warning = format!("Column '{}' could not be decoded: {e}", column.name);
            if !warnings.contains(&warning) {
                warnings.push(warning);
            }
            serde_json::Value::Null
        });
        values.insert(column.name.clone(), value);
    }

    values
}

fn get<'a, T: FromSql<'a>>(
    row: &'a Row,
    idx: usize,
) -> std::result::Result<Option<T>, tokio_postgres::Error> {
    row.try_get(idx)
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(
    row: &Row,
    idx: usize,
) -> std::result::Result<serde_json::Value, tokio_postgres::Error> {
    use serde_json::Value;
    use tokio_postgres::types::Type;

    let col_type = row.columns()[idx].type_();

    let value = match *col_type {
        Type::BOOL => get::<bool>(row, idx)?.map(Value::Bool),

        // Integers
        Type::CHAR => get::<i8>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT2 => get::<i16>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT4 => get::<i32>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::INT8 => get::<i64>(row, idx)?.map(|v| Value::Number(v.into())),
        Type::OID => get::<u32>(row, idx)?.map(|v| Value::Number(v.into())),

        // Floats (NaN/Infinity become null)
        Type::FLOAT4 => get::<f32>(row, idx)?.map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx)?.map(float_to_json),

        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            get::<String>(row, idx)?.map(Value::String)
        }

        Type::JSON | Type::JSONB => get::<Value>(row, idx)?,

        Type::BYTEA => get::<Vec<u8>>(row, idx)?.map(|v| encode_binary(&v)),

        // Timestamps as ISO 8601 strings
        Type::TIMESTAMP => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => {
            get::<chrono::NaiveDate>(row, idx)?.map(|v| Value::String(v.format("%Y-%m-%d").to_string()))
        }
        Type::TIME => get::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),

        Type::UUID => get::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),

        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => get::<Vec<Option<String>>>(row, idx)?.map(|items| {
            Value::Array(items.into_iter().map(|v| v.map_or(Value::Null, Value::String)).collect())
        }),
        Type::INT4_ARRAY => get::<Vec<Option<i32>>>(row, idx)?.map(|items| {
            Value::Array(items.into_iter().map(|v| v.map_or(Value::Null, |n| Value::Number(n.into()))).collect())
        }),
        Type::INT8_ARRAY => get::<Vec<Option<i64>>>(row, idx)?.map(|items| {
            Value::Array(items.into_iter().map(|v| v.map_or(Value::Null, |n| Value::Number(n.into()))).collect())
        }),

        // Anything else the driver can hand over as text
        _ => get::<String>(row, idx)?.map(Value::String),
    };

    Ok(value.unwrap_or(Value::Null))
}
