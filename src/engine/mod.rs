//! Database Connection Capability and Core Types
//!
//! This module defines the connection capability consumed by the execution
//! pipeline. Each driver (`PostgreSQL`, `MySQL`, `SQLite`) implements the
//! `Connection` trait over one live session with the server.
//!
//! # Exclusive use
//! A `Connection` runs one statement at a time. The orchestrator awaits each
//! `execute_statement` call before issuing the next one.
//!
//! # Cancellation
//! `cancel_handle()` returns an object-safe `CancelHandle` that can be invoked
//! from another task while a statement is running. Drivers without a cancel
//! path return `None`.
//!
//! # Engine Isolation
//! Each driver implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Result, StatementError};

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// One result row, keyed by column name in column order
pub type ResultRow = serde_json::Map<String, serde_json::Value>;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
    /// `SQLite` database
    SQLite,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
            Self::SQLite => "sqlite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = crate::error::ConsoleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "sqlite" => Ok(Self::SQLite),
            other => Err(crate::error::ConsoleError::validation_failed(format!(
                "Unknown engine '{other}'. Expected one of: postgres, mysql, sqlite"
            ))),
        }
    }
}

/// Connection configuration for database engines
///
/// Fields are engine-specific (e.g., `file` only applies to `SQLite`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Database engine type
    pub engine: DatabaseType,

    /// Hostname (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Port number (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Username (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// Password (for postgres/mysql)
    /// WARNING: Sensitive data, do not log or include in error messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Database name (for postgres/mysql)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file path (for sqlite)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl ConnectionConfig {
    /// Create a new `PostgreSQL` connection config
    #[must_use]
    pub const fn postgres(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::Postgres,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `MySQL` connection config
    #[must_use]
    pub const fn mysql(
        host: String,
        port: u16,
        user: String,
        password: String,
        database: String,
    ) -> Self {
        Self {
            engine: DatabaseType::MySQL,
            host: Some(host),
            port: Some(port),
            user: Some(user),
            password: Some(password),
            database: Some(database),
            file: None,
        }
    }

    /// Create a new `SQLite` connection config
    #[must_use]
    pub const fn sqlite(file: PathBuf) -> Self {
        Self {
            engine: DatabaseType::SQLite,
            host: None,
            port: None,
            user: None,
            password: None,
            database: None,
            file: Some(file),
        }
    }
}

/// Column of a row-returning statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    /// Column name as reported by the driver
    pub name: String,

    /// Engine type name, when the driver exposes one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: Option<String>) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// Per-statement execution options shared by every statement of a session
#[derive(Debug, Clone, Copy)]
pub struct StatementOptions<'a> {
    /// Database (schema) the statement runs against, already validated
    pub database: Option<&'a str>,

    /// Correlation id of the running session
    pub query_id: &'a str,

    /// Driver-side row cap; `None` fetches every row
    pub max_rows: Option<u64>,
}

/// What a driver reports for one successfully executed statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatementOutput {
    /// Columns for row-returning statements, `None` otherwise
    pub columns: Option<Vec<ColumnMeta>>,

    /// Returned rows (empty for non-row-returning statements)
    pub rows: Vec<ResultRow>,

    /// Number of rows returned
    pub row_count: u64,

    /// Whether the driver stopped fetching at `limit`
    pub limited: bool,

    /// The cap in effect when `limited` is set
    pub limit: Option<u64>,

    /// Rows affected by DML (and zero for DDL)
    pub affected_rows: Option<u64>,

    /// Server warnings attached to the statement
    pub warnings: Vec<String>,
}

impl StatementOutput {
    /// Output of a row-returning statement, applying an optional row cap
    ///
    /// `rows` may hold one row beyond the cap; that extra row only signals that
    /// the result was truncated and is dropped here.
    #[must_use]
    pub fn with_rows(columns: Vec<ColumnMeta>, mut rows: Vec<ResultRow>, max_rows: Option<u64>) -> Self {
        let mut limited = false;
        if let Some(cap) = max_rows {
            let cap_len = usize::try_from(cap).unwrap_or(usize::MAX);
            if rows.len() > cap_len {
                rows.truncate(cap_len);
                limited = true;
            }
        }

        Self {
            columns: Some(columns),
            row_count: rows.len() as u64,
            rows,
            limited,
            limit: if limited { max_rows } else { None },
            affected_rows: None,
            warnings: Vec::new(),
        }
    }

    /// Output of a statement that does not return rows
    #[must_use]
    pub fn affected(affected_rows: u64) -> Self {
        Self { affected_rows: Some(affected_rows), ..Default::default() }
    }
}

/// Cancels the statement currently running on one connection
#[async_trait]
pub trait CancelHandle: Send + Sync {
    /// Ask the server (or driver) to abort the in-flight statement
    ///
    /// Returns once the request was delivered; the running statement then
    /// fails with a cancellation error on its own.
    async fn cancel(&self) -> Result<()>;
}

/// Live database connection used to run the statements of one session
pub trait Connection: Send + Sync {
    /// Engine behind this connection
    fn engine(&self) -> DatabaseType;

    /// Execute a single statement
    ///
    /// Driver errors are returned as `StatementError`, never as `ConsoleError`.
    fn execute_statement(
        &self,
        sql: &str,
        options: &StatementOptions<'_>,
    ) -> impl std::future::Future<Output = std::result::Result<StatementOutput, StatementError>> + Send;

    /// Check that the connection is usable
    fn ping(&self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Handle for out-of-band cancellation, if the driver supports it
    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>>;
}

/// A connection to any compiled-in engine
pub enum EngineConnection {
    #[cfg(feature = "sqlite")]
    Sqlite(sqlite::SqliteConnection),
    #[cfg(feature = "postgres")]
    Postgres(postgres::PostgresConnection),
    #[cfg(feature = "mysql")]
    MySql(mysql::MySqlConnection),
}

/// Open a connection for the given configuration
pub async fn connect(config: &ConnectionConfig) -> Result<EngineConnection> {
    match config.engine {
        #[cfg(feature = "sqlite")]
        DatabaseType::SQLite => Ok(EngineConnection::Sqlite(sqlite::SqliteConnection::open(config)?)),
        #[cfg(feature = "postgres")]
        DatabaseType::Postgres => {
            Ok(EngineConnection::Postgres(postgres::PostgresConnection::connect(config).await?))
        }
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => Ok(EngineConnection::MySql(mysql::MySqlConnection::connect(config).await?)),
        #[allow(unreachable_patterns)]
        other => Err(crate::error::ConsoleError::config_error(format!(
            "Engine '{other}' is not compiled into this build"
        ))),
    }
}

impl Connection for EngineConnection {
    fn engine(&self) -> DatabaseType {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => conn.engine(),
            #[cfg(feature = "postgres")]
            Self::Postgres(conn) => conn.engine(),
            #[cfg(feature = "mysql")]
            Self::MySql(conn) => conn.engine(),
        }
    }

    async fn execute_statement(
        &self,
        sql: &str,
        options: &StatementOptions<'_>,
    ) -> std::result::Result<StatementOutput, StatementError> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => conn.execute_statement(sql, options).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(conn) => conn.execute_statement(sql, options).await,
            #[cfg(feature = "mysql")]
            Self::MySql(conn) => conn.execute_statement(sql, options).await,
        }
    }

    async fn ping(&self) -> Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => conn.ping().await,
            #[cfg(feature = "postgres")]
            Self::Postgres(conn) => conn.ping().await,
            #[cfg(feature = "mysql")]
            Self::MySql(conn) => conn.ping().await,
        }
    }

    fn cancel_handle(&self) -> Option<Arc<dyn CancelHandle>> {
        match self {
            #[cfg(feature = "sqlite")]
            Self::Sqlite(conn) => conn.cancel_handle(),
            #[cfg(feature = "postgres")]
            Self::Postgres(conn) => conn.cancel_handle(),
            #[cfg(feature = "mysql")]
            Self::MySql(conn) => conn.cancel_handle(),
        }
    }
}

/// Encode binary column data for JSON output
pub(crate) fn encode_binary(bytes: &[u8]) -> serde_json::Value {
    use base64::Engine;
    serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
}

/// Convert a float to JSON, mapping NaN/Infinity to null
pub(crate) fn float_to_json(value: f64) -> serde_json::Value {
    serde_json::Number::from_f64(value).map_or(serde_json::Value::Null, serde_json::Value::Number)
}
