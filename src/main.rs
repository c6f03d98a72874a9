//! sqlconsole CLI Entry Point
//!
//! Subcommands:
//! - `run` - Execute a multi-statement SQL submission
//! - `split` - Show how a submission splits into statements
//! - `limit` - Show the row-limit rewrite of one statement
//! - `connect` - Validate (and optionally save) a connection
//! - `connections` - List saved connections
//! - `serve` - JSON-RPC server on stdio
//!
//! All output to stdout is JSON-only. Logs go to stderr.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use sqlconsole::config::{self, ConfigLocation};
use sqlconsole::rpc::{self, ServerState};
use sqlconsole::{
    connect, enforce_row_limit, split_statements, CancelOutcome, Connection, ConnectionConfig,
    ConsoleError, DatabaseType, ErrorEnvelope, ExecuteRequest, ExecutionSettings, ExecutionStatus,
    JsonLinesSink, Metadata, Orchestrator, Result, Stopwatch, SuccessEnvelope,
};

/// sqlconsole - multi-statement SQL execution with per-statement results
#[derive(Parser)]
#[command(name = "sqlconsole")]
#[command(about = "Run multi-statement SQL with per-statement timing, errors and cancellation")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a SQL submission statement by statement
    Run(RunArgs),

    /// Split SQL into statements without executing anything
    Split {
        #[command(flatten)]
        input: SqlInput,
    },

    /// Show the row-limit rewrite of a single statement
    Limit {
        #[command(flatten)]
        input: SqlInput,

        /// Row cap to enforce
        #[arg(long, default_value_t = 10_000)]
        max_rows: u64,
    },

    /// Validate a connection and optionally save it
    Connect(ConnectArgs),

    /// List saved connections (passwords are never shown)
    Connections,

    /// Start the JSON-RPC server on stdio
    Serve {
        /// Append finished sessions to this JSON-lines file
        #[arg(long)]
        history: Option<PathBuf>,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Run(_) => "run",
            Self::Split { .. } => "split",
            Self::Limit { .. } => "limit",
            Self::Connect(_) => "connect",
            Self::Connections => "connections",
            Self::Serve { .. } => "serve",
        }
    }
}

/// Connection selection: a saved name, explicit parameters, or both
#[derive(Args, Debug, Default)]
struct ConnectionArgs {
    /// Saved connection name (defaults to the configured default)
    #[arg(long)]
    name: Option<String>,

    /// Engine for an explicit connection (postgres, mysql, sqlite)
    #[arg(long)]
    engine: Option<DatabaseType>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    #[arg(long)]
    user: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Database to connect to (postgres/mysql)
    #[arg(long)]
    dbname: Option<String>,

    /// Database file (sqlite)
    #[arg(long)]
    file: Option<PathBuf>,
}

impl ConnectionArgs {
    /// Resolve to a connection id and config; explicit flags override saved values
    fn resolve(&self) -> Result<(String, ConnectionConfig)> {
        let (id, mut config) = match self.engine {
            Some(engine) => {
                let id = self.name.clone().unwrap_or_else(|| engine.as_str().to_string());
                let config = ConnectionConfig {
                    engine,
                    host: None,
                    port: default_port(engine),
                    user: None,
                    password: None,
                    database: None,
                    file: None,
                };
                (id, config)
            }
            None => config::resolve_connection(self.name.as_deref())?,
        };

        if let Some(host) = &self.host {
            config.host = Some(host.clone());
        }
        if let Some(port) = self.port {
            config.port = Some(port);
        }
        if let Some(user) = &self.user {
            config.user = Some(user.clone());
        }
        if let Some(password) = &self.password {
            config.password = Some(password.clone());
        }
        if let Some(dbname) = &self.dbname {
            config.database = Some(dbname.clone());
        }
        if let Some(file) = &self.file {
            config.file = Some(file.clone());
        }

        Ok((id, config))
    }
}

const fn default_port(engine: DatabaseType) -> Option<u16> {
    match engine {
        DatabaseType::Postgres => Some(5432),
        DatabaseType::MySQL => Some(3306),
        DatabaseType::SQLite => None,
    }
}

/// Where SQL text comes from
#[derive(Args, Debug)]
struct SqlInput {
    /// SQL text
    #[arg(long, conflicts_with = "input")]
    sql: Option<String>,

    /// Read SQL from a file ("-" for stdin)
    #[arg(long)]
    input: Option<PathBuf>,
}

impl SqlInput {
    fn read(&self) -> Result<String> {
        if let Some(sql) = &self.sql {
            return Ok(sql.clone());
        }

        match &self.input {
            Some(path) if path.as_os_str() == "-" => {
                let mut sql = String::new();
                std::io::stdin()
                    .read_to_string(&mut sql)
                    .map_err(|e| ConsoleError::validation_failed(format!("Could not read stdin: {e}")))?;
                Ok(sql)
            }
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                ConsoleError::validation_failed(format!("Could not read {}: {e}", path.display()))
            }),
            None => Err(ConsoleError::validation_failed("Provide SQL with --sql or --input")),
        }
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(flatten)]
    input: SqlInput,

    /// Database (schema) context for every statement
    #[arg(long)]
    database: Option<String>,

    /// Session id used for cancellation (generated when omitted)
    #[arg(long)]
    session_id: Option<String>,

    /// Keep going after a failing statement
    #[arg(long, conflicts_with = "stop_on_error")]
    continue_on_error: bool,

    /// Stop at the first failing statement
    #[arg(long)]
    stop_on_error: bool,

    /// Row cap for SELECT statements
    #[arg(long)]
    max_rows: Option<u64>,

    /// Do not rewrite statements to add a LIMIT
    #[arg(long)]
    no_row_limit: bool,

    /// Append the finished session to this JSON-lines file
    #[arg(long)]
    history: Option<PathBuf>,

    /// Origin tag recorded on the session
    #[arg(long, default_value = "cli")]
    source: String,

    #[arg(long)]
    user_id: Option<String>,

    #[arg(long)]
    tab_id: Option<String>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SaveLocation {
    Local,
    Global,
}

impl From<SaveLocation> for ConfigLocation {
    fn from(location: SaveLocation) -> Self {
        match location {
            SaveLocation::Local => Self::Local,
            SaveLocation::Global => Self::Global,
        }
    }
}

#[derive(Args, Debug)]
struct ConnectArgs {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Save the connection after validating it
    #[arg(long, value_enum)]
    save: Option<SaveLocation>,

    /// Store an environment variable reference instead of the password
    #[arg(long)]
    password_env: Option<String>,
}

/// What a successful command prints
struct Report {
    engine: String,
    data: serde_json::Value,
    meta: Metadata,
    exit: ExitCode,
}

impl Report {
    fn new(engine: impl Into<String>, data: serde_json::Value, meta: Metadata) -> Self {
        Self { engine: engine.into(), data, meta, exit: ExitCode::SUCCESS }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let command = cli.command.name();

    if let Commands::Serve { history } = cli.command {
        return match serve(history).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("sqlconsole: error: {e:#}");
                ExitCode::FAILURE
            }
        };
    }

    match dispatch(cli.command).await {
        Ok(report) => {
            print_json(&SuccessEnvelope::new(report.engine, command, report.data, report.meta));
            report.exit
        }
        Err(err) => {
            print_json(&ErrorEnvelope::from_error("", command, &err));
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: serde::Serialize>(envelope: &T) {
    match serde_json::to_string(envelope) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("sqlconsole: could not serialize output: {e}"),
    }
}

async fn dispatch(command: Commands) -> Result<Report> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::Split { input } => {
            let stopwatch = Stopwatch::start();
            let statements = split_statements(&input.read()?);
            let data = serde_json::json!({ "count": statements.len(), "statements": statements });
            Ok(Report::new("", data, Metadata::new(stopwatch.finish().duration_ms)))
        }
        Commands::Limit { input, max_rows } => {
            let stopwatch = Stopwatch::start();
            let sql = input.read()?;
            let rewritten = enforce_row_limit(&sql, max_rows);
            let data = serde_json::json!({ "sql": rewritten, "maxRows": max_rows });
            Ok(Report::new("", data, Metadata::new(stopwatch.finish().duration_ms)))
        }
        Commands::Connect(args) => connect_command(args).await,
        Commands::Connections => {
            let stopwatch = Stopwatch::start();
            let connections: Vec<serde_json::Value> = config::list_connections()?
                .into_iter()
                .map(|(name, config)| {
                    serde_json::json!({
                        "name": name,
                        "engine": config.engine,
                        "host": config.host,
                        "port": config.port,
                        "database": config.database,
                        "file": config.file,
                    })
                })
                .collect();
            Ok(Report::new("", serde_json::json!({ "connections": connections }), Metadata::new(stopwatch.finish().duration_ms)))
        }
        Commands::Serve { .. } => Err(ConsoleError::validation_failed("serve is not a one-shot command")),
    }
}

fn build_orchestrator(settings: ExecutionSettings) -> Orchestrator {
    let history = settings.history_file.clone();
    let orchestrator = Orchestrator::new(settings);
    match history {
        Some(path) => orchestrator.with_sink(Arc::new(JsonLinesSink::new(path))),
        None => orchestrator,
    }
}

async fn run(args: RunArgs) -> Result<Report> {
    let sql = args.input.read()?;
    let (connection_id, conn_config) = args.connection.resolve()?;

    let mut settings = config::execution_settings()?;
    if let Some(max_rows) = args.max_rows {
        settings.max_rows = Some(max_rows);
    }
    if args.no_row_limit {
        settings.enforce_row_limit = false;
    }
    if args.history.is_some() {
        settings.history_file = args.history;
    }

    let stop_on_error = match (args.stop_on_error, args.continue_on_error) {
        (true, _) => Some(true),
        (_, true) => Some(false),
        _ => None,
    };

    let session_id = args.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let request = ExecuteRequest {
        connection_id,
        session_id: Some(session_id.clone()),
        database: args.database,
        sql,
        stop_on_error,
        user_id: args.user_id,
        tab_id: args.tab_id,
        source: Some(args.source),
    };

    let orchestrator = build_orchestrator(settings);
    let conn = connect(&conn_config).await?;
    let engine = conn.engine();

    // Ctrl-C cancels the running statement instead of killing the process
    let registry = orchestrator.registry().clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let outcome = registry.cancel(&session_id).await;
            if outcome != CancelOutcome::Canceled {
                tracing::warn!(?outcome, "interrupt received but nothing was canceled");
            }
        }
    });

    let outcome = orchestrator.execute(&conn, request).await;
    interrupt.abort();
    let response = outcome?;

    let meta = Metadata::for_session(&response);
    let failed = response.session.status == ExecutionStatus::Error;
    let data = serde_json::to_value(&response)
        .map_err(|e| ConsoleError::query_failed(format!("Could not serialize session: {e}")))?;

    let mut report = Report::new(engine.as_str(), data, meta);
    if failed {
        report.exit = ExitCode::from(2);
    }
    Ok(report)
}

async fn connect_command(args: ConnectArgs) -> Result<Report> {
    let stopwatch = Stopwatch::start();
    let (name, mut conn_config) = args.connection.resolve()?;

    if let Some(env_var) = &args.password_env {
        let password = std::env::var(env_var).map_err(|_| {
            ConsoleError::config_error(format!("Environment variable {env_var} not found for password"))
        })?;
        conn_config.password = Some(password);
    }

    let conn = connect(&conn_config).await?;
    conn.ping().await?;

    let saved_to = match args.save {
        Some(location) => Some(config::save_connection(
            Some(name.clone()),
            conn_config.clone(),
            args.password_env,
            location.into(),
        )?),
        None => None,
    };

    let data = serde_json::json!({
        "connection": name,
        "engine": conn_config.engine,
        "savedTo": saved_to,
    });
    Ok(Report::new(conn_config.engine.as_str(), data, Metadata::new(stopwatch.finish().duration_ms)))
}

async fn serve(history: Option<PathBuf>) -> anyhow::Result<()> {
    let mut settings = config::execution_settings()?;
    if history.is_some() {
        settings.history_file = history;
    }

    let console_config = config::load_with_precedence()?;
    let state = ServerState::new(build_orchestrator(settings), console_config);

    tracing::info!("json-rpc server listening on stdio");
    rpc::serve(state).await
}
