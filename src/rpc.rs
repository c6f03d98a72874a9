//! JSON-RPC Server
//!
//! This module implements a JSON-RPC 2.0 server over stdio for editors and
//! other front ends that keep one long-lived process.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC 2.0 over stdio (line-based)
//! - **Dependencies**: Only `serde_json`, tokio and anyhow (no protocol crates)
//! - **Concurrency**: every request runs on its own task; responses are
//!   written by a single writer task, so a `cancel` can be answered while an
//!   `execute` is still running
//!
//! # Methods
//!
//! - `execute` - Run a SQL submission (`ExecuteRequest` params)
//! - `cancel` - Cancel a running session (`{"sessionId": "..."}`)
//! - `split` - Split SQL into statements without running anything (`{"sql": "..."}`)
//!
//! # Usage
//!
//! Start the server with: `sqlconsole serve`

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::cancel::CancelOutcome;
use crate::config::ConsoleConfig;
use crate::engine::connect;
use crate::error::ConsoleError;
use crate::orchestrator::{ExecuteRequest, Orchestrator};
use crate::splitter::split_statements;

/// JSON-RPC parse error
const PARSE_ERROR: i32 = -32700;
/// JSON-RPC unknown method
const METHOD_NOT_FOUND: i32 = -32601;
/// JSON-RPC bad params
const INVALID_PARAMS: i32 = -32602;
/// JSON-RPC internal error
const INTERNAL_ERROR: i32 = -32603;
/// Application-defined error raised by a method
const APPLICATION_ERROR: i32 = -32000;

// ============================================================================
// JSON-RPC 2.0 Structures
// ============================================================================

/// JSON-RPC 2.0 Request
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    id: Option<Value>,
    method: String,
    params: Option<Value>,
}

/// JSON-RPC 2.0 Response
#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: String,
    id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    fn result(id: Option<Value>, value: Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(value), error: None }
    }

    fn error(id: Option<Value>, error: JsonRpcError) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(error) }
    }
}

/// JSON-RPC 2.0 Error
#[derive(Debug, Serialize)]
struct JsonRpcError {
    code: i32,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

/// Method failure carrying a stable application code
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
struct MethodFailure {
    code: &'static str,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CancelParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct SplitParams {
    sql: String,
}

// ============================================================================
// Server
// ============================================================================

/// Shared state of a running server
pub struct ServerState {
    orchestrator: Orchestrator,
    config: ConsoleConfig,
}

impl ServerState {
    #[must_use]
    pub const fn new(orchestrator: Orchestrator, config: ConsoleConfig) -> Self {
        Self { orchestrator, config }
    }
}

/// Start the JSON-RPC server
///
/// Reads one request per line from stdin and writes one response per line to
/// stdout until stdin closes. Requests still running at EOF are awaited.
///
/// # Errors
///
/// Returns an error if stdio communication fails.
pub async fn serve(state: ServerState) -> Result<()> {
    let state = Arc::new(state);
    let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(response) = rx.recv().await {
            let mut line = serde_json::to_string(&response)?;
            line.push('\n');
            stdout.write_all(line.as_bytes()).await?;
            stdout.flush().await?;
        }
        Ok::<(), anyhow::Error>(())
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let error = JsonRpcError { code: PARSE_ERROR, message: format!("Parse error: {e}"), data: None };
                tx.send(JsonRpcResponse::error(None, error))
                    .map_err(|_| anyhow!("response writer stopped"))?;
                continue;
            }
        };

        let state = Arc::clone(&state);
        let tx = tx.clone();
        tokio::spawn(async move {
            let response = handle_request(&state, request).await;
            if tx.send(response).is_err() {
                tracing::warn!("response dropped: writer stopped");
            }
        });
    }

    // Writer finishes once every in-flight request has answered
    drop(tx);
    writer.await??;
    Ok(())
}

/// Route a request to its method handler
async fn handle_request(state: &ServerState, request: JsonRpcRequest) -> JsonRpcResponse {
    let result = match request.method.as_str() {
        "initialize" => Ok(handle_initialize()),
        "execute" => handle_execute(state, request.params).await,
        "cancel" => handle_cancel(state, request.params).await,
        "split" => handle_split(request.params),
        other => {
            let error = JsonRpcError {
                code: METHOD_NOT_FOUND,
                message: format!("Unknown method: {other}"),
                data: None,
            };
            return JsonRpcResponse::error(request.id, error);
        }
    };

    match result {
        Ok(value) => JsonRpcResponse::result(request.id, value),
        Err(e) => JsonRpcResponse::error(request.id, to_rpc_error(&e)),
    }
}

/// Map a handler error to a JSON-RPC error object
fn to_rpc_error(err: &anyhow::Error) -> JsonRpcError {
    if let Some(failure) = err.downcast_ref::<MethodFailure>() {
        return JsonRpcError {
            code: APPLICATION_ERROR,
            message: failure.message.clone(),
            data: Some(serde_json::json!({ "code": failure.code })),
        };
    }
    if let Some(console) = err.downcast_ref::<ConsoleError>() {
        return JsonRpcError {
            code: APPLICATION_ERROR,
            message: console.message(),
            data: Some(serde_json::json!({ "code": console.error_code() })),
        };
    }
    if let Some(params) = err.downcast_ref::<serde_json::Error>() {
        return JsonRpcError { code: INVALID_PARAMS, message: format!("Invalid params: {params}"), data: None };
    }
    JsonRpcError { code: INTERNAL_ERROR, message: err.to_string(), data: None }
}

fn params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T> {
    Ok(serde_json::from_value(params.unwrap_or(Value::Null))?)
}

// ============================================================================
// Method Handlers
// ============================================================================

/// Returns server metadata
fn handle_initialize() -> Value {
    serde_json::json!({
        "serverInfo": {
            "name": "sqlconsole",
            "version": env!("CARGO_PKG_VERSION")
        },
        "methods": ["execute", "cancel", "split"]
    })
}

/// Open the named connection and run the submission on it
async fn handle_execute(state: &ServerState, raw: Option<Value>) -> Result<Value> {
    let request: ExecuteRequest = params(raw)?;

    let (_, config) = state.config.resolve(Some(&request.connection_id))?;
    let conn = connect(&config).await?;
    let response = state.orchestrator.execute(&conn, request).await?;

    Ok(serde_json::to_value(response)?)
}

async fn handle_cancel(state: &ServerState, raw: Option<Value>) -> Result<Value> {
    let CancelParams { session_id } = params(raw)?;

    match state.orchestrator.registry().cancel(&session_id).await {
        CancelOutcome::Canceled => Ok(serde_json::json!({ "ok": true })),
        CancelOutcome::NotFound => Err(MethodFailure {
            code: "NOT_FOUND",
            message: format!("Session '{session_id}' is not running"),
        }
        .into()),
        CancelOutcome::Unsupported => Err(MethodFailure {
            code: "NOT_SUPPORTED",
            message: format!("The connection of session '{session_id}' does not support cancellation"),
        }
        .into()),
    }
}

fn handle_split(raw: Option<Value>) -> Result<Value> {
    let SplitParams { sql } = params(raw)?;
    Ok(serde_json::json!({ "statements": split_statements(&sql) }))
}
