//! Output Validation Tests
//!
//! Validates the JSON shapes written to stdout and returned over JSON-RPC:
//! - Success and error envelopes carry exactly the documented fields
//! - Session and result-set objects use camelCase keys
//! - Statement failures stay inside success envelopes
//! - Error codes are drawn from the stable set
//!
//! Uses `insta` inline snapshots to detect unintended output changes.

#![cfg(feature = "sqlite")]

use pretty_assertions::assert_eq;
use sqlconsole::engine::sqlite::SqliteConnection;
use sqlconsole::{
    ConsoleError, ErrorEnvelope, ErrorInfo, ExecuteRequest, ExecutionSettings, Metadata,
    Orchestrator, SuccessEnvelope,
};

fn keys(value: &serde_json::Value) -> Vec<&str> {
    value.as_object().expect("Should be JSON object").keys().map(String::as_str).collect()
}

async fn run_sqlite(sql: &str) -> serde_json::Value {
    let orchestrator = Orchestrator::new(ExecutionSettings::default());
    let conn = SqliteConnection::open_in_memory().expect("Should open in-memory database");
    let request = ExecuteRequest {
        connection_id: "scratch".into(),
        session_id: Some("fixed-session".into()),
        sql: sql.into(),
        ..Default::default()
    };

    let response = orchestrator.execute(&conn, request).await.expect("Session should run");
    let meta = Metadata::for_session(&response);
    serde_json::to_value(SuccessEnvelope::new("sqlite", "run", response, meta)).expect("Should serialize")
}

// ============================================================================
// Envelope Structure Tests
// ============================================================================

#[test]
fn test_success_envelope_structure() {
    let envelope = SuccessEnvelope::new("sqlite", "split", serde_json::json!({"count": 2}), Metadata::new(3));
    let json_value = serde_json::to_value(&envelope).expect("Should serialize");

    assert_eq!(keys(&json_value), vec!["ok", "engine", "command", "data", "meta"]);
    assert_eq!(json_value["ok"], true);
    assert_eq!(json_value["meta"]["execution_ms"], 3);
    assert!(json_value["meta"].get("rows_returned").is_none());
}

#[test]
fn test_error_envelope_structure() {
    let envelope = ErrorEnvelope::new("", "run", ErrorInfo::new("VALIDATION_FAILED", "Provide SQL with --sql or --input"));
    let json_value = serde_json::to_value(&envelope).expect("Should serialize");

    assert_eq!(keys(&json_value), vec!["ok", "engine", "command", "error"]);
    assert_eq!(keys(&json_value["error"]), vec!["code", "message"]);
    assert_eq!(json_value["ok"], false);
}

#[test]
fn test_error_codes_are_stable() {
    let codes = [
        ConsoleError::validation_failed("x").error_code(),
        ConsoleError::connection_failed("x").error_code(),
        ConsoleError::query_failed("x").error_code(),
        ConsoleError::engine_error("mysql", "x").error_code(),
        ConsoleError::config_error("x").error_code(),
        ConsoleError::session_conflict("x").error_code(),
    ];

    assert_eq!(
        codes,
        [
            "VALIDATION_FAILED",
            "CONNECTION_FAILED",
            "QUERY_FAILED",
            "ENGINE_ERROR",
            "CONFIG_ERROR",
            "SESSION_CONFLICT"
        ]
    );
}

// ============================================================================
// Session Shape Tests
// ============================================================================

#[tokio::test]
async fn test_run_envelope_shape() {
    let json_value = run_sqlite("CREATE TABLE t (id INTEGER, label TEXT); INSERT INTO t VALUES (1, 'a'); SELECT * FROM t").await;

    assert_eq!(keys(&json_value["data"]), vec!["session", "queryResultSets", "results"]);

    let session = &json_value["data"]["session"];
    assert_eq!(
        keys(session),
        vec![
            "sessionId",
            "userId",
            "tabId",
            "connectionId",
            "database",
            "sqlText",
            "source",
            "status",
            "errorMessage",
            "startedAt",
            "finishedAt",
            "durationMs",
            "resultSetCount",
            "stopOnError"
        ]
    );
    assert_eq!(session["sessionId"], "fixed-session");
    assert_eq!(session["status"], "success");
    assert_eq!(session["resultSetCount"], 3);

    let select = &json_value["data"]["queryResultSets"][2];
    assert_eq!(
        keys(select),
        vec![
            "setIndex",
            "sqlText",
            "sqlOp",
            "title",
            "columns",
            "rowCount",
            "limited",
            "limit",
            "affectedRows",
            "status",
            "errorMessage",
            "errorCode",
            "errorSqlState",
            "errorMeta",
            "warnings",
            "startedAt",
            "finishedAt",
            "durationMs"
        ]
    );
    assert_eq!(select["sqlOp"], "SELECT");
    assert_eq!(select["title"], "SELECT: SELECT * FROM t LIMIT 10000");
    assert_eq!(select["columns"][0]["name"], "id");

    let row = &json_value["data"]["results"][2][0];
    insta::assert_snapshot!(row.to_string(), @r#"{"id":1,"label":"a"}"#);

    assert_eq!(json_value["meta"]["rows_returned"], 1);
}

#[tokio::test]
async fn test_statement_failure_stays_in_success_envelope() {
    let json_value = run_sqlite("SELECT * FROM nowhere").await;

    assert_eq!(json_value["ok"], true);
    assert_eq!(json_value["data"]["session"]["status"], "error");

    let failed = &json_value["data"]["queryResultSets"][0];
    assert_eq!(failed["status"], "error");
    assert_eq!(failed["rowCount"], 0);
    assert!(failed["columns"].is_null());
    assert_eq!(failed["errorCode"], "1");
    assert_eq!(failed["errorMeta"]["errno"], 1);

    let diagnostic = &json_value["data"]["results"][0][0];
    assert_eq!(keys(diagnostic), vec!["error", "code", "sql"]);
    assert_eq!(diagnostic["error"], "no such table: nowhere");
}

// ============================================================================
// Snapshot Tests (using insta)
// ============================================================================

#[test]
fn test_success_envelope_snapshot() {
    let envelope = SuccessEnvelope::new(
        "",
        "limit",
        serde_json::json!({"sql": "SELECT * FROM users LIMIT 100", "maxRows": 100}),
        Metadata::with_rows(0, 0),
    );

    let json_str = serde_json::to_string(&envelope).expect("Should serialize");
    insta::assert_snapshot!(json_str, @r#"{"ok":true,"engine":"","command":"limit","data":{"sql":"SELECT * FROM users LIMIT 100","maxRows":100},"meta":{"execution_ms":0,"rows_returned":0}}"#);
}

#[test]
fn test_error_envelope_snapshot() {
    let err = ConsoleError::connection_failed("SQLite ping failed: disk I/O error");
    let envelope = ErrorEnvelope::from_error("sqlite", "run", &err);

    let json_str = serde_json::to_string(&envelope).expect("Should serialize");
    insta::assert_snapshot!(json_str, @r#"{"ok":false,"engine":"sqlite","command":"run","error":{"code":"CONNECTION_FAILED","message":"Connection failed: SQLite ping failed: disk I/O error"}}"#);
}
