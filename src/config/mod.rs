//! Configuration Management
//!
//! This module handles loading and saving named connections and execution
//! settings.
//!
//! # Configuration Locations
//! - Local: `.sqlconsole/config.json` (team-shareable, per-project)
//! - Global: `<config_dir>/sqlconsole/config.json` (per-user)
//!
//! # Resolution Precedence
//! 1. Explicit CLI parameters (highest priority)
//! 2. Local config file
//! 3. Global config file
//!
//! Connections merge by id with the local entry winning; `default` and
//! `execution` from the local file replace the global ones.
//!
//! # File format
//! ```json
//! {
//!   "connections": {
//!     "local": { "engine": "sqlite", "file": "./dev.db" },
//!     "staging": { "engine": "postgres", "host": "db", "port": 5432,
//!                  "user": "app", "password_env": "STAGING_PW" }
//!   },
//!   "default": "local",
//!   "execution": { "max_rows": 5000, "stop_on_error": false }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::engine::ConnectionConfig;
use crate::error::{ConsoleError, Result};
use crate::orchestrator::ExecutionSettings;

/// Directory name used for both config locations
const CONFIG_DIR: &str = ".sqlconsole";
const APP_DIR: &str = "sqlconsole";
const CONFIG_FILE: &str = "config.json";

/// Contents of one config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsoleConfig {
    /// Named connections
    #[serde(default)]
    pub connections: BTreeMap<String, StoredConnection>,

    /// Id of the connection used when none is named
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSettings>,
}

impl ConsoleConfig {
    /// Look up a connection by id, or the default one
    ///
    /// Returns the connection id together with the resolved config.
    pub fn resolve(&self, name: Option<&str>) -> Result<(String, ConnectionConfig)> {
        let conn_name = match name {
            Some(n) => n.to_string(),
            None => self.default.clone().ok_or_else(|| {
                let available: Vec<_> = self.connections.keys().collect();
                ConsoleError::config_error(format!(
                    "No default connection set. Available connections: {available:?}. \
                     Specify one with --name or set a default in the config."
                ))
            })?,
        };

        let stored = self.connections.get(&conn_name).ok_or_else(|| {
            let available: Vec<_> = self.connections.keys().collect();
            ConsoleError::config_error(format!(
                "Connection '{conn_name}' not found. Available connections: {available:?}"
            ))
        })?;

        Ok((conn_name, stored.resolve()?))
    }
}

/// Stored connection configuration
///
/// Similar to `ConnectionConfig` but supports environment variable references
/// for sensitive fields like passwords.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredConnection {
    /// Connection configuration
    #[serde(flatten)]
    pub config: ConnectionConfig,

    /// Environment variable name for password (if not storing password directly)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,
}

impl StoredConnection {
    /// Resolve environment variables and return a `ConnectionConfig`
    pub fn resolve(&self) -> Result<ConnectionConfig> {
        let mut config = self.config.clone();

        if let Some(env_var) = &self.password_env {
            let password = std::env::var(env_var).map_err(|_| {
                ConsoleError::config_error(format!("Environment variable {env_var} not found for password"))
            })?;
            config.password = Some(password);
        }

        Ok(config)
    }
}

/// Configuration file location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigLocation {
    /// Local config: `.sqlconsole/config.json` (team-shareable)
    Local,
    /// Global config: `<config_dir>/sqlconsole/config.json` (per-user)
    Global,
}

/// Get path to local config file (`.sqlconsole/config.json`)
pub fn local_config_path() -> Result<PathBuf> {
    let current_dir = std::env::current_dir().map_err(|e| {
        ConsoleError::config_error(format!("Could not determine current directory: {e}"))
    })?;

    Ok(current_dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Get path to global config file (`<config_dir>/sqlconsole/config.json`)
pub fn global_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConsoleError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join(APP_DIR).join(CONFIG_FILE))
}

/// Load one config file; a missing file is an empty config
pub fn load_config(path: &Path) -> Result<ConsoleConfig> {
    if !path.exists() {
        return Ok(ConsoleConfig::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ConsoleError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str(&contents).map_err(|e| {
        ConsoleError::config_error(format!("Invalid config file format in {}: {e}", path.display()))
    })
}

/// Write one config file, creating its directory
pub fn save_config(path: &Path, config: &ConsoleConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            ConsoleError::config_error(format!("Could not create config directory: {e}"))
        })?;
    }

    let contents = serde_json::to_string_pretty(config)
        .map_err(|e| ConsoleError::config_error(format!("Could not serialize config: {e}")))?;

    fs::write(path, contents)
        .map_err(|e| ConsoleError::config_error(format!("Could not write config file: {e}")))
}

/// Overlay `local` on top of `global`
#[must_use]
pub fn merge(global: ConsoleConfig, local: ConsoleConfig) -> ConsoleConfig {
    let mut merged = global;

    merged.connections.extend(local.connections);
    if local.default.is_some() {
        merged.default = local.default;
    }
    if local.execution.is_some() {
        merged.execution = local.execution;
    }

    merged
}

/// Load the merged view of the global and local config files
pub fn load_with_precedence() -> Result<ConsoleConfig> {
    let global = load_config(&global_config_path()?)?;
    let local = load_config(&local_config_path()?)?;
    Ok(merge(global, local))
}

/// Resolve a connection by id (or the default) from the merged config
pub fn resolve_connection(name: Option<&str>) -> Result<(String, ConnectionConfig)> {
    load_with_precedence()?.resolve(name)
}

/// Save a connection to a config file
///
/// The first connection saved to a file becomes its default.
pub fn save_connection(
    name: Option<String>,
    config: ConnectionConfig,
    password_env: Option<String>,
    location: ConfigLocation,
) -> Result<PathBuf> {
    let config_path = match location {
        ConfigLocation::Local => local_config_path()?,
        ConfigLocation::Global => global_config_path()?,
    };

    save_connection_to(&config_path, name, config, password_env)?;
    Ok(config_path)
}

fn save_connection_to(
    path: &Path,
    name: Option<String>,
    mut config: ConnectionConfig,
    password_env: Option<String>,
) -> Result<()> {
    let conn_name = name.unwrap_or_else(|| "default".to_string());
    let mut file = load_config(path)?;

    // Never store a literal password next to an env reference
    if password_env.is_some() {
        config.password = None;
    }

    if file.connections.is_empty() {
        file.default = Some(conn_name.clone());
    }
    file.connections.insert(conn_name, StoredConnection { config, password_env });

    save_config(path, &file)
}

/// List all available connections from the merged config
///
/// Connections whose password cannot be resolved are skipped.
pub fn list_connections() -> Result<Vec<(String, ConnectionConfig)>> {
    Ok(resolvable_connections(&load_with_precedence()?))
}

fn resolvable_connections(config: &ConsoleConfig) -> Vec<(String, ConnectionConfig)> {
    config
        .connections
        .iter()
        .filter_map(|(conn_name, stored)| match stored.resolve() {
            Ok(resolved) => Some((conn_name.clone(), resolved)),
            Err(_) => {
                // Error details are not logged to prevent credential leakage
                tracing::warn!(connection = %conn_name, "could not resolve connection");
                None
            }
        })
        .collect()
}

/// Execution settings from the merged config, or the defaults
pub fn execution_settings() -> Result<ExecutionSettings> {
    Ok(load_with_precedence()?.execution.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::DatabaseType;
    use pretty_assertions::assert_eq;

    fn stored(config: ConnectionConfig) -> StoredConnection {
        StoredConnection { config, password_env: None }
    }

    fn pg(host: &str) -> ConnectionConfig {
        ConnectionConfig::postgres(
            host.to_string(),
            5432,
            "user".to_string(),
            "pass".to_string(),
            "db".to_string(),
        )
    }

    fn temp_config_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("sqlconsole-config-{}", uuid::Uuid::new_v4()))
            .join(CONFIG_FILE)
    }

    #[test]
    fn test_config_serialization() {
        let mut config = ConsoleConfig::default();
        config.connections.insert("test".to_string(), stored(pg("localhost")));
        config.default = Some("test".to_string());

        let json = serde_json::to_string_pretty(&config).unwrap();
        assert!(json.contains(r#""engine": "postgres""#));
        assert!(json.contains(r#""default": "test""#));
        assert!(!json.contains("execution"));
    }

    #[test]
    fn test_parse_with_execution_settings() {
        let config: ConsoleConfig = serde_json::from_str(
            r#"{
                "connections": { "dev": { "engine": "sqlite", "file": "./dev.db" } },
                "default": "dev",
                "execution": { "max_rows": 5000, "stop_on_error": false }
            }"#,
        )
        .unwrap();

        let execution = config.execution.unwrap();
        assert_eq!(execution.max_rows, Some(5000));
        assert!(!execution.stop_on_error);
        assert_eq!(execution.max_statements, 100);
        assert_eq!(config.connections["dev"].config.engine, DatabaseType::SQLite);
    }

    #[test]
    fn test_stored_connection_resolve_direct_password() {
        let resolved = stored(pg("localhost")).resolve().unwrap();
        assert_eq!(resolved.password, Some("pass".to_string()));
    }

    #[test]
    fn test_stored_connection_resolve_env_var() {
        std::env::set_var("SQLCONSOLE_TEST_PASSWORD", "secret");

        let mut config = pg("localhost");
        config.password = None;
        let stored = StoredConnection { config, password_env: Some("SQLCONSOLE_TEST_PASSWORD".to_string()) };

        assert_eq!(stored.resolve().unwrap().password, Some("secret".to_string()));
        std::env::remove_var("SQLCONSOLE_TEST_PASSWORD");
    }

    #[test]
    fn test_stored_connection_resolve_missing_env_var() {
        let stored = StoredConnection { config: pg("localhost"), password_env: Some("NONEXISTENT_VAR".to_string()) };

        let result = stored.resolve();
        assert!(result.is_err());
        assert!(result.unwrap_err().message().contains("Environment variable NONEXISTENT_VAR not found"));
    }

    #[test]
    fn test_merge_local_overrides_global() {
        let mut global = ConsoleConfig::default();
        global.connections.insert("shared".to_string(), stored(pg("global-host")));
        global.connections.insert("global-only".to_string(), stored(pg("g")));
        global.default = Some("global-only".to_string());
        global.execution = Some(ExecutionSettings { max_rows: Some(1), ..Default::default() });

        let mut local = ConsoleConfig::default();
        local.connections.insert("shared".to_string(), stored(pg("local-host")));
        local.default = Some("shared".to_string());

        let merged = merge(global, local);
        assert_eq!(merged.connections.len(), 2);
        assert_eq!(merged.connections["shared"].config.host.as_deref(), Some("local-host"));
        assert_eq!(merged.default.as_deref(), Some("shared"));
        // Local has no execution block, so the global one survives
        assert_eq!(merged.execution.unwrap().max_rows, Some(1));
    }

    #[test]
    fn test_resolve_default_and_named() {
        let mut config = ConsoleConfig::default();
        config.connections.insert("a".to_string(), stored(pg("host-a")));
        config.connections.insert("b".to_string(), stored(pg("host-b")));
        config.default = Some("a".to_string());

        let (name, resolved) = config.resolve(None).unwrap();
        assert_eq!(name, "a");
        assert_eq!(resolved.host.as_deref(), Some("host-a"));

        let (name, _) = config.resolve(Some("b")).unwrap();
        assert_eq!(name, "b");

        let err = config.resolve(Some("c")).unwrap_err();
        assert!(err.message().contains("Connection 'c' not found"));
    }

    #[test]
    fn test_resolve_without_default() {
        let mut config = ConsoleConfig::default();
        config.connections.insert("a".to_string(), stored(pg("host-a")));

        let err = config.resolve(None).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");
        assert!(err.message().contains("No default connection set"));
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let config = load_config(&temp_config_path()).unwrap();
        assert!(config.connections.is_empty());
        assert!(config.default.is_none());
    }

    #[test]
    fn test_save_connection_sets_first_default() {
        let path = temp_config_path();

        save_connection_to(&path, Some("first".to_string()), pg("h1"), None).unwrap();
        save_connection_to(&path, Some("second".to_string()), pg("h2"), Some("PG_PW".to_string())).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.default.as_deref(), Some("first"));
        assert_eq!(loaded.connections.len(), 2);
        assert_eq!(loaded.connections["second"].password_env.as_deref(), Some("PG_PW"));
        assert_eq!(loaded.connections["second"].config.password, None);

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let path = temp_config_path();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{ not json").unwrap();

        let err = load_config(&path).unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_ERROR");

        fs::remove_dir_all(path.parent().unwrap()).unwrap();
    }

    #[test]
    fn test_unresolvable_connections_are_skipped() {
        let mut config = ConsoleConfig::default();
        config.connections.insert("ok".to_string(), stored(pg("h")));
        config.connections.insert(
            "broken".to_string(),
            StoredConnection { config: pg("h"), password_env: Some("SQLCONSOLE_MISSING_VAR".to_string()) },
        );

        let listed = resolvable_connections(&config);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].0, "ok");
    }
}
