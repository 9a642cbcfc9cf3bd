//! CLI configuration loading from file and environment variables.

use serde::Deserialize;
use tessera_db::DbSettings;
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Prefix prepended to every entity table name.
    #[serde(default)]
    pub table_prefix: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// How long the connection is trusted between liveness checks, in
    /// milliseconds.
    #[serde(default = "default_liveness_window_ms")]
    pub liveness_window_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "tessera_db=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_db_path() -> String {
    DbSettings::default().path
}

fn default_busy_timeout_ms() -> u64 {
    DbSettings::default().busy_timeout_ms
}

fn default_liveness_window_ms() -> u64 {
    DbSettings::default().liveness_window_ms
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            table_prefix: String::new(),
            busy_timeout_ms: default_busy_timeout_ms(),
            liveness_window_ms: default_liveness_window_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl DatabaseConfig {
    /// Engine settings for this configuration.
    pub fn settings(&self) -> DbSettings {
        DbSettings {
            path: self.path.clone(),
            table_prefix: self.table_prefix.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            liveness_window_ms: self.liveness_window_ms,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `TESSERA_DB_PATH` overrides `database.path`
/// - `TESSERA_TABLE_PREFIX` overrides `database.table_prefix`
/// - `TESSERA_LOG_LEVEL` overrides `logging.level`
/// - `TESSERA_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    apply_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(db_path) = var("TESSERA_DB_PATH") {
        config.database.path = db_path;
    }
    if let Some(prefix) = var("TESSERA_TABLE_PREFIX") {
        config.database.table_prefix = prefix;
    }
    if let Some(level) = var("TESSERA_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("TESSERA_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
}
