//! Tessera command-line client.
//!
//! Runs one raw SQL statement against the configured database and prints
//! the result:
//!
//! ```text
//! tessera [--config <path>] <sql> [param ...]
//! ```
//!
//! Row-returning statements print one tab-separated line per row; other
//! statements print the number of rows changed. Parameters bind to `?`
//! placeholders left to right: integers and reals bind as numbers, `null`
//! binds SQL null, anything else binds as text.

mod config;

use std::process::ExitCode;

use rusqlite::types::Value;
use tessera_db::{Db, DbError};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG_PATH: &str = "tessera.toml";

#[derive(Debug, Error)]
enum CliError {
    #[error("usage: tessera [--config <path>] <sql> [param ...]")]
    Usage,

    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, PartialEq)]
struct Invocation {
    config_path: Option<String>,
    sql: String,
    params: Vec<Value>,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Invocation, CliError> {
    let mut args = args.into_iter();
    let mut config_path = None;
    let mut positional = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--config" {
            config_path = Some(args.next().ok_or(CliError::Usage)?);
        } else {
            positional.push(arg);
        }
    }

    let mut positional = positional.into_iter();
    let sql = positional
        .next()
        .filter(|sql| !sql.trim().is_empty())
        .ok_or(CliError::Usage)?;
    Ok(Invocation {
        config_path: config_path.filter(|path| !path.trim().is_empty()),
        sql,
        params: positional.map(|raw| parse_param(&raw)).collect(),
    })
}

fn parse_param(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("null") {
        Value::Null
    } else if let Ok(int) = raw.parse::<i64>() {
        Value::Integer(int)
    } else if let Ok(real) = raw.parse::<f64>() {
        Value::Real(real)
    } else {
        Value::Text(raw.to_string())
    }
}

fn resolve_config_path(cli: Option<&str>) -> (String, &'static str) {
    if let Some(path) = cli {
        return (path.to_string(), "cli-arg");
    }

    if let Ok(path) = std::env::var("TESSERA_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (path, "env-var");
        }
    }

    (DEFAULT_CONFIG_PATH.to_string(), "default")
}

fn returns_rows(sql: &str) -> bool {
    let keyword = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(keyword.as_str(), "SELECT" | "WITH" | "PRAGMA" | "VALUES" | "EXPLAIN")
}

fn render(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(int) => int.to_string(),
        Value::Real(real) => real.to_string(),
        Value::Text(text) => text.clone(),
        Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

fn run(invocation: &Invocation, db: &Db) -> Result<(), CliError> {
    if returns_rows(&invocation.sql) {
        let rows = db.custom_query(&invocation.sql, &invocation.params, |row| {
            let width = row.as_ref().column_count();
            (0..width)
                .map(|i| row.get::<_, Value>(i).map(|v| render(&v)))
                .collect::<rusqlite::Result<Vec<String>>>()
        })?;
        for row in &rows {
            println!("{}", row.join("\t"));
        }
        tracing::info!(rows = rows.len(), "query finished");
    } else {
        let changed = db.custom_update(&invocation.sql, &invocation.params)?;
        println!("{changed} row(s) changed");
    }
    Ok(())
}

fn main() -> ExitCode {
    let invocation = match parse_args(std::env::args().skip(1)) {
        Ok(invocation) => invocation,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(2);
        }
    };

    let (config_path, config_source) = resolve_config_path(invocation.config_path.as_deref());
    let config = match config::load_config(Some(&config_path)) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    tracing::info!(
        source = config_source,
        path = %config_path,
        "resolved startup configuration path"
    );

    let result = Db::open(&config.database.settings())
        .map_err(CliError::from)
        .and_then(|db| run(&invocation, &db));
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "statement failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
