//! Environment-driven configuration.
//!
//! Every knob has a default; a value that is present but unparseable is a
//! startup failure rather than a silent fallback.

use anyhow::{bail, Context};
use std::path::PathBuf;
use tracing::Level;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: Level,
    /// Request body cap in KiB; larger bodies are rejected with 413.
    pub max_body_kb: usize,
    pub initialization_json_path: Option<PathBuf>,
    pub watch_initialization_json: bool,
    pub persist_expectations: bool,
    pub persisted_expectations_path: PathBuf,
    pub forward_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "0.0.0.0".to_string(),
            port: 1080,
            log_level: Level::INFO,
            max_body_kb: 8192,
            initialization_json_path: None,
            watch_initialization_json: false,
            persist_expectations: true,
            persisted_expectations_path: PathBuf::from("./data/expectations.json"),
            forward_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Read configuration from the environment, falling back to defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Config::default();
        Ok(Config {
            host: env_string("HOST").unwrap_or(defaults.host),
            port: env_parsed("PORT")?.unwrap_or(defaults.port),
            log_level: match env_string("LOG_LEVEL") {
                Some(level) => parse_log_level(&level)?,
                None => defaults.log_level,
            },
            max_body_kb: env_parsed("MAX_HEADER_SIZE_KB")?.unwrap_or(defaults.max_body_kb),
            initialization_json_path: env_string("INITIALIZATION_JSON_PATH").map(PathBuf::from),
            watch_initialization_json: env_parsed("WATCH_INITIALIZATION_JSON")?
                .unwrap_or(defaults.watch_initialization_json),
            persist_expectations: env_parsed("PERSIST_EXPECTATIONS")?
                .unwrap_or(defaults.persist_expectations),
            persisted_expectations_path: env_string("PERSISTED_EXPECTATIONS_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.persisted_expectations_path),
            forward_timeout_secs: env_parsed("FORWARD_TIMEOUT_SECS")?
                .unwrap_or(defaults.forward_timeout_secs),
        })
    }

    pub fn max_body_bytes(&self) -> usize {
        self.max_body_kb.saturating_mul(1024)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parsed<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_string(name) {
        Some(raw) => raw
            .parse()
            .map(Some)
            .with_context(|| format!("invalid value for {name}: {raw}")),
        None => Ok(None),
    }
}

pub fn parse_log_level(raw: &str) -> anyhow::Result<Level> {
    match raw.to_lowercase().as_str() {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        other => bail!("invalid LOG_LEVEL: {other}"),
    }
}
