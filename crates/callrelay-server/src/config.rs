//! Server configuration loading from file and environment variables.

use callrelay_voice::RealtimeConfig;
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    /// Speech engine connection and conversation settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default)]
    pub knowledge: KnowledgeConfig,

    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Host name call-control reaches this server at, used in generated
    /// stream and callback URLs. When unset, the request's `Host` header is used.
    #[serde(default)]
    pub public_host: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "callrelay_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

/// Knowledge-retrieval service settings.
#[derive(Clone, Deserialize)]
pub struct KnowledgeConfig {
    #[serde(default = "default_knowledge_url")]
    pub base_url: String,

    /// Credential used when a call does not carry its own.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Persona text forwarded with every query.
    #[serde(default)]
    pub persona: Option<String>,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    #[serde(default = "default_knowledge_timeout_secs")]
    pub timeout_secs: u64,
}

/// Per-call behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_watchdog_poll_ms")]
    pub watchdog_poll_ms: u64,

    /// Raw 8 kHz mu-law audio played while a function call is in flight.
    #[serde(default)]
    pub filler_audio_path: Option<String>,

    /// Consecutive failed retrievals after which the assistant is told it may
    /// offer a human handoff.
    #[serde(default = "default_max_retrieval_failures")]
    pub max_retrieval_failures: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferBackend {
    #[default]
    Sqlite,
    Memory,
}

/// Transfer State Store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub backend: TransferBackend,

    #[serde(default = "default_db_path")]
    pub database_path: String,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,

    /// Decisions not collected within this many seconds are purged.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    5050
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_knowledge_url() -> String {
    callrelay_knowledge::http::DEFAULT_KNOWLEDGE_URL.to_string()
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_knowledge_timeout_secs() -> u64 {
    20
}

fn default_idle_timeout_secs() -> u64 {
    60
}

fn default_watchdog_poll_ms() -> u64 {
    1_000
}

fn default_max_retrieval_failures() -> u32 {
    3
}

fn default_db_path() -> String {
    "callrelay.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    4
}

fn default_retention_secs() -> u64 {
    3_600
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_host: None,
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

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_knowledge_url(),
            api_key: None,
            persona: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_knowledge_timeout_secs(),
        }
    }
}

impl fmt::Debug for KnowledgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KnowledgeConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("persona", &self.persona)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout_secs(),
            watchdog_poll_ms: default_watchdog_poll_ms(),
            filler_audio_path: None,
            max_retrieval_failures: default_max_retrieval_failures(),
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            backend: TransferBackend::default(),
            database_path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults, then
/// applies environment overrides.
///
/// Environment variable overrides:
/// - `CALLRELAY_HOST` overrides `server.host`
/// - `PORT` overrides `server.port`
/// - `CALLRELAY_PUBLIC_HOST` overrides `server.public_host`
/// - `CALLRELAY_LOG_LEVEL` overrides `logging.level`
/// - `CALLRELAY_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `CALLRELAY_REALTIME_URL` overrides `realtime.url`
/// - `OPENAI_API_KEY` overrides `realtime.api_key`
/// - `CALLRELAY_KNOWLEDGE_URL` overrides `knowledge.base_url`
/// - `CUSTOMGPT_API_KEY` overrides `knowledge.api_key`
/// - `CALLRELAY_IDLE_TIMEOUT_SECS` overrides `session.idle_timeout_secs`
/// - `CALLRELAY_DB_PATH` overrides `transfer.database_path`
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

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

/// Applies overrides from `lookup`, which maps a variable name to its value.
///
/// Blank and unparseable values are ignored.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    if let Some(parsed) = var("CALLRELAY_HOST").and_then(|v| v.parse().ok()) {
        config.server.host = parsed;
    }
    if let Some(parsed) = var("PORT").and_then(|v| v.parse().ok()) {
        config.server.port = parsed;
    }
    if let Some(host) = var("CALLRELAY_PUBLIC_HOST") {
        config.server.public_host = Some(host);
    }
    if let Some(level) = var("CALLRELAY_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(json) = var("CALLRELAY_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Some(url) = var("CALLRELAY_REALTIME_URL") {
        config.realtime.url = url;
    }
    if let Some(key) = var("OPENAI_API_KEY") {
        config.realtime.api_key = key;
    }
    if let Some(url) = var("CALLRELAY_KNOWLEDGE_URL") {
        config.knowledge.base_url = url;
    }
    if let Some(key) = var("CUSTOMGPT_API_KEY") {
        config.knowledge.api_key = Some(key);
    }
    if let Some(parsed) = var("CALLRELAY_IDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
        config.session.idle_timeout_secs = parsed;
    }
    if let Some(path) = var("CALLRELAY_DB_PATH") {
        config.transfer.database_path = path;
    }
}
