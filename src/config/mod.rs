//! Configuration management module
//!
//! Handles loading and validating application configuration from environment
//! variables. Uses the `config` crate with `dotenvy` for .env file support.

use config::{Config, ConfigError, Environment as ConfigEnvironment};
use serde::Deserialize;
use std::env;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Configuration loading error: {0}")]
    LoadError(#[from] ConfigError),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Environment types
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Staging => "staging",
            Environment::Production => "production",
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for Environment {
    fn from(s: String) -> Self {
        match s.to_lowercase().as_str() {
            "production" => Environment::Production,
            "staging" => Environment::Staging,
            _ => Environment::Development,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Allowed CORS origins, comma-separated in the environment
    #[serde(default)]
    pub cors_origins: Option<String>,
}

fn default_port() -> u16 {
    4010
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            log_level: default_log_level(),
            cors_origins: None,
        }
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgresql://localhost:5432/survey_runtime".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout_secs: default_connection_timeout(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
        }
    }
}

/// SMTP email configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SmtpConfig {
    pub host: Option<String>,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    pub username: Option<String>,

    pub password: Option<String>,

    #[serde(default = "default_smtp_from")]
    pub from_address: String,
}

fn default_smtp_port() -> u16 {
    587
}

fn default_smtp_from() -> String {
    "no-reply@surveys.example.com".to_string()
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some() && self.username.is_some() && self.password.is_some()
    }
}

/// VPN/geo lookup service configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct VpnLookupConfig {
    /// Endpoint receiving `?ip=<addr>`; JSON response `{ "isVpn": bool,
    /// "country": "XX" }`
    pub endpoint: Option<String>,

    #[serde(default = "default_vpn_timeout")]
    pub timeout_secs: u64,
}

fn default_vpn_timeout() -> u64 {
    2
}

impl VpnLookupConfig {
    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }
}

/// Runtime tunables for background jobs and caches
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    /// Outbox relay poll interval in milliseconds
    #[serde(default = "default_outbox_poll_ms")]
    pub outbox_poll_interval_ms: u64,

    /// Outbox rows fetched per relay tick
    #[serde(default = "default_outbox_batch")]
    pub outbox_batch_size: i64,

    /// Expired-reservation sweep interval in seconds
    #[serde(default = "default_reservation_sweep_secs")]
    pub reservation_sweep_interval_secs: u64,

    /// Stale-session closer interval in seconds
    #[serde(default = "default_session_sweep_secs")]
    pub session_sweep_interval_secs: u64,

    /// Default TTL in hours for abandoning inactive sessions when the survey
    /// does not configure its own
    #[serde(default = "default_session_ttl_hours")]
    pub default_incomplete_ttl_hours: u32,

    /// Survey definition cache TTL in seconds
    #[serde(default = "default_definition_cache_secs")]
    pub definition_cache_ttl_secs: u64,

    /// Bounded retries for serialization conflicts before surfacing 409
    #[serde(default = "default_conflict_retries")]
    pub conflict_retries: u32,
}

fn default_outbox_poll_ms() -> u64 {
    500
}

fn default_outbox_batch() -> i64 {
    100
}

fn default_reservation_sweep_secs() -> u64 {
    60
}

fn default_session_sweep_secs() -> u64 {
    300
}

fn default_session_ttl_hours() -> u32 {
    72
}

fn default_definition_cache_secs() -> u64 {
    600
}

fn default_conflict_retries() -> u32 {
    3
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            outbox_poll_interval_ms: default_outbox_poll_ms(),
            outbox_batch_size: default_outbox_batch(),
            reservation_sweep_interval_secs: default_reservation_sweep_secs(),
            session_sweep_interval_secs: default_session_sweep_secs(),
            default_incomplete_ttl_hours: default_session_ttl_hours(),
            definition_cache_ttl_secs: default_definition_cache_secs(),
            conflict_retries: default_conflict_retries(),
        }
    }
}

/// Top-level application settings
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: Environment,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    #[serde(default)]
    pub vpn_lookup: VpnLookupConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,
}

impl Settings {
    /// Load settings from environment variables with `SURVEY_` prefix and
    /// `__` as the nesting separator (e.g. `SURVEY_DATABASE__URL`).
    pub fn new() -> Result<Self, ConfigurationError> {
        let environment = env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let settings: Settings = Config::builder()
            .set_default("environment", environment)?
            .add_source(
                ConfigEnvironment::with_prefix("SURVEY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::ValidationError(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if self.runtime.outbox_batch_size <= 0 {
            return Err(ConfigurationError::ValidationError(
                "runtime.outbox_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    pub fn is_development(&self) -> bool {
        self.environment == Environment::Development
    }

    /// Allowed CORS origins; localhost defaults in development
    pub fn cors_origins(&self) -> Vec<String> {
        match &self.server.cors_origins {
            Some(raw) => raw
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            None => vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}
