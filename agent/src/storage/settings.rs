//! Settings file management

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::errors::AgentError;
use crate::filesys::file::File;
use crate::logs::LogLevel;

/// Prefix of environment variables that override settings
pub const ENV_PREFIX: &str = "DEPLOY_AGENT_";

/// Agent settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON formatted logs
    #[serde(default)]
    pub log_json: bool,

    /// Host ports handed out to deployments
    #[serde(default)]
    pub port_range: PortRangeSettings,

    /// Host address container ports are published on
    #[serde(default = "default_bind_host")]
    pub bind_host: String,

    /// Container configuration
    #[serde(default)]
    pub container: ContainerSettings,

    /// Health check defaults
    #[serde(default)]
    pub health: HealthSettings,

    /// Git configuration
    #[serde(default)]
    pub git: GitSettings,

    /// Local HTTP API configuration
    #[serde(default)]
    pub server: ServerSettings,
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            port_range: PortRangeSettings::default(),
            bind_host: default_bind_host(),
            container: ContainerSettings::default(),
            health: HealthSettings::default(),
            git: GitSettings::default(),
            server: ServerSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from `file` if present, apply environment overrides and
    /// validate the result.
    pub async fn load(file: &File) -> Result<Self, AgentError> {
        let mut settings = match file.read_json_opt::<Settings>().await {
            Ok(Some(settings)) => {
                info!("Loaded settings from {}", file.path().display());
                settings
            }
            Ok(None) => {
                debug!("No settings file at {}, using defaults", file.path().display());
                Settings::default()
            }
            Err(e) => {
                return Err(AgentError::ConfigError(format!(
                    "Failed to read {}: {}",
                    file.path().display(),
                    e
                )))
            }
        };

        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `DEPLOY_AGENT_*` overrides read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), AgentError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(value) = var("LOG_LEVEL") {
            self.log_level = value.parse().map_err(AgentError::ConfigError)?;
        }
        if let Some(value) = var("LOG_JSON") {
            self.log_json = parse_env("LOG_JSON", &value)?;
        }
        if let Some(value) = var("PORT_RANGE_START") {
            self.port_range.start = parse_env("PORT_RANGE_START", &value)?;
        }
        if let Some(value) = var("PORT_RANGE_END") {
            self.port_range.end = parse_env("PORT_RANGE_END", &value)?;
        }
        if let Some(value) = var("HEALTH_TIMEOUT") {
            self.health.timeout_secs = parse_env("HEALTH_TIMEOUT", &value)?;
        }
        if let Some(value) = var("GIT_TOKEN") {
            if !value.is_empty() {
                self.git.token = Some(SecretString::from(value));
            }
        }
        if let Some(value) = var("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &value)?;
        }
        Ok(())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), AgentError> {
        let range = &self.port_range;
        if range.start < 1024 {
            return Err(AgentError::ConfigError(format!(
                "port_range.start must be at least 1024, got {}",
                range.start
            )));
        }
        if range.start >= range.end {
            return Err(AgentError::ConfigError(format!(
                "port_range.start ({}) must be below port_range.end ({})",
                range.start, range.end
            )));
        }
        if self.container.default_port == 0 {
            return Err(AgentError::ConfigError(
                "container.default_port must be positive".to_string(),
            ));
        }

        let health = &self.health;
        if health.timeout_secs == 0 {
            return Err(AgentError::ConfigError(
                "health.timeout_secs must be positive".to_string(),
            ));
        }
        if !(health.initial_interval_secs > 0.0) {
            return Err(AgentError::ConfigError(
                "health.initial_interval_secs must be positive".to_string(),
            ));
        }
        if !(health.backoff_multiplier >= 1.0) {
            return Err(AgentError::ConfigError(
                "health.backoff_multiplier must be at least 1.0".to_string(),
            ));
        }
        if health.probe_timeout_secs == 0 {
            return Err(AgentError::ConfigError(
                "health.probe_timeout_secs must be positive".to_string(),
            ));
        }
        if !(100..=599).contains(&health.expected_status) {
            return Err(AgentError::ConfigError(format!(
                "health.expected_status {} is not an HTTP status",
                health.expected_status
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, AgentError> {
    value.trim().parse().map_err(|_| {
        AgentError::ConfigError(format!("Invalid value for {}{}: {}", ENV_PREFIX, name, value))
    })
}

/// Half-open host port range `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRangeSettings {
    #[serde(default = "default_port_start")]
    pub start: u16,

    #[serde(default = "default_port_end")]
    pub end: u16,
}

fn default_port_start() -> u16 {
    8000
}

fn default_port_end() -> u16 {
    9000
}

impl Default for PortRangeSettings {
    fn default() -> Self {
        Self {
            start: default_port_start(),
            end: default_port_end(),
        }
    }
}

/// Container settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSettings {
    /// Port the application listens on inside the container
    #[serde(default = "default_container_port")]
    pub default_port: u16,

    /// Memory limit passed to the runtime
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
}

fn default_container_port() -> u16 {
    8000
}

fn default_memory_limit() -> String {
    "512m".to_string()
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            default_port: default_container_port(),
            memory_limit: default_memory_limit(),
        }
    }
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSettings {
    #[serde(default = "default_health_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_initial_interval")]
    pub initial_interval_secs: f64,

    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_expected_status")]
    pub expected_status: u16,

    /// Timeout of a single probe request
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Path probed on the deployment
    #[serde(default = "default_health_path")]
    pub path: String,
}

fn default_health_timeout() -> u64 {
    30
}

fn default_initial_interval() -> f64 {
    2.0
}

fn default_backoff() -> f64 {
    1.5
}

fn default_expected_status() -> u16 {
    200
}

fn default_probe_timeout() -> u64 {
    5
}

fn default_health_path() -> String {
    "/".to_string()
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_health_timeout(),
            initial_interval_secs: default_initial_interval(),
            backoff_multiplier: default_backoff(),
            expected_status: default_expected_status(),
            probe_timeout_secs: default_probe_timeout(),
            path: default_health_path(),
        }
    }
}

/// Git settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Hosts repositories may be cloned from
    #[serde(default = "default_allowed_hosts")]
    pub allowed_hosts: Vec<String>,

    /// Access token for private GitHub repositories
    #[serde(default, skip_serializing, deserialize_with = "deserialize_secret")]
    pub token: Option<SecretString>,
}

fn default_allowed_hosts() -> Vec<String> {
    vec!["github.com".to_string(), "gitlab.com".to_string()]
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()).map(SecretString::from))
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            allowed_hosts: default_allowed_hosts(),
            token: None,
        }
    }
}

/// Local HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_server_host")]
    pub host: String,

    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    7700
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}
