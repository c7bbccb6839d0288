//! Configuration management for the intake service.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{IntakeError, Result};

/// Prefix for environment variable overrides, e.g. `INTAKE__SERVER__LISTEN_ADDR`.
const ENV_PREFIX: &str = "INTAKE";

/// Main configuration for the intake service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntakeConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Session configuration
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Request log storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Operator credentials
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upper bound on handling a single request
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_request_timeout() -> u64 {
    15
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Whether admission control runs at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Sustained requests per minute allowed for a single client
    #[serde(default = "default_per_client_rpm")]
    pub per_client_requests_per_minute: u32,

    /// Sustained requests per minute allowed across all clients
    #[serde(default = "default_global_rpm")]
    pub global_requests_per_minute: u32,

    /// Idle bucket eviction interval in seconds
    #[serde(default = "default_limiter_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            per_client_requests_per_minute: default_per_client_rpm(),
            global_requests_per_minute: default_global_rpm(),
            cleanup_interval_secs: default_limiter_cleanup_interval(),
        }
    }
}

impl RateLimitingConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_per_client_rpm() -> u32 {
    100
}

fn default_global_rpm() -> u32 {
    10_000
}

fn default_limiter_cleanup_interval() -> u64 {
    300
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,

    /// Expired session purge interval in seconds
    #[serde(default = "default_session_cleanup_interval")]
    pub cleanup_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl(),
            cleanup_interval_secs: default_session_cleanup_interval(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

fn default_session_ttl() -> u64 {
    24 * 60 * 60
}

fn default_session_cleanup_interval() -> u64 {
    600
}

/// Request log storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Database directory
    #[serde(default = "default_storage_path")]
    pub path: PathBuf,

    /// Retries after the first attempt when storage is contended
    #[serde(default = "default_max_write_retries")]
    pub max_write_retries: u32,

    /// Backoff before the first retry in milliseconds
    #[serde(default = "default_base_backoff")]
    pub base_backoff_ms: u64,

    /// Days to keep request logs; 0 keeps them forever
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Retention pruning interval in seconds
    #[serde(default = "default_retention_interval")]
    pub retention_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
            max_write_retries: default_max_write_retries(),
            base_backoff_ms: default_base_backoff(),
            retention_days: default_retention_days(),
            retention_interval_secs: default_retention_interval(),
        }
    }
}

impl StorageConfig {
    pub fn base_backoff(&self) -> Duration {
        Duration::from_millis(self.base_backoff_ms)
    }

    pub fn retention_interval(&self) -> Duration {
        Duration::from_secs(self.retention_interval_secs)
    }

    /// Age after which records are pruned, if retention is enabled.
    pub fn retention(&self) -> Option<chrono::Duration> {
        (self.retention_days > 0).then(|| chrono::Duration::days(i64::from(self.retention_days)))
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("data/requests.db")
}

fn default_max_write_retries() -> u32 {
    3
}

fn default_base_backoff() -> u64 {
    10
}

fn default_retention_days() -> u32 {
    30
}

fn default_retention_interval() -> u64 {
    3600
}

/// Operator credentials protecting login and statistics.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

impl AuthConfig {
    /// Username and password, when both are set and non-empty.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => Some((user, pass)),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IntakeConfig {
    /// Parse configuration from YAML.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        serde_yaml::from_str(contents).map_err(|e| IntakeError::Config(e.to_string()))
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from an optional file, overridden by
    /// `INTAKE__<SECTION>__<KEY>` environment variables.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| IntakeError::Config(e.to_string()))
    }

    /// Reject settings that would make the service misbehave.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            (self.server.request_timeout_secs == 0, "server.request_timeout_secs"),
            (
                self.rate_limiting.per_client_requests_per_minute == 0,
                "rate_limiting.per_client_requests_per_minute",
            ),
            (
                self.rate_limiting.global_requests_per_minute == 0,
                "rate_limiting.global_requests_per_minute",
            ),
            (
                self.rate_limiting.cleanup_interval_secs == 0,
                "rate_limiting.cleanup_interval_secs",
            ),
            (self.sessions.ttl_secs == 0, "sessions.ttl_secs"),
            (
                self.sessions.cleanup_interval_secs == 0,
                "sessions.cleanup_interval_secs",
            ),
            (
                self.storage.retention_interval_secs == 0,
                "storage.retention_interval_secs",
            ),
        ];

        for (invalid, field) in checks {
            if invalid {
                return Err(IntakeError::Config(format!("{} must be greater than zero", field)));
            }
        }

        if self.auth.username.is_some() != self.auth.password.is_some() {
            return Err(IntakeError::Config(
                "auth.username and auth.password must be set together".to_string(),
            ));
        }

        Ok(())
    }
}
