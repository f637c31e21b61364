//! Client settings.
//!
//! Settings are loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML file named by EVSTORE_CONFIG
//! 3. Environment variables

use crate::connection::{ConnectionConfig, TlsClientConfig, DEFAULT_READ_BUFFER_SIZE};
use crate::dispatcher::{RetryPolicy, DEFAULT_MAX_RETRIES};
use crate::subscription::DEFAULT_MAX_LIVE_QUEUE_SIZE;
use evstore_protocol::{Credentials, DEFAULT_PORT};
use serde::{Deserialize, Serialize};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Layered client settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub connection: ConnectionSettings,
    pub credentials: Option<CredentialSettings>,
    pub retry: RetrySettings,
    pub heartbeat: HeartbeatSettings,
    pub reconnect: ReconnectSettings,
    pub subscription: SubscriptionSettings,
    pub tls: TlsSettings,
}

impl ClientSettings {
    /// Loads settings from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match std::env::var("EVSTORE_CONFIG") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        settings.apply_env_overrides();
        Ok(settings)
    }

    /// Loads settings from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    /// Saves settings to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_env_overrides_with(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `get`, which maps a variable name to its value.
    pub fn apply_env_overrides_with<F>(&mut self, get: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = get("EVSTORE_ENDPOINT") {
            self.connection.endpoint = endpoint;
        }
        if let Some(name) = get("EVSTORE_CONNECTION_NAME") {
            self.connection.name = Some(name);
        }
        if let Some(ms) = get("EVSTORE_OPERATION_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.connection.operation_timeout_ms = ms;
        }

        let username = get("EVSTORE_USERNAME");
        let password = get("EVSTORE_PASSWORD");
        if username.is_some() || password.is_some() {
            let current = self.credentials.take().unwrap_or_default();
            self.credentials = Some(CredentialSettings {
                username: username.unwrap_or(current.username),
                password: password.unwrap_or(current.password),
            });
        }

        if let Some(max) = get("EVSTORE_MAX_RETRIES") {
            match max.to_lowercase().as_str() {
                "none" | "unlimited" => self.retry.max_retries = None,
                value => {
                    if let Ok(n) = value.parse() {
                        self.retry.max_retries = Some(n);
                    }
                }
            }
        }
        if let Some(n) = get("EVSTORE_MAX_RECONNECTIONS").and_then(|v| v.parse().ok()) {
            self.reconnect.max_reconnections = n;
        }

        if let Some(enabled) = get("EVSTORE_TLS") {
            self.tls.enabled = parse_flag(&enabled);
        }
        if let Some(path) = get("EVSTORE_TLS_CA_CERT") {
            self.tls.ca_cert_path = Some(PathBuf::from(path));
            self.tls.enabled = true;
        }
        if let Some(insecure) = get("EVSTORE_TLS_INSECURE") {
            self.tls.insecure = parse_flag(&insecure);
        }
    }

    /// Validates the settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.endpoint.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "connection.endpoint is empty".to_string(),
            ));
        }
        if self.connection.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connection.connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.connection.operation_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connection.operation_timeout_ms must be positive".to_string(),
            ));
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "heartbeat interval and timeout must be positive".to_string(),
            ));
        }
        if self.subscription.max_live_queue_size == 0 {
            return Err(ConfigError::ValidationError(
                "subscription.max_live_queue_size must be positive".to_string(),
            ));
        }
        if self.subscription.read_batch_size <= 0 {
            return Err(ConfigError::ValidationError(
                "subscription.read_batch_size must be positive".to_string(),
            ));
        }
        if let Some(credentials) = &self.credentials {
            credentials.to_credentials()?;
        }
        self.tls.validate()
    }

    /// Produces the connection configuration these settings describe.
    pub fn connection_config(&self) -> Result<ConnectionConfig, ConfigError> {
        self.validate()?;

        let mut config = ConnectionConfig::new(self.connection.resolve()?)
            .with_connect_timeout(Duration::from_millis(self.connection.connect_timeout_ms))
            .with_operation_timeout(Duration::from_millis(self.connection.operation_timeout_ms))
            .with_read_buffer_size(self.connection.read_buffer_size)
            .with_require_master(self.connection.require_master)
            .with_heartbeat(
                Duration::from_millis(self.heartbeat.interval_ms),
                Duration::from_millis(self.heartbeat.timeout_ms),
            )
            .with_retry_policy(self.retry.policy())
            .with_reconnection(
                self.reconnect.max_reconnections,
                Duration::from_millis(self.reconnect.delay_ms),
            )
            .with_max_live_queue_size(self.subscription.max_live_queue_size)
            .with_read_batch_size(self.subscription.read_batch_size);

        if let Some(name) = &self.connection.name {
            config = config.with_connection_name(name.clone());
        }
        if let Some(credentials) = &self.credentials {
            config = config.with_credentials(credentials.to_credentials()?);
        }
        if self.tls.enabled {
            config = config.with_tls(self.tls.client_config());
        }
        Ok(config)
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// `host:port` of the server.
    pub endpoint: String,
    /// Name sent when identifying the client.
    pub name: Option<String>,
    pub connect_timeout_ms: u64,
    pub operation_timeout_ms: u64,
    pub read_buffer_size: usize,
    pub require_master: bool,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            endpoint: format!("127.0.0.1:{}", DEFAULT_PORT),
            name: None,
            connect_timeout_ms: 10_000,
            operation_timeout_ms: 30_000,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            require_master: true,
        }
    }
}

impl ConnectionSettings {
    /// Resolves the endpoint to a socket address.
    pub fn resolve(&self) -> Result<SocketAddr, ConfigError> {
        let invalid = |detail: String| {
            ConfigError::ValidationError(format!(
                "invalid endpoint '{}': {}",
                self.endpoint, detail
            ))
        };
        self.endpoint
            .to_socket_addrs()
            .map_err(|e| invalid(e.to_string()))?
            .next()
            .ok_or_else(|| invalid("no address found".to_string()))
    }
}

/// Default credentials.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    pub username: String,
    pub password: String,
}

impl CredentialSettings {
    pub fn to_credentials(&self) -> Result<Credentials, ConfigError> {
        Credentials::new(self.username.clone(), self.password.clone())
            .map_err(|e| ConfigError::ValidationError(e.to_string()))
    }
}

impl std::fmt::Debug for CredentialSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialSettings")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Retry settings for one-shot operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: Some(DEFAULT_MAX_RETRIES),
            delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            Duration::from_millis(self.delay_ms),
            Duration::from_millis(self.max_delay_ms),
        )
    }
}

/// Heartbeat settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_ms: u64,
    pub timeout_ms: u64,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_ms: 750,
            timeout_ms: 1_500,
        }
    }
}

/// Reconnection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub max_reconnections: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_reconnections: 10,
            delay_ms: 100,
        }
    }
}

/// Subscription settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionSettings {
    pub max_live_queue_size: usize,
    /// Page size for catch-up history reads.
    pub read_batch_size: i32,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_live_queue_size: DEFAULT_MAX_LIVE_QUEUE_SIZE,
            read_batch_size: 500,
        }
    }
}

/// TLS settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSettings {
    pub enabled: bool,
    /// PEM CA certificate(s) used instead of the bundled roots.
    pub ca_cert_path: Option<PathBuf>,
    pub client_cert_path: Option<PathBuf>,
    pub client_key_path: Option<PathBuf>,
    /// Skips certificate verification. Development only.
    pub insecure: bool,
    /// Overrides the name checked against the server certificate.
    pub server_name: Option<String>,
}

impl TlsSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match (&self.client_cert_path, &self.client_key_path) {
            (Some(_), None) => Err(ConfigError::ValidationError(
                "tls.client_cert_path set without tls.client_key_path".to_string(),
            )),
            (None, Some(_)) => Err(ConfigError::ValidationError(
                "tls.client_key_path set without tls.client_cert_path".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn client_config(&self) -> TlsClientConfig {
        TlsClientConfig {
            enabled: self.enabled,
            ca_cert_path: self.ca_cert_path.clone(),
            client_cert_path: self.client_cert_path.clone(),
            client_key_path: self.client_key_path.clone(),
            insecure: self.insecure,
            server_name: self.server_name.clone(),
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
