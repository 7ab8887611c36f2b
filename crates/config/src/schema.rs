use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix for environment overrides, e.g. `VESTA_API__BASE_URL`.
pub const ENV_PREFIX: &str = "VESTA_";

fn default_base_url() -> String {
    "https://api.vesta.app/v1".to_string()
}
fn default_app_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_platform() -> String {
    std::env::consts::OS.to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_delay_ms() -> u64 {
    500
}
fn default_max_concurrent() -> usize {
    6
}

/// REST client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL every endpoint path is appended to.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `X-App-Version`.
    #[serde(default = "default_app_version")]
    pub app_version: String,
    /// Sent as `X-Platform`.
    #[serde(default = "default_platform")]
    pub platform: String,
    /// Per-attempt timeout when a descriptor does not set one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    /// Additional attempts allowed for transient failures (defaults to 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff unit; attempt `n` waits `n × base`.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// Upper bound on in-flight requests (defaults to 6, a typical per-host cap).
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            app_version: default_app_version(),
            platform: default_platform(),
            default_timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_concurrent_requests: default_max_concurrent(),
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    #[must_use]
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

fn default_client_id() -> String {
    "vesta-mobile".to_string()
}
fn default_leeway_secs() -> u64 {
    60
}

/// Token authority settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Token endpoint; defaults to `<api.base_url>/auth/token`.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Tokens expiring within this window are refreshed before use.
    #[serde(default = "default_leeway_secs")]
    pub refresh_leeway_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: None,
            client_id: default_client_id(),
            refresh_leeway_secs: default_leeway_secs(),
        }
    }
}

impl AuthConfig {
    /// Resolves the token endpoint against the API base URL.
    #[must_use]
    pub fn token_url(&self, base_url: &str) -> String {
        self.token_url
            .clone()
            .unwrap_or_else(|| format!("{}/auth/token", base_url.trim_end_matches('/')))
    }

    #[must_use]
    pub fn refresh_leeway(&self) -> Duration {
        Duration::from_secs(self.refresh_leeway_secs)
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_event_buffer() -> usize {
    256
}

/// Streaming connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    /// WebSocket URL used when `connect` is not given one explicitly.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Per-subscriber event buffer; slow subscribers skip ahead when it fills.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl StreamConfig {
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Parses configuration from a YAML string, merged with defaults.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the YAML is invalid or extraction fails.
    #[allow(clippy::result_large_err)]
    pub fn from_yaml(yaml: &str) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Format as _, Serialized, Yaml},
        };
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Yaml::string(yaml))
            .extract()
    }

    /// Loads defaults, then `path` (if any), then `VESTA_*` environment
    /// variables, later layers overriding earlier ones.
    ///
    /// # Errors
    ///
    /// Returns a [`figment::Error`] if the file cannot be read or parsed.
    #[allow(clippy::result_large_err)]
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        use figment::{
            Figment,
            providers::{Env, Format as _, Serialized, Yaml},
        };
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// The token endpoint resolved against the API base URL.
    #[must_use]
    pub fn token_url(&self) -> String {
        self.auth.token_url(&self.api.base_url)
    }
}
