//! Application configuration module
//!
//! Provides the engine configuration, a builder, TOML file loading and
//! environment overrides.
//!
//! ```toml
//! remote_url = "https://sheets.example.com/api"
//! poll_interval_secs = 60
//! remote_timeout_secs = 30
//! backoff_base_secs = 5
//! backoff_max_secs = 300
//! message_capacity = 50
//! severity_error_threshold = 10
//! canonical_rule = "earliest_id"
//! ```

use crate::diagnostics::CanonicalRule;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable overriding the remote base URL
pub const ENV_REMOTE_URL: &str = "GIGSYNC_REMOTE_URL";
/// Environment variable overriding the poll interval (seconds)
pub const ENV_POLL_INTERVAL: &str = "GIGSYNC_POLL_INTERVAL_SECS";
/// Environment variable overriding the snapshot path
pub const ENV_DATA_PATH: &str = "GIGSYNC_DATA_PATH";

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Remote collaborator base URL
    pub remote_url: Option<String>,
    /// Bearer token forwarded to the remote as-is
    pub auth_token: Option<String>,
    /// Snapshot file; `None` uses the platform data directory
    pub data_path: Option<PathBuf>,
    /// Delay between sync cycles
    pub poll_interval: Duration,
    /// Granularity of the published countdown
    pub countdown_tick: Duration,
    /// Upper bound for a single push or pull
    pub remote_timeout: Duration,
    /// First backoff delay after a transport failure
    pub backoff_base: Duration,
    /// Backoff cap
    pub backoff_max: Duration,
    /// Number of status messages retained for display
    pub message_capacity: usize,
    /// Reference entities escalate to error above this many duplicate groups
    pub severity_error_threshold: usize,
    /// Canonical record selection for bulk fixes
    pub canonical_rule: CanonicalRule,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            remote_url: None,
            auth_token: None,
            data_path: None,
            poll_interval: Duration::from_secs(60),
            countdown_tick: Duration::from_secs(1),
            remote_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(5),
            backoff_max: Duration::from_secs(300),
            message_capacity: 50,
            severity_error_threshold: 10,
            canonical_rule: CanonicalRule::EarliestId,
        }
    }
}

/// On-disk representation; every field optional so partial files work
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    remote_url: Option<String>,
    auth_token: Option<String>,
    data_path: Option<PathBuf>,
    poll_interval_secs: Option<u64>,
    countdown_tick_millis: Option<u64>,
    remote_timeout_secs: Option<u64>,
    backoff_base_secs: Option<u64>,
    backoff_max_secs: Option<u64>,
    message_capacity: Option<usize>,
    severity_error_threshold: Option<usize>,
    canonical_rule: Option<CanonicalRule>,
}

impl AppConfig {
    /// Create a new AppConfigBuilder
    pub fn builder() -> AppConfigBuilder {
        AppConfigBuilder::default()
    }

    /// Parse a TOML document on top of the defaults
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: FileConfig =
            toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut builder = AppConfig::builder();
        if let Some(url) = file.remote_url {
            builder = builder.remote_url(url);
        }
        if let Some(token) = file.auth_token {
            builder = builder.auth_token(token);
        }
        if let Some(path) = file.data_path {
            builder = builder.data_path(path);
        }
        if let Some(secs) = file.poll_interval_secs {
            builder = builder.poll_interval(Duration::from_secs(secs));
        }
        if let Some(millis) = file.countdown_tick_millis {
            builder = builder.countdown_tick(Duration::from_millis(millis));
        }
        if let Some(secs) = file.remote_timeout_secs {
            builder = builder.remote_timeout(Duration::from_secs(secs));
        }
        if let (Some(base), Some(max)) = (file.backoff_base_secs, file.backoff_max_secs) {
            builder = builder.backoff(Duration::from_secs(base), Duration::from_secs(max));
        } else if let Some(base) = file.backoff_base_secs {
            builder = builder.backoff(Duration::from_secs(base), AppConfig::default().backoff_max);
        } else if let Some(max) = file.backoff_max_secs {
            builder = builder.backoff(AppConfig::default().backoff_base, Duration::from_secs(max));
        }
        if let Some(capacity) = file.message_capacity {
            builder = builder.message_capacity(capacity);
        }
        if let Some(threshold) = file.severity_error_threshold {
            builder = builder.severity_error_threshold(threshold);
        }
        if let Some(rule) = file.canonical_rule {
            builder = builder.canonical_rule(rule);
        }
        builder.build()
    }

    /// Load a TOML file, then apply environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        let config = Self::from_toml_str(&source)?;
        config.with_env_overrides()
    }

    /// Apply `GIGSYNC_*` environment variables
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Ok(url) = std::env::var(ENV_REMOTE_URL) {
            self.remote_url = Some(url);
        }
        if let Ok(secs) = std::env::var(ENV_POLL_INTERVAL) {
            let secs: u64 = secs
                .parse()
                .map_err(|_| ConfigError::InvalidValue(ENV_POLL_INTERVAL, secs.clone()))?;
            self.poll_interval = Duration::from_secs(secs);
        }
        if let Ok(path) = std::env::var(ENV_DATA_PATH) {
            self.data_path = Some(PathBuf::from(path));
        }
        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidValue("poll_interval", "0".to_string()));
        }
        if self.countdown_tick.is_zero() {
            return Err(ConfigError::InvalidValue("countdown_tick", "0".to_string()));
        }
        if self.remote_timeout.is_zero() {
            return Err(ConfigError::InvalidValue("remote_timeout", "0".to_string()));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::InvalidValue(
                "backoff_base",
                format!("{:?} exceeds backoff_max {:?}", self.backoff_base, self.backoff_max),
            ));
        }
        if self.message_capacity == 0 {
            return Err(ConfigError::InvalidValue("message_capacity", "0".to_string()));
        }
        if let Some(url) = &self.remote_url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(ConfigError::InvalidUrl(url.clone()));
            }
        }
        Ok(())
    }

    /// Snapshot path, falling back to the platform data directory
    pub fn resolved_data_path(&self) -> PathBuf {
        self.data_path.clone().unwrap_or_else(|| {
            let mut path = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
            path.push("gigsync");
            path.push("store.json");
            path
        })
    }
}

/// Builder for AppConfig
#[derive(Debug, Default)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    /// Set the remote base URL
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.config.remote_url = Some(url.into());
        self
    }

    /// Set the bearer token
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    /// Set the snapshot path
    pub fn data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_path = Some(path.into());
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the countdown tick
    pub fn countdown_tick(mut self, tick: Duration) -> Self {
        self.config.countdown_tick = tick;
        self
    }

    /// Set the remote timeout
    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    /// Set the backoff range
    pub fn backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.backoff_base = base;
        self.config.backoff_max = max;
        self
    }

    /// Set the status message ring capacity
    pub fn message_capacity(mut self, capacity: usize) -> Self {
        self.config.message_capacity = capacity;
        self
    }

    /// Set the duplicate-group count above which reference entities become errors
    pub fn severity_error_threshold(mut self, threshold: usize) -> Self {
        self.config.severity_error_threshold = threshold;
        self
    }

    /// Set the canonical record rule
    pub fn canonical_rule(mut self, rule: CanonicalRule) -> Self {
        self.config.canonical_rule = rule;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<AppConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    #[error("config parse error: {0}")]
    Parse(String),
    #[error("config read error: {0}")]
    Io(String),
}
