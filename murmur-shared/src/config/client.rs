//! Client configuration with file, environment and command-line layers.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

use crate::backoff::{
    BackoffPolicy, INITIAL_RETRY_DELAY_MS, MAX_JITTER_MS, MAX_RETRY_COUNT, MAX_RETRY_DELAY_MS,
};

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Milliseconds to wait for `SUBSCRIBED` before retrying.
pub const CONNECT_TIMEOUT_MS: u64 = 10_000;
/// Disconnection longer than this triggers a missed-message fetch.
pub const GAP_RECOVERY_THRESHOLD_MS: u64 = 5_000;
/// Hard limit on one streamed reply.
pub const STREAM_TIMEOUT_MS: u64 = 120_000;
/// How long a completed tool call stays visible.
pub const TOOL_CALL_CLEAR_DELAY_MS: u64 = 500;

/// Errors raised while loading the client configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The YAML file did not parse.
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// The JSON file did not parse.
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// The file extension is neither YAML nor JSON.
    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,

    /// An environment variable held an unusable value.
    #[error("Invalid {name} value: {reason}")]
    InvalidEnv {
        /// Variable name.
        name: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The resolved configuration failed validation.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Reconnection and gap-recovery tuning for realtime subscriptions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RealtimeSettings {
    /// Reconnect attempts before giving up until a forced reconnect.
    pub max_retry_count: u32,
    /// Base of the exponential reconnect delay.
    pub initial_retry_delay_ms: u64,
    /// Cap on the reconnect delay before jitter.
    pub max_retry_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to each delay.
    pub max_jitter_ms: u64,
    /// How long a new channel may take to report `Subscribed`.
    pub connect_timeout_ms: u64,
    /// Disconnections longer than this trigger a missed-message fetch.
    pub gap_recovery_threshold_ms: u64,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            max_retry_count: MAX_RETRY_COUNT,
            initial_retry_delay_ms: INITIAL_RETRY_DELAY_MS,
            max_retry_delay_ms: MAX_RETRY_DELAY_MS,
            max_jitter_ms: MAX_JITTER_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            gap_recovery_threshold_ms: GAP_RECOVERY_THRESHOLD_MS,
        }
    }
}

impl RealtimeSettings {
    /// Backoff policy built from these settings.
    #[must_use]
    pub const fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retry_count: self.max_retry_count,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            max_jitter_ms: self.max_jitter_ms,
        }
    }

    /// Establishment timeout as a [`Duration`].
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Gap recovery threshold as a [`Duration`].
    #[must_use]
    pub const fn gap_recovery_threshold(&self) -> Duration {
        Duration::from_millis(self.gap_recovery_threshold_ms)
    }
}

/// Tuning for streamed AI replies.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct StreamingSettings {
    /// Hard limit on one exchange.
    pub timeout_ms: u64,
    /// How long a completed tool call stays visible.
    pub tool_call_clear_delay_ms: u64,
    /// Read the reply body incrementally; when false the body is buffered whole.
    pub incremental: bool,
}

impl Default for StreamingSettings {
    fn default() -> Self {
        Self {
            timeout_ms: STREAM_TIMEOUT_MS,
            tool_call_clear_delay_ms: TOOL_CALL_CLEAR_DELAY_MS,
            incremental: true,
        }
    }
}

impl StreamingSettings {
    /// Exchange timeout as a [`Duration`].
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Tool-call clear delay as a [`Duration`].
    #[must_use]
    pub const fn tool_call_clear_delay(&self) -> Duration {
        Duration::from_millis(self.tool_call_clear_delay_ms)
    }
}

/// Values supplied on the command line; they win over file and environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Replaces `api_base_url`.
    pub api_base_url: Option<Url>,
    /// Replaces `auth_token`.
    pub auth_token: Option<String>,
    /// Replaces `log_level`.
    pub log_level: Option<String>,
}

/// The main configuration structure for the Murmur client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the REST API; endpoint paths are joined onto it
    pub api_base_url: Url,

    /// Bearer token sent with every request
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Logging level
    pub log_level: String,

    /// Realtime subscription settings
    #[serde(default)]
    pub realtime: RealtimeSettings,

    /// Streaming reply settings
    #[serde(default)]
    pub streaming: StreamingSettings,
}

impl ClientConfig {
    /// Generates a default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            auth_token: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            realtime: RealtimeSettings::default(),
            streaming: StreamingSettings::default(),
        }
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// Environment variables only apply to values the file left at their
    /// defaults; `overrides` are applied last.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable is malformed, or the resolved configuration is invalid.
    pub fn load_config(
        config_path: Option<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let defaults = Self::with_defaults();
        let mut config = match config_path {
            Some(path) => Self::from_file(path)?,
            None => defaults.clone(),
        };

        if config.api_base_url == defaults.api_base_url {
            if let Ok(raw) = env::var("MURMUR_API_BASE_URL") {
                config.api_base_url = Url::parse(&raw).map_err(|err| ConfigError::InvalidEnv {
                    name: "MURMUR_API_BASE_URL",
                    reason: err.to_string(),
                })?;
            }
        }
        if config.auth_token.is_none() {
            config.auth_token = env::var("MURMUR_AUTH_TOKEN").ok().filter(|t| !t.is_empty());
        }
        if config.log_level == defaults.log_level {
            if let Ok(level) = env::var("MURMUR_LOG_LEVEL") {
                config.log_level = level;
            }
        }
        if config.streaming.timeout_ms == defaults.streaming.timeout_ms {
            if let Ok(raw) = env::var("MURMUR_STREAM_TIMEOUT_MS") {
                config.streaming.timeout_ms =
                    raw.parse().map_err(|_| ConfigError::InvalidEnv {
                        name: "MURMUR_STREAM_TIMEOUT_MS",
                        reason: "must be a positive number of milliseconds".to_string(),
                    })?;
            }
        }

        if let Some(url) = overrides.api_base_url {
            config.api_base_url = url;
        }
        if let Some(token) = overrides.auth_token {
            config.auth_token = Some(token);
        }
        if let Some(level) = overrides.log_level {
            config.log_level = level;
        }

        config.api_base_url = with_trailing_slash(config.api_base_url);
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    fn from_file(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(serde_yml::from_str(&content)?),
            Some("json") => Ok(serde_json::from_str(&content)?),
            _ => Err(ConfigError::UnsupportedFormat),
        }
    }

    /// Validate the complete configuration
    ///
    /// # Errors
    /// Returns every problem found, one message per entry.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.api_base_url.scheme(), "http" | "https") {
            errors.push(format!(
                "api_base_url must use http or https, got '{}'",
                self.api_base_url.scheme()
            ));
        }
        if self.realtime.connect_timeout_ms == 0 {
            errors.push("realtime.connect_timeout_ms must be greater than 0".to_string());
        }
        if self.realtime.initial_retry_delay_ms > self.realtime.max_retry_delay_ms {
            errors.push(
                "realtime.initial_retry_delay_ms must not exceed realtime.max_retry_delay_ms"
                    .to_string(),
            );
        }
        if self.streaming.timeout_ms == 0 {
            errors.push("streaming.timeout_ms must be greater than 0".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn default_api_base_url() -> Url {
    Url::parse(DEFAULT_API_BASE_URL).expect("default API base URL is valid")
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
