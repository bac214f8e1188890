//! Client configuration: defaults, optional YAML/JSON file, `LIVECHAT_*`
//! environment variables and explicit overrides, in that order.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf, time::Duration};
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:3000/";
const DEFAULT_CHAT_ENDPOINT: &str = "wss://edge.ivschat.us-east-1.amazonaws.com";

/// Shortest and longest session the token service accepts, in minutes.
pub const SESSION_DURATION_RANGE: std::ops::RangeInclusive<u32> = 1..=180;

/// Errors raised while loading the client configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("failed to read configuration file {path}: {source}")]
    Io {
        /// File that was being read
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The file extension is neither yaml nor json
    #[error("Unsupported configuration format. Use 'yaml' or 'json'.")]
    UnsupportedFormat,

    /// The YAML file could not be parsed
    #[error("invalid YAML configuration: {0}")]
    Yaml(#[from] serde_yml::Error),

    /// The JSON file could not be parsed
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),

    /// An environment variable holds a value that cannot be used
    #[error("Invalid {var} value: {message}")]
    InvalidEnv {
        /// Name of the variable
        var: &'static str,
        /// Why the value was rejected
        message: String,
    },

    /// The resolved configuration failed validation
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

/// Output format of the log subscriber.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// One JSON object per line
    Json,
}

/// Timing of the chat session.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    /// Requested session length; the server accepts 1–180 minutes
    pub duration_minutes: u32,

    /// How long before token expiry the credential is renewed
    pub renewal_margin_seconds: u64,

    /// Timeout applied to token, event and room requests
    pub request_timeout_seconds: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: 55,
            renewal_margin_seconds: 30,
            request_timeout_seconds: 10,
        }
    }
}

impl SessionConfig {
    /// Renewal margin as a [`Duration`].
    #[must_use]
    pub const fn renewal_margin(&self) -> Duration {
        Duration::from_secs(self.renewal_margin_seconds)
    }

    /// HTTP request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

/// The main configuration structure for the `LiveChat` client
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the proxy exposing `/auth`, `/event` and `/rooms`
    pub api_url: Url,

    /// Realtime websocket endpoint of the chat service
    pub chat_endpoint: Url,

    /// Identifier (ARN) of the chat room to join
    pub room_arn: String,

    /// Logging level
    pub log_level: String,

    /// Logging output format
    pub log_format: LogFormat,

    /// Session timing
    pub session: SessionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Config {
    /// Generates a default configuration.
    ///
    /// # Panics
    /// Never in practice: the default URLs are compile-time constants.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            api_url: Url::parse(DEFAULT_API_URL).expect("default API URL is valid"),
            chat_endpoint: Url::parse(DEFAULT_CHAT_ENDPOINT)
                .expect("default chat endpoint is valid"),
            room_arn: String::new(),
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            session: SessionConfig::default(),
        }
    }

    /// Websocket endpoint of the chat service in an AWS region.
    ///
    /// # Errors
    /// Returns an error if the region produces an invalid host name.
    pub fn endpoint_for_region(region: &str) -> Result<Url, ConfigError> {
        Url::parse(&format!("wss://edge.ivschat.{}.amazonaws.com", region.trim())).map_err(
            |err| ConfigError::InvalidEnv {
                var: "LIVECHAT_CHAT_REGION",
                message: err.to_string(),
            },
        )
    }

    /// Loads the configuration from a file, environment variables, or defaults.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file.
    /// * `duration_override` - Optional session duration (minutes) taking precedence over every other source.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, an environment
    /// variable is malformed, or the resolved configuration is invalid.
    pub fn load_config(
        config_path: Option<PathBuf>,
        duration_override: Option<u32>,
    ) -> Result<Self, ConfigError> {
        Self::load_config_with_env(config_path, duration_override, |name| env::var(name).ok())
    }

    /// Same as [`Config::load_config`], reading variables through `lookup`
    /// instead of the process environment.
    ///
    /// # Errors
    /// See [`Config::load_config`].
    pub fn load_config_with_env<F>(
        config_path: Option<PathBuf>,
        duration_override: Option<u32>,
        lookup: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match config_path {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                match path.extension().and_then(|ext| ext.to_str()) {
                    Some("yaml" | "yml") => serde_yml::from_str(&content)?,
                    Some("json") => serde_json::from_str(&content)?,
                    _ => return Err(ConfigError::UnsupportedFormat),
                }
            }
            None => Self::with_defaults(),
        };

        config.apply_env_overrides(&lookup)?;

        if let Some(minutes) = duration_override {
            config.session.duration_minutes = minutes;
        }

        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Use environment variables only for values that are still at their default.
    fn apply_env_overrides<F>(&mut self, lookup: &F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::with_defaults();

        if self.api_url == defaults.api_url
            && let Some(value) = lookup("LIVECHAT_API_URL")
        {
            self.api_url = Url::parse(&value).map_err(|err| ConfigError::InvalidEnv {
                var: "LIVECHAT_API_URL",
                message: err.to_string(),
            })?;
        }
        if self.chat_endpoint == defaults.chat_endpoint {
            if let Some(value) = lookup("LIVECHAT_CHAT_ENDPOINT") {
                self.chat_endpoint = Url::parse(&value).map_err(|err| ConfigError::InvalidEnv {
                    var: "LIVECHAT_CHAT_ENDPOINT",
                    message: err.to_string(),
                })?;
            } else if let Some(region) = lookup("LIVECHAT_CHAT_REGION") {
                self.chat_endpoint = Self::endpoint_for_region(&region)?;
            }
        }
        if self.room_arn == defaults.room_arn
            && let Some(arn) = lookup("LIVECHAT_ROOM_ARN")
        {
            self.room_arn = arn;
        }
        if self.log_level == defaults.log_level
            && let Some(level) = lookup("LIVECHAT_LOG_LEVEL")
        {
            self.log_level = level;
        }
        if self.session.duration_minutes == defaults.session.duration_minutes
            && let Some(minutes) = lookup("LIVECHAT_SESSION_DURATION")
        {
            self.session.duration_minutes =
                minutes.parse().map_err(|_| ConfigError::InvalidEnv {
                    var: "LIVECHAT_SESSION_DURATION",
                    message: "must be a whole number of minutes".to_string(),
                })?;
        }

        Ok(())
    }

    /// Validate the complete configuration
    ///
    /// # Errors
    /// Returns every problem found, one message per entry.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if !matches!(self.api_url.scheme(), "http" | "https") {
            errors.push(format!(
                "API URL must use http or https, got: {}",
                self.api_url.scheme()
            ));
        }

        if !matches!(self.chat_endpoint.scheme(), "ws" | "wss") {
            errors.push(format!(
                "Chat endpoint must use ws or wss, got: {}",
                self.chat_endpoint.scheme()
            ));
        }

        if self.room_arn.trim().is_empty() {
            errors.push("Room ARN must be set (LIVECHAT_ROOM_ARN or room_arn).".to_string());
        }

        if !SESSION_DURATION_RANGE.contains(&self.session.duration_minutes) {
            errors.push(format!(
                "Session duration must be between {} and {} minutes, got: {}",
                SESSION_DURATION_RANGE.start(),
                SESSION_DURATION_RANGE.end(),
                self.session.duration_minutes
            ));
        }

        if self.session.renewal_margin_seconds >= u64::from(self.session.duration_minutes) * 60 {
            errors.push("Renewal margin must be shorter than the session duration.".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
