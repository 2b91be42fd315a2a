//! Configuration types for the transfer system

use serde::Deserialize;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Invalid configuration values
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value '{value}' for {field}: {suggestion}")]
    InvalidValue {
        field: String,
        value: String,
        suggestion: String,
    },
}

/// Behaviour of a [`crate::TransferCoordinator`]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Start newly created transfers without an explicit `resume()`
    pub start_immediately: bool,
    /// Follow HTTP redirects instead of treating them as the final response
    pub allow_redirection: bool,
    /// Name of the thread observers are notified on
    pub callback_queue_name: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            start_immediately: true,
            allow_redirection: false,
            callback_queue_name: "transfers-callbacks".to_string(),
        }
    }
}

impl TransferConfig {
    /// Start new transfers as soon as they are created
    pub fn with_start_immediately(mut self, start_immediately: bool) -> Self {
        self.start_immediately = start_immediately;
        self
    }

    /// Follow redirects instead of refusing them
    pub fn with_allow_redirection(mut self, allow_redirection: bool) -> Self {
        self.allow_redirection = allow_redirection;
        self
    }

    /// Name the callback thread
    pub fn with_callback_queue_name<S: Into<String>>(mut self, name: S) -> Self {
        self.callback_queue_name = name.into();
        self
    }

    /// Read overrides from the environment (and a `.env` file, if present)
    ///
    /// Recognized: `TRANSFERS_START_IMMEDIATELY`, `TRANSFERS_ALLOW_REDIRECTION`,
    /// `TRANSFERS_CALLBACK_QUEUE`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Ignore error if .env not present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`TransferConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup("TRANSFERS_START_IMMEDIATELY") {
            config.start_immediately = parse_bool("TRANSFERS_START_IMMEDIATELY", &value)?;
        }
        if let Some(value) = lookup("TRANSFERS_ALLOW_REDIRECTION") {
            config.allow_redirection = parse_bool("TRANSFERS_ALLOW_REDIRECTION", &value)?;
        }
        if let Some(value) = lookup("TRANSFERS_CALLBACK_QUEUE") {
            config.callback_queue_name = value;
        }
        Ok(config)
    }
}

/// Settings of the reqwest-based [`crate::transport::HttpTransport`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Longest wait for the next piece of a response; time spent suspended
    /// does not count
    pub read_timeout: Duration,
    pub connect_timeout: Duration,
    pub user_agent: String,
    /// Where in-flight downloads are written before placement
    pub staging_dir: PathBuf,
    pub max_redirects: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            user_agent: concat!("transfers/", env!("CARGO_PKG_VERSION")).to_string(),
            staging_dir: std::env::temp_dir().join("transfers-staging"),
            max_redirects: 10,
        }
    }
}

impl HttpTransportConfig {
    /// Set the idle timeout between reads
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the time allowed to establish a connection
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the `User-Agent` header sent with every request
    pub fn with_user_agent<S: Into<String>>(mut self, user_agent: S) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Set where downloads are staged before placement
    pub fn with_staging_dir<P: Into<PathBuf>>(mut self, staging_dir: P) -> Self {
        self.staging_dir = staging_dir.into();
        self
    }

    /// Give up after this many redirects in one request
    pub fn with_max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = max_redirects;
        self
    }

    /// Read overrides from the environment (and a `.env` file, if present)
    ///
    /// Recognized: `TRANSFERS_READ_TIMEOUT_SECS`, `TRANSFERS_CONNECT_TIMEOUT_SECS`,
    /// `TRANSFERS_USER_AGENT`, `TRANSFERS_STAGING_DIR`, `TRANSFERS_MAX_REDIRECTS`.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(value) = lookup("TRANSFERS_READ_TIMEOUT_SECS") {
            config.read_timeout = Duration::from_secs(parse_number("TRANSFERS_READ_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("TRANSFERS_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout =
                Duration::from_secs(parse_number("TRANSFERS_CONNECT_TIMEOUT_SECS", &value)?);
        }
        if let Some(value) = lookup("TRANSFERS_USER_AGENT") {
            config.user_agent = value;
        }
        if let Some(value) = lookup("TRANSFERS_STAGING_DIR") {
            config.staging_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("TRANSFERS_MAX_REDIRECTS") {
            config.max_redirects = parse_number("TRANSFERS_MAX_REDIRECTS", &value)?;
        }
        Ok(config)
    }
}

fn parse_bool(field: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            value: value.to_string(),
            suggestion: "use true/false, yes/no, on/off or 1/0".to_string(),
        }),
    }
}

fn parse_number<T: FromStr>(field: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        suggestion: "expected a non-negative integer".to_string(),
    })
}
