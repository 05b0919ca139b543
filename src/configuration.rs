//! Service configuration, sourced from environment variables.
//!
//! Every value is validated by [`Settings::from_env`] before any network connection is attempted.
use crate::amqp::configuration::{RabbitMqSettings, RoutingConfig};
use redact::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::{
    deserialize_bool_from_anything, deserialize_option_number_from_string,
};
use std::fmt;
use std::path::{Path, PathBuf};

const RABBITMQ_URL: &str = "RABBITMQ_URL";
const RABBITMQ_QUEUE: &str = "RABBITMQ_QUEUE";
const RABBITMQ_EXCHANGE: &str = "RABBITMQ_EXCHANGE";
const RABBITMQ_CONNECTION_TIMEOUT_SECONDS: &str = "RABBITMQ_CONNECTION_TIMEOUT_SECONDS";
const LOG_LEVEL: &str = "LOG_LEVEL";
const LOG_DIR: &str = "LOG_DIR";
const METRICS_ENABLED: &str = "METRICS_ENABLED";
const METRICS_PORT: &str = "METRICS_PORT";
const METRICS_PATH: &str = "METRICS_PATH";

const VARIABLES: [&str; 9] = [
    RABBITMQ_URL,
    RABBITMQ_QUEUE,
    RABBITMQ_EXCHANGE,
    RABBITMQ_CONNECTION_TIMEOUT_SECONDS,
    LOG_LEVEL,
    LOG_DIR,
    METRICS_ENABLED,
    METRICS_PORT,
    METRICS_PATH,
];

/// Configuration is either missing or malformed.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("{0} is required")]
    Missing(&'static str),
    #[error("Invalid configuration value: {0}")]
    Invalid(#[from] serde_json::Error),
    /// The parser echoes its input, credentials included: its message is not kept.
    #[error("RABBITMQ_URL is not a valid AMQP uri")]
    InvalidUrl,
    #[error("METRICS_PATH must start with '/', got `{0}`")]
    InvalidMetricsPath(String),
    /// The channel handed over to a consumer is already closed.
    #[error("The broker channel is not open")]
    ChannelNotOpen,
}

/// Verbosity of the service logs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
/// Where to expose Prometheus metrics over HTTP.
pub struct MetricsSettings {
    pub port: u16,
    /// E.g. `/metrics`.
    pub path: String,
}

#[derive(Debug, Deserialize, Clone)]
/// The complete, validated configuration of the service.
pub struct Settings {
    pub rabbitmq: RabbitMqSettings,
    pub log_level: LogLevel,
    /// If set, logs are written to `<log_dir>/app.log` as well as to stdout.
    pub log_dir: Option<PathBuf>,
    /// `None` if metrics are disabled.
    pub metrics: Option<MetricsSettings>,
}

/// The flat shape of the environment, before validation.
#[derive(Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct RawSettings {
    rabbitmq_url: Option<Secret<String>>,
    rabbitmq_queue: Option<String>,
    rabbitmq_exchange: Option<String>,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    rabbitmq_connection_timeout_seconds: Option<u64>,
    log_level: Option<LogLevel>,
    log_dir: Option<PathBuf>,
    #[serde(default, deserialize_with = "deserialize_bool_from_anything")]
    metrics_enabled: bool,
    #[serde(default, deserialize_with = "deserialize_option_number_from_string")]
    metrics_port: Option<u16>,
    metrics_path: Option<String>,
}

impl Settings {
    /// Load the configuration from the process environment.
    ///
    /// Variables listed in a `.env` file (in the working directory or one of its parents) are
    /// added to the environment first. Variables that are already set take precedence.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Settings::from_env`], reading the dotenv file at `path`.
    /// A missing or unreadable file is ignored.
    pub fn from_env_file(path: &Path) -> Result<Self, ConfigurationError> {
        dotenvy::from_path(path).ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration using `lookup` to resolve variable names to values.
    ///
    /// Empty values are treated as missing.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let values = VARIABLES
            .iter()
            .filter_map(|name| {
                let value = lookup(name)?;
                let value = value.trim();
                (!value.is_empty()).then(|| {
                    (
                        (*name).to_owned(),
                        serde_json::Value::String(value.to_owned()),
                    )
                })
            })
            .collect::<serde_json::Map<_, _>>();
        let raw: RawSettings = serde_json::from_value(serde_json::Value::Object(values))?;
        raw.validate()
    }
}

impl RawSettings {
    fn validate(self) -> Result<Settings, ConfigurationError> {
        let url = self
            .rabbitmq_url
            .ok_or(ConfigurationError::Missing(RABBITMQ_URL))?;
        let queue = self
            .rabbitmq_queue
            .ok_or(ConfigurationError::Missing(RABBITMQ_QUEUE))?;
        let exchange = self
            .rabbitmq_exchange
            .ok_or(ConfigurationError::Missing(RABBITMQ_EXCHANGE))?;
        let log_level = self
            .log_level
            .ok_or(ConfigurationError::Missing(LOG_LEVEL))?;

        let rabbitmq = RabbitMqSettings {
            url,
            routing: RoutingConfig::new(exchange, queue)?,
            connection_timeout_seconds: self.rabbitmq_connection_timeout_seconds,
        };
        rabbitmq.amqp_uri()?;

        let metrics = if self.metrics_enabled {
            let port = self
                .metrics_port
                .ok_or(ConfigurationError::Missing(METRICS_PORT))?;
            let path = self
                .metrics_path
                .ok_or(ConfigurationError::Missing(METRICS_PATH))?;
            if !path.starts_with('/') {
                return Err(ConfigurationError::InvalidMetricsPath(path));
            }
            Some(MetricsSettings { port, path })
        } else {
            None
        };

        Ok(Settings {
            rabbitmq,
            log_level,
            log_dir: self.log_dir,
            metrics,
        })
    }
}
