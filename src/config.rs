//! Configuration types for dispatchq.
//!
//! This module contains all configuration structures used throughout dispatchq:
//! broker connection, dispatch loop behavior, the cron scheduler, the built-in
//! email executor and logging.

use crate::error::{DispatchError, DispatchResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Name of the broadcast channel used when none is configured.
pub const DEFAULT_CHANNEL: &str = "q";

/// Cron source consulted when none is configured.
pub const DEFAULT_CRON_FILE: &str = "tasks.cron";

/// Main configuration for dispatchq.
///
/// # Examples
///
/// ```rust
/// use dispatchq::config::{DispatchConfig, DispatchSettings};
///
/// let config = DispatchConfig {
///     dispatch: DispatchSettings::default()
///         .with_max_in_flight(64)
///         .with_task_timeout(30_000),
///     ..DispatchConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Broker connection configuration
    pub broker: BrokerConfig,

    /// Dispatch loop configuration
    pub dispatch: DispatchSettings,

    /// Cron scheduler configuration
    pub scheduler: SchedulerConfig,

    /// Built-in email executor configuration
    pub email: EmailConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Broker connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Which broker implementation to use
    pub backend: BrokerBackendConfig,

    /// Name of the single broadcast channel
    pub channel: String,

    /// Timeout for establishing the broker connection (in seconds)
    pub connect_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            backend: BrokerBackendConfig::InMemory,
            channel: DEFAULT_CHANNEL.to_string(),
            connect_timeout_secs: 10,
        }
    }
}

impl BrokerConfig {
    /// Configuration for an in-process broker.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a Redis broker.
    #[cfg(feature = "redis-broker")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
    pub fn redis(connection_string: impl Into<String>) -> Self {
        Self {
            backend: BrokerBackendConfig::Redis(RedisConfig {
                connection_string: connection_string.into(),
            }),
            ..Default::default()
        }
    }

    /// Set the channel name.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }
}

/// Broker backend-specific configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BrokerBackendConfig {
    /// In-process broadcast channels (default)
    InMemory,

    /// Redis pub/sub
    #[cfg(feature = "redis-broker")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
    Redis(RedisConfig),
}

/// Redis broker configuration.
#[cfg(feature = "redis-broker")]
#[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Redis connection string (e.g., "redis://localhost:6379")
    pub connection_string: String,
}

/// What the dispatch loop does with a message that is not a valid envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DecodePolicy {
    /// Terminate the loop with a decode error
    #[default]
    Fatal,
    /// Log the message and keep receiving
    Skip,
}

/// Dispatch loop configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchSettings {
    /// Maximum concurrently running executions (None = unbounded).
    ///
    /// While every permit is taken the receive loop stops pulling messages.
    /// The in-memory broker buffers 1024 messages per channel by default (see
    /// `InMemoryBroker::with_capacity`); a backlog past
    /// that is dropped with a lag warning. Redis buffers on the connection
    /// instead.
    pub max_in_flight: Option<usize>,

    /// Deadline for a single execution (in milliseconds, None = no deadline)
    pub task_timeout_ms: Option<u64>,

    /// Handling of undecodable messages
    pub on_decode_error: DecodePolicy,
}

impl DispatchSettings {
    /// Bound the number of concurrent executions.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = Some(max_in_flight);
        self
    }

    /// Set the per-execution deadline.
    pub fn with_task_timeout(mut self, timeout_ms: u64) -> Self {
        self.task_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the decode failure policy.
    pub fn with_decode_policy(mut self, policy: DecodePolicy) -> Self {
        self.on_decode_error = policy;
        self
    }

    /// Per-execution deadline as a duration.
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(|ms| ms.millis())
    }
}

/// Basic-authentication credential pair sent with cron callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    /// User name
    pub username: String,
    /// Password
    pub password: Option<String>,
}

impl Default for BasicAuth {
    fn default() -> Self {
        Self {
            username: "dispatchq".to_string(),
            password: None,
        }
    }
}

/// Cron scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Whether the subscriber starts the scheduler at all
    pub enabled: bool,

    /// Path to the cron source
    pub source_path: PathBuf,

    /// Credentials attached to every callback
    pub credentials: BasicAuth,

    /// Timeout for a single callback request (in milliseconds)
    pub callback_timeout_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            source_path: PathBuf::from(DEFAULT_CRON_FILE),
            credentials: BasicAuth::default(),
            callback_timeout_ms: 30_000,
        }
    }
}

impl SchedulerConfig {
    /// Read the schedule from `path`.
    pub fn with_source(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = path.into();
        self
    }

    /// Set the callback credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: Option<String>,
    ) -> Self {
        self.credentials = BasicAuth {
            username: username.into(),
            password,
        };
        self
    }

    /// Disable the scheduler.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }
}

/// How the email executor delivers mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmailMode {
    /// Log the message instead of sending it
    #[default]
    Development,
    /// Deliver through SMTP
    Production,
}

/// SMTP relay settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host name
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Login
    pub username: String,
    /// Password
    pub password: String,
}

/// Built-in email executor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    /// Delivery mode, fixed for the process lifetime
    pub mode: EmailMode,

    /// SMTP relay used in production mode
    pub smtp: Option<SmtpConfig>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter
    pub level: LogLevel,

    /// Enable structured JSON logging
    pub json_format: bool,

    /// Enable colored output (ignored if json_format is true)
    pub colored: bool,

    /// Include target module in logs
    pub include_targets: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            json_format: false,
            colored: true,
            include_targets: false,
        }
    }
}

/// Log level enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// Helper trait for converting durations in configuration.
pub trait DurationExt {
    /// Convert seconds to Duration
    fn secs(self) -> Duration;
    /// Convert milliseconds to Duration
    fn millis(self) -> Duration;
}

impl DurationExt for u64 {
    fn secs(self) -> Duration {
        Duration::from_secs(self)
    }

    fn millis(self) -> Duration {
        Duration::from_millis(self)
    }
}

impl DispatchConfig {
    /// Create a new configuration optimized for development.
    pub fn development() -> Self {
        Self {
            email: EmailConfig {
                mode: EmailMode::Development,
                smtp: None,
            },
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: true,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Create a new configuration optimized for production.
    pub fn production() -> Self {
        Self {
            email: EmailConfig {
                mode: EmailMode::Production,
                smtp: None,
            },
            logging: LoggingConfig {
                level: LogLevel::Info,
                json_format: true,
                colored: false,
                include_targets: false,
            },
            ..Default::default()
        }
    }

    /// Create a configuration for testing.
    pub fn testing() -> Self {
        Self {
            dispatch: DispatchSettings {
                task_timeout_ms: Some(5_000),
                ..Default::default()
            },
            scheduler: SchedulerConfig::disabled(),
            logging: LoggingConfig {
                level: LogLevel::Debug,
                colored: false,
                include_targets: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Build a configuration from the process environment.
    pub fn from_env() -> DispatchResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from any key lookup, layering recognized keys
    /// over the preset selected by `DISPATCHQ_ENV`.
    pub fn from_lookup<F>(lookup: F) -> DispatchResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match lookup("DISPATCHQ_ENV").as_deref() {
            None | Some("dev") | Some("development") => Self::development(),
            Some("prod") | Some("production") => Self::production(),
            Some(other) => {
                return Err(DispatchError::config(format!(
                    "DISPATCHQ_ENV must be 'dev' or 'prod', got '{other}'"
                )));
            }
        };

        #[cfg(feature = "redis-broker")]
        if let Some(url) = lookup("REDIS_URL") {
            config.broker.backend = BrokerBackendConfig::Redis(RedisConfig {
                connection_string: url,
            });
        }

        if let Some(channel) = lookup("DISPATCHQ_CHANNEL") {
            config.broker.channel = channel;
        }
        if let Some(path) = lookup("DISPATCHQ_CRON_FILE") {
            config.scheduler.source_path = PathBuf::from(path);
        }
        if let Some(username) = lookup("DISPATCHQ_CRON_USER") {
            config.scheduler.credentials.username = username;
        }
        if let Some(password) = lookup("DISPATCHQ_CRON_PASSWORD") {
            config.scheduler.credentials.password = Some(password);
        }
        if let Some(raw) = lookup("DISPATCHQ_MAX_IN_FLIGHT") {
            config.dispatch.max_in_flight = Some(parse_number("DISPATCHQ_MAX_IN_FLIGHT", &raw)?);
        }
        if let Some(raw) = lookup("DISPATCHQ_TASK_TIMEOUT_MS") {
            config.dispatch.task_timeout_ms = Some(parse_number("DISPATCHQ_TASK_TIMEOUT_MS", &raw)?);
        }

        if let Some(host) = lookup("SMTP_HOST") {
            let port = match lookup("SMTP_PORT") {
                Some(raw) => parse_number("SMTP_PORT", &raw)?,
                None => 587,
            };
            config.email.smtp = Some(SmtpConfig {
                host,
                port,
                username: lookup("SMTP_USERNAME").unwrap_or_default(),
                password: lookup("SMTP_PASSWORD").unwrap_or_default(),
            });
        }

        Ok(config)
    }

    /// Validate the configuration and return any errors.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.broker.channel.trim().is_empty() {
            errors.push("Broker channel name must not be empty".to_string());
        }

        if self.broker.connect_timeout_secs == 0 {
            errors.push("Broker connect timeout must be greater than 0".to_string());
        }

        if self.dispatch.max_in_flight == Some(0) {
            errors.push("Max in-flight executions must be greater than 0".to_string());
        }

        if self.dispatch.task_timeout_ms == Some(0) {
            errors.push("Task timeout must be greater than 0".to_string());
        }

        if self.scheduler.callback_timeout_ms == 0 {
            errors.push("Callback timeout must be greater than 0".to_string());
        }

        if let Some(smtp) = &self.email.smtp {
            if smtp.host.trim().is_empty() {
                errors.push("SMTP host must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> DispatchResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| DispatchError::config(format!("{key} must be a number, got '{raw}'")))
}
