//! Error types for dispatchq operations.

use crate::materialize::MaterializeError;
use thiserror::Error;

/// Result type used throughout dispatchq.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Main error type for dispatchq operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Envelope or payload could not be serialized
    #[error("Encode error: {0}")]
    Encode(#[source] serde_json::Error),

    /// A broadcast message could not be decoded into an envelope
    #[error("Decode error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Payload could not be materialized into a parameter record
    #[error("Materialize error: {0}")]
    Materialize(#[from] MaterializeError),

    /// Task execution failed
    #[error("Task execution failed: {message}")]
    TaskExecutionFailed {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Execution exceeded the configured deadline
    #[error("Task execution timed out after {timeout_ms}ms")]
    Timeout {
        /// Deadline in milliseconds
        timeout_ms: u64,
    },

    /// Broker transport error
    #[error("Broker error: {message}")]
    Broker {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Broker failed the liveness probe
    #[error("Broker unavailable: {message}")]
    BrokerUnavailable {
        /// Error message
        message: String,
    },

    /// The broker closed the subscription
    #[error("Subscription closed by broker")]
    SubscriptionClosed,

    /// Malformed cron source
    #[error("Invalid schedule line '{line}': {message}")]
    ScheduleParse {
        /// The offending line
        line: String,
        /// What was wrong with it
        message: String,
    },

    /// Cron callback delivery failed
    #[error("Callback to {url} failed: {message}")]
    Callback {
        /// Callback URL
        url: String,
        /// Failure description
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Redis connection error
    #[cfg(feature = "redis-broker")]
    #[cfg_attr(docsrs, doc(cfg(feature = "redis-broker")))]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl DispatchError {
    /// Create a new task execution error
    pub fn task_execution<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TaskExecutionFailed {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a task execution error without an underlying cause
    pub fn execution(message: impl Into<String>) -> Self {
        Self::TaskExecutionFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new broker error
    pub fn broker<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Broker {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
