//! Error types for the village AI core.
//!
//! Expected absences (an agent the host has unloaded, an unconfigured
//! provider) are not errors here: they surface as `Option`s or as explicit
//! [`DialogueResponse`](crate::dialogue::DialogueResponse) variants. These
//! enums cover genuine failures only.

use std::any::Any;
use std::time::Duration;

/// Main error type for the crate
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Orchestrator construction or lifecycle error
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// A subsystem failed for one agent
    #[error("Subsystem error: {0}")]
    Subsystem(#[from] SubsystemError),

    /// Text generation provider error
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the orchestrator itself.
///
/// Only construction and lifecycle problems land here; failures inside a
/// single agent's update never propagate out of a tick.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Invalid configuration detected at construction time
    #[error("invalid orchestrator configuration: {0}")]
    Config(#[from] ConfigError),

    /// The orchestrator was already shut down
    #[error("orchestrator has been shut down")]
    ShutDown,
}

/// Failure of one subsystem for one agent.
#[derive(Debug, thiserror::Error)]
pub enum SubsystemError {
    /// The subsystem reported a failure
    #[error("{subsystem} failed: {reason}")]
    Failed { subsystem: String, reason: String },

    /// The update exceeded its time allowance
    #[error("{subsystem} timed out after {duration:?}")]
    Timeout {
        subsystem: String,
        duration: Duration,
    },

    /// The update panicked
    #[error("{subsystem} panicked: {message}")]
    Panicked { subsystem: String, message: String },
}

impl SubsystemError {
    /// Convenience constructor for [`SubsystemError::Failed`]
    pub fn failed(subsystem: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            subsystem: subsystem.into(),
            reason: reason.into(),
        }
    }
}

/// Text generation provider errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    /// API error from provider
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Network/connection error
    #[error("Network error: {0}")]
    Network(String),

    /// Response parsing error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Rate limited
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Request timeout
    #[error("Request timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// The provider answered with no usable text
    #[error("Provider returned an empty response")]
    EmptyResponse,

    /// The provider is not ready to serve requests
    #[error("Provider not ready: {reason}")]
    NotReady { reason: String },

    /// The provider panicked while generating
    #[error("Provider panicked: {message}")]
    Panicked { message: String },
}

impl ProviderError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::RateLimited { .. } | Self::Timeout { .. } => true,
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Configuration errors, all detected before anything runs
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// The worker pool must have at least one worker
    #[error("worker_threads must be at least 1")]
    ZeroWorkers,

    /// A numeric range is inverted or out of bounds
    #[error("invalid range for {field}: {reason}")]
    InvalidRange { field: &'static str, reason: String },

    /// Unrecognised provider name
    #[error("unknown provider '{0}'")]
    UnknownProvider(String),

    /// A required key or setting is missing
    #[error("missing setting: {0}")]
    MissingKey(String),

    /// A setting could not be parsed
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for orchestrator operations
pub type OrchestratorResult<T> = std::result::Result<T, OrchestratorError>;

/// Result type for subsystem updates
pub type SubsystemResult<T> = std::result::Result<T, SubsystemError>;

/// Result type for provider operations
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
