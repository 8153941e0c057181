//! Error types for tributary-agent
//!
//! `ConnectorError` covers everything a source or checkpoint context can
//! report; `AgentError` wraps it for the runtime that drives the sources.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for the agent runtime
pub type Result<T> = std::result::Result<T, AgentError>;

/// Result type alias for connector operations
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

/// Main error type for the agent runtime
#[derive(Error, Debug)]
pub enum AgentError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source error
    #[error("Source '{name}' error: {message}")]
    Source { name: String, message: String },

    /// Checkpoint context error
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connector error (from individual sources)
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

impl AgentError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a source error
    pub fn source(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Source {
            name: name.into(),
            message: msg.into(),
        }
    }
}

/// Errors that can occur in source and checkpoint operations
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Configuration validation failed
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection to external system failed
    #[error("connection error: {0}")]
    Connection(String),

    /// Timeout waiting for response
    #[error("timeout: {0}")]
    Timeout(String),

    /// Action payload did not have the expected shape
    #[error("invalid payload: {0}")]
    Decode(String),

    /// Action name not handled by this source
    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    /// Operation not valid in the current lifecycle state
    #[error("state error: {0}")]
    State(String),

    /// Source was stopped before the operation could complete
    #[error("source stopped")]
    Stopped,

    /// Checkpoint backend failure
    #[error("checkpoint error: {0}")]
    Checkpoint(String),

    /// Schema introspection error
    #[error("schema error: {0}")]
    Schema(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] tributary_rdbc::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Key-value backend error
    #[error("kv error: {0}")]
    Kv(#[from] redis::RedisError),
}

impl ConnectorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(_) | Self::Timeout(_) => true,
            Self::Database(e) => e.is_retriable(),
            Self::Kv(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a payload decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a checkpoint error
    pub fn checkpoint(msg: impl Into<String>) -> Self {
        Self::Checkpoint(msg.into())
    }
}

/// Lifecycle status of a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    /// Constructed, `init` not yet run
    Created,
    /// Waiting for the controller's meta handshake
    WaitingForMeta,
    /// Handshake done, streaming events
    Running,
    /// Connectivity probe failed, may recover
    Unhealthy,
    /// Read loop terminated with an error
    Failed,
    /// Stopped
    Stopped,
}

impl SourceStatus {
    /// Whether the source reached a state it will not leave on its own
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Stopped)
    }
}

impl fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::WaitingForMeta => write!(f, "waiting_for_meta"),
            Self::Running => write!(f, "running"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Failed => write!(f, "failed"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}
