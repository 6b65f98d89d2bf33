use std::fmt;

use thiserror::Error;

/// Main error type for mesh runs.
///
/// Everything here is fatal and surfaces before any remote side effect. Failures talking
/// to node agents are [`AgentError`]s and are recorded per node or per link instead.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Bad or unsupported settings
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Node discovery failed
    #[error("Directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// The run was interrupted before finishing its schedule
    #[error("Run interrupted after {completed_rounds} round(s)")]
    Interrupted { completed_rounds: usize },

    /// I/O errors (wrapper for `std::io::Error`)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MeshError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Whether the error was raised before any remote side effect.
    #[must_use]
    pub const fn is_setup_failure(&self) -> bool {
        matches!(self, Self::Config { .. } | Self::Directory(_))
    }
}

/// Errors resolving the participating nodes.
#[derive(Error, Debug)]
pub enum DirectoryError {
    /// The backing directory service could not be reached
    #[error("Directory service unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The selection resolved to zero nodes
    #[error("Selection {selection} matched no nodes")]
    EmptySelection { selection: String },

    #[error("Invalid selector {selector:?}: {message}")]
    InvalidSelector { selector: String, message: String },
}

impl DirectoryError {
    pub fn unavailable<E>(message: impl Into<String>, source: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Unavailable {
            message: message.into(),
            source: Some(source.into()),
        }
    }
    pub fn empty(selection: impl fmt::Display) -> Self {
        Self::EmptySelection {
            selection: selection.to_string(),
        }
    }
    pub fn invalid_selector(selector: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidSelector {
            selector: selector.into(),
            message: message.into(),
        }
    }
}

/// Control operations a node agent serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentOperation {
    StartServers,
    RunClient,
    StopServers,
}

impl fmt::Display for AgentOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::StartServers => "startServers",
            Self::RunClient => "runClient",
            Self::StopServers => "stopServers",
        })
    }
}

/// Failure of a single control request. Always recoverable at the run level.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// Connection refused or reset
    #[error("{operation} on {node}: agent unreachable: {message}")]
    Unreachable {
        node: String,
        operation: AgentOperation,
        message: String,
    },

    /// No response within the bound
    #[error("{operation} on {node}: timed out after {duration_ms}ms")]
    Timeout {
        node: String,
        operation: AgentOperation,
        duration_ms: u64,
    },

    /// Response received but not the expected shape
    #[error("{operation} on {node}: malformed response: {message}")]
    MalformedResponse {
        node: String,
        operation: AgentOperation,
        message: String,
    },

    /// Connection dropped before the response completed
    #[error("{operation} on {node}: server disconnected: {message}")]
    ServerDisconnected {
        node: String,
        operation: AgentOperation,
        message: String,
    },
}

impl AgentError {
    pub fn unreachable(
        node: impl Into<String>,
        operation: AgentOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::Unreachable {
            node: node.into(),
            operation,
            message: message.into(),
        }
    }
    #[must_use]
    pub fn timeout(node: impl Into<String>, operation: AgentOperation, duration_ms: u64) -> Self {
        Self::Timeout {
            node: node.into(),
            operation,
            duration_ms,
        }
    }
    pub fn malformed(
        node: impl Into<String>,
        operation: AgentOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedResponse {
            node: node.into(),
            operation,
            message: message.into(),
        }
    }
    pub fn disconnected(
        node: impl Into<String>,
        operation: AgentOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::ServerDisconnected {
            node: node.into(),
            operation,
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Failures worth another attempt on an idempotent operation.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. } | Self::ServerDisconnected { .. }
        )
    }
}

/// Result type alias for mesh operations
pub type Result<T, E = MeshError> = std::result::Result<T, E>;
