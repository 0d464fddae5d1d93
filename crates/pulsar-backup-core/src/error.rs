//! Error types for the Pulsar backup core library.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the Pulsar backup library.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cluster admin endpoint or broker unreachable (retryable)
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// Consumption failure for a specific topic
    #[error("Capture of topic {topic} failed: {message}")]
    Capture { topic: String, message: String },

    /// Entity exists on the target with an incompatible configuration
    #[error("Restore conflict for {entity}: {message}")]
    RestoreConflict { entity: String, message: String },

    /// Publish failure for a specific message; `retryable` follows the cause
    #[error("Publish of message {message_id} failed: {message}")]
    Publish {
        message_id: String,
        message: String,
        retryable: bool,
    },

    /// Corrupt or unreadable capture-set record
    #[error("Malformed record in {key} at line {line}: {message}")]
    Format {
        key: String,
        line: usize,
        message: String,
    },

    /// Non-connectivity cluster error
    #[error("Cluster error: {0}")]
    Cluster(ClusterError),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Capture set not found
    #[error("Capture set not found: {0}")]
    CaptureSetNotFound(String),

    /// Run stopped by a shutdown signal
    #[error("Operation cancelled")]
    Cancelled,
}

impl Error {
    /// Whether retrying the failed operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connectivity(_) | Error::Capture { .. } => true,
            Error::Publish { retryable, .. } => *retryable,
            Error::Cluster(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Whether the error reports a missing tenant, namespace or topic.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Cluster(ClusterError::NotFound(_)))
    }
}

/// Errors raised by the admin and messaging transports
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClusterError {
    /// Endpoint could not be reached
    #[error("Failed to reach {endpoint}: {message}")]
    Unreachable { endpoint: String, message: String },

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Tenant, namespace or topic does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Admin endpoint rejected the request
    #[error("Request rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// pulsarctl exited unsuccessfully
    #[error("Command `{command}` failed: {message}")]
    CommandFailed { command: String, message: String },

    /// Messaging client error
    #[error("Client error: {0}")]
    Client(String),
}

impl ClusterError {
    fn is_transient(&self) -> bool {
        match self {
            ClusterError::Unreachable { .. } | ClusterError::Timeout(_) => true,
            ClusterError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<ClusterError> for Error {
    fn from(err: ClusterError) -> Self {
        match err {
            ClusterError::Unreachable { .. } | ClusterError::Timeout(_) => {
                Error::Connectivity(err.to_string())
            }
            other => Error::Cluster(other),
        }
    }
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object not found
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Storage backend error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Invalid path
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
