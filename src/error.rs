//! Error types for stretchguard

use thiserror::Error;

/// Result type for stretchguard operations
pub type Result<T> = std::result::Result<T, StretchError>;

/// Kind of resource a conflict was detected on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    AffinityRule,
    StoragePolicy,
    HostLabel,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::AffinityRule => write!(f, "affinity rule"),
            ResourceKind::StoragePolicy => write!(f, "storage policy"),
            ResourceKind::HostLabel => write!(f, "host label"),
        }
    }
}

/// stretchguard error types
#[derive(Error, Debug)]
pub enum StretchError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error(
        "Conflict on {kind} {resource:?}: {field} is {configured:?}, expected {desired:?}; reconcile it manually"
    )]
    Conflict {
        kind: ResourceKind,
        resource: String,
        field: String,
        desired: String,
        configured: String,
    },

    #[error("Platform call {operation} failed: {message}")]
    Platform { operation: String, message: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Host {host} is not a member of any fault domain of cluster {cluster}")]
    UnplacedHost { cluster: String, host: String },

    #[error("Storage capability not offered by the platform: {0}")]
    UnsupportedCapability(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<serde_yaml::Error> for StretchError {
    fn from(e: serde_yaml::Error) -> Self {
        StretchError::Yaml(e.to_string())
    }
}

impl StretchError {
    /// Build a platform call error
    pub fn platform(operation: &str, message: impl std::fmt::Display) -> Self {
        StretchError::Platform {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    /// Whether this is a drift conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, StretchError::Conflict { .. })
    }

    /// Whether the platform session could not be established
    pub fn is_connection(&self) -> bool {
        matches!(self, StretchError::Connection(_))
    }
}
