//! Library error type

use crate::diagnostics::Diagnostics;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for provider operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by schemas, CRUD callbacks and the state store
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Object vanished while it was expected to exist
    #[error("{kind} {id} not found")]
    NotFound { kind: String, id: String },

    /// Block failed schema validation
    #[error("{0}")]
    Validation(Diagnostics),

    /// Attribute value could not be expanded into an API object
    #[error("Invalid attribute {path}: {message}")]
    Attribute { path: String, message: String },

    /// Create collided with an object not tracked in state
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    #[error("Unexpected ID format ({id:?}), expected {expected}")]
    InvalidId { id: String, expected: String },

    #[error("Timeout after {elapsed:?} waiting for {what}: {last_status}")]
    Timeout {
        what: String,
        elapsed: Duration,
        last_status: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown resource type: {0}")]
    UnknownResourceType(String),

    #[error("State error: {0}")]
    State(String),
}

impl Error {
    /// Shorthand for an attribute expansion error
    pub fn attribute(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Attribute {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound { .. } => true,
            Error::Kube(err) => crate::k8s::errors::is_not_found(err),
            _ => false,
        }
    }

    /// Whether a poll or retry loop may try again after this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(err) => crate::k8s::errors::is_retryable(err),
            _ => false,
        }
    }
}
