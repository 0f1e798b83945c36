//! Error types for the keystone endpoint reconciler
//!
//! This module defines all error types used throughout the crate.

use thiserror::Error;

/// Result type alias for reconciler operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the keystone endpoint reconciler
#[derive(Error, Debug)]
pub enum Error {
    /// Identity service related errors
    #[error("Identity service error: {0}")]
    Identity(String),

    /// Resource store related errors
    #[error("Resource store error: {0}")]
    Store(String),

    /// Configuration errors, including unknown endpoint types
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from the identity API)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Object not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Object already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency conflict: the object changed since it was read
    #[error("Conflict: {0}")]
    Conflict(String),

    /// More than one remote endpoint matches a single endpoint type
    #[error(
        "multiple endpoints registered for service: {service} type: {endpoint_type} ({count} matches)"
    )]
    AmbiguousEndpoints {
        /// Service name
        service: String,
        /// Endpoint type label
        endpoint_type: String,
        /// Number of matching remote endpoints
        count: usize,
    },

    /// A reconcile pass exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Backend-specific error
    #[error("Backend error ({backend}): {message}")]
    Provider {
        /// Backend name
        backend: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an identity service error
    pub fn identity(msg: impl Into<String>) -> Self {
        Self::Identity(msg.into())
    }

    /// Create a resource store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an "already exists" error
    pub fn already_exists(msg: impl Into<String>) -> Self {
        Self::AlreadyExists(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a backend-specific error
    pub fn provider(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            backend: backend.into(),
            message: message.into(),
        }
    }

    /// Whether this error is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// Whether repeating the same pass cannot succeed until someone changes
    /// the declared spec or the remote registry by hand.
    ///
    /// The controller requeues these on a long fixed interval instead of
    /// the exponential backoff used for transient failures.
    pub fn needs_manual_intervention(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidInput(_) | Self::AmbiguousEndpoints { .. }
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
