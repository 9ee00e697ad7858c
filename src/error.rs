//! Error types for the query forwarder.
//!
//! Defines the main error enum used throughout the application. Variants are
//! split into fatal errors, which abort a run before anything is logged, and
//! recorded errors, whose text ends up in an audit record.

use thiserror::Error;

/// Main error type for forwarder operations.
#[derive(Error, Debug)]
pub enum ForwarderError {
    /// Bad or missing encryption key, unreadable settings file, etc.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Tenant or tenant configuration does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Source query could not be executed (bad SQL, unreachable database, etc.)
    #[error("Query error: {0}")]
    Query(String),

    /// Stored secret could not be decrypted (wrong key or tampered token).
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),

    /// Configured HTTP method is not one we deliver with.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// Transport-level delivery failure (DNS, TLS, timeout, refused connection).
    #[error("Connection error: {0}")]
    Connection(String),

    /// State database errors.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Internal application errors (unexpected states, bugs, etc.)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForwarderError {
    /// Creates a configuration error with the given message.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Creates a not-found error with the given message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Creates a query error with the given message.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    /// Creates an authentication failure with the given message.
    pub fn authentication(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailure(msg.into())
    }

    /// Creates an unsupported-method error for the given method name.
    pub fn unsupported_method(method: impl Into<String>) -> Self {
        Self::UnsupportedMethod(method.into())
    }

    /// Creates a connection error with the given message.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Creates a persistence error with the given message.
    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    /// Creates an internal error with the given message.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns the error category as a string for display purposes.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "Configuration Error",
            Self::NotFound(_) => "Not Found",
            Self::Query(_) => "Query Error",
            Self::AuthenticationFailure(_) => "Authentication Failure",
            Self::UnsupportedMethod(_) => "Unsupported Method",
            Self::Connection(_) => "Connection Error",
            Self::Persistence(_) => "Persistence Error",
            Self::Internal(_) => "Internal Error",
        }
    }

    /// Returns true for errors that abort a run without writing an audit record.
    ///
    /// The process exits with status 1 for these; everything else is captured
    /// as text in the run's audit record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::NotFound(_) | Self::Persistence(_) | Self::Internal(_)
        )
    }
}

/// Result type alias using ForwarderError.
pub type Result<T> = std::result::Result<T, ForwarderError>;
