//! Error types for the gateway adapter
//!
//! Field- and row-scoped failures degrade in place (the offending value is
//! nulled or the row skipped); only structural failures surface through these
//! types. Recovery policy stays with the caller.

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error types for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// A raw field value cannot be interpreted under any fallback rule
    #[error("Parsing error: {0}")]
    Parse(String),

    /// A structurally required key is absent from a device response
    #[error("Missing field: {0}")]
    MissingField(String),

    /// The catchup subsystem cannot establish a usable connection or file set
    #[error("Catchup failed: {0}")]
    Catchup(String),

    /// The device did not answer within the configured retry budget
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    /// Network discovery errors
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// HTTP client errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing errors
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors
    #[error("Generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

impl GatewayError {
    /// Create a parsing error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        GatewayError::Parse(msg.into())
    }

    /// Create a missing-field error
    pub fn missing_field<S: Into<String>>(msg: S) -> Self {
        GatewayError::MissingField(msg.into())
    }

    /// Create a catchup error
    pub fn catchup<S: Into<String>>(msg: S) -> Self {
        GatewayError::Catchup(msg.into())
    }

    /// Create an unreachable-device error
    pub fn unreachable<S: Into<String>>(msg: S) -> Self {
        GatewayError::Unreachable(msg.into())
    }

    /// Create a discovery error
    pub fn discovery<S: Into<String>>(msg: S) -> Self {
        GatewayError::Discovery(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        GatewayError::Config(msg.into())
    }

    /// Create a timeout error
    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        GatewayError::Timeout(msg.into())
    }

    /// Connectivity failures: the device could not be reached at all.
    ///
    /// Callers skip the poll cycle and retry next time. Content failures
    /// (`Parse`, `Json`) mean the device answered but the response is
    /// unusable; callers log and drop that single response instead.
    pub fn is_connectivity(&self) -> bool {
        match self {
            GatewayError::Unreachable(_) | GatewayError::Timeout(_) => true,
            GatewayError::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }

    /// Check if the operation is worth retrying at the transport layer
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Unreachable(_)
                | GatewayError::Timeout(_)
                | GatewayError::Http(_)
                | GatewayError::Io(_)
        )
    }
}
