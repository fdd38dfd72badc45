//! Error types for the Servio model serving gateway.
//!
//! This module provides a unified error type [`ServioError`] for all Servio
//! operations, along with a convenient [`Result`] type alias.
//!
//! # Error Categories
//!
//! Errors are organized into the following categories:
//!
//! - **Registry**: servable discovery, versioning, and lifecycle errors
//! - **Runtime**: model loading and inference execution errors
//! - **Validation**: request inputs that do not match a method signature
//! - **Network**: connection and timeout errors
//! - **Configuration**: invalid settings or missing configuration
//!
//! # Example
//!
//! ```rust
//! use servio::error::{Result, ServioError};
//!
//! fn lookup_model(name: &str) -> Result<()> {
//!     if name.is_empty() {
//!         return Err(ServioError::InvalidArgument("model name cannot be empty".into()));
//!     }
//!     Ok(())
//! }
//!
//! fn handle_error(err: &ServioError) {
//!     if err.is_retryable() {
//!         println!("Retrying operation...");
//!     } else {
//!         println!("Fatal error: {}", err);
//!     }
//! }
//! ```

use std::io;
use thiserror::Error;

/// Main error type for Servio operations.
#[derive(Error, Debug)]
pub enum ServioError {
    // Registry errors
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Version {version} of model {model} not found")]
    VersionNotFound { model: String, version: u32 },

    #[error("Method not found: {model}.{method}")]
    MethodNotFound { model: String, method: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("Artifact error: {0}")]
    Artifact(String),

    // Runtime errors
    #[error("Model {model} version {version} not loaded")]
    ModelNotLoaded { model: String, version: u32 },

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Engine unavailable: {0}")]
    Unavailable(String),

    // Request validation errors
    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Input {input} has wrong dtype: expected {expected}, got {actual}")]
    DtypeMismatch {
        input: String,
        expected: String,
        actual: String,
    },

    #[error("Input {input} has wrong rank: expected {expected}, got {actual}")]
    RankMismatch {
        input: String,
        expected: usize,
        actual: usize,
    },

    #[error("Input {input} dimension {dim} mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        input: String,
        dim: usize,
        expected: i64,
        actual: i64,
    },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    // Network errors
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // External errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServioError {
    /// Map to an HTTP status code for the serving API.
    pub fn to_status_code(&self) -> u16 {
        match self {
            ServioError::ModelNotFound(_)
            | ServioError::VersionNotFound { .. }
            | ServioError::MethodNotFound { .. }
            | ServioError::NotFound(_)
            | ServioError::ModelNotLoaded { .. } => 404,
            ServioError::AlreadyExists(_) => 409,
            ServioError::MissingInput(_)
            | ServioError::DtypeMismatch { .. }
            | ServioError::RankMismatch { .. }
            | ServioError::DimensionMismatch { .. }
            | ServioError::InvalidArgument(_)
            | ServioError::InvalidManifest(_)
            | ServioError::Deserialization(_) => 400,
            ServioError::InvalidOperation(_) | ServioError::InvalidState(_) => 422,
            ServioError::Timeout(_) => 504,
            ServioError::RateLimited(_) => 429,
            ServioError::Unavailable(_) => 503,
            _ => 500,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ServioError::Timeout(_)
                | ServioError::Unavailable(_)
                | ServioError::ConnectionFailed(_)
                | ServioError::RateLimited(_)
        )
    }
}

impl From<serde_json::Error> for ServioError {
    fn from(e: serde_json::Error) -> Self {
        ServioError::Serialization(e.to_string())
    }
}

/// Result type alias for Servio operations.
pub type Result<T> = std::result::Result<T, ServioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ServioError::ModelNotFound("m".into()).to_status_code(), 404);
        assert_eq!(ServioError::MissingInput("x".into()).to_status_code(), 400);
        assert_eq!(ServioError::Timeout(30000).to_status_code(), 504);
        assert_eq!(ServioError::RateLimited("global".into()).to_status_code(), 429);
        assert_eq!(ServioError::Internal("oops".into()).to_status_code(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(ServioError::Timeout(100).is_retryable());
        assert!(ServioError::Unavailable("starting".into()).is_retryable());
        assert!(!ServioError::ModelNotFound("m".into()).is_retryable());
    }
}
