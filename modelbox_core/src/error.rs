//! Unified error handling for modelbox
//!
//! This module provides a centralized error type for the driver core,
//! ensuring consistent error handling across all components.

use thiserror::Error;

/// Main error type for modelbox driver operations
#[derive(Debug, Error)]
pub enum ModelboxError {
    /// I/O related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dynamic-linker errors. The underlying linker message is preserved
    /// verbatim in the payload.
    #[error("Linkage error: {0}")]
    Linkage(String),

    /// Non-success return from a plugin's `DriverInit` entrypoint
    #[error("Driver init failed: {0}")]
    DriverInit(String),

    /// A plugin's `CreateDriverFactory` produced no factory
    #[error("Driver factory error: {0}")]
    DriverFactory(String),

    /// Already exists errors (duplicate driver registration)
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Resource not found errors (informational for empty directories)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid input/argument errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization/Deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal faults (failed subprocess scan, cache write failures)
    #[error("Fault: {0}")]
    Fault(String),
}

impl From<serde_json::Error> for ModelboxError {
    fn from(err: serde_json::Error) -> Self {
        ModelboxError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ModelboxError {
    fn from(err: toml::de::Error) -> Self {
        ModelboxError::Config(format!("TOML parse error: {}", err))
    }
}

/// Convenience type alias for Results using ModelboxError
pub type ModelboxResult<T> = std::result::Result<T, ModelboxError>;

/// Short alias — `Result<T>` is equivalent to `ModelboxResult<T>`
pub type Result<T> = ModelboxResult<T>;
