//! Execution API errors.

use crate::core::ExecutionStatus;
use crate::definition::{DefinitionRef, ParseError};
use thiserror::Error;

/// Errors returned by [`Interpreter`](crate::execution::Interpreter) operations.
///
/// Failures inside a running state machine are not errors here; they end
/// the execution and are reported through `describe_execution`.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Definition '{0}' is not registered")]
    DefinitionNotFound(DefinitionRef),

    #[error("Execution '{0}' does not exist")]
    ExecutionNotFound(String),

    #[error("Execution '{name}' already exists for definition '{definition}'")]
    ExecutionAlreadyExists {
        definition: DefinitionRef,
        name: String,
    },

    #[error("Execution name '{0}' must be non-empty and must not contain ':'")]
    InvalidName(String),

    #[error("Execution '{id}' is not running (status {status})")]
    NotRunning { id: String, status: ExecutionStatus },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
}

/// Invalid interpreter configuration.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("time_scale must be finite and non-negative, got {0}")]
    InvalidTimeScale(f64),

    #[error("map_concurrency_limit must be at least 1")]
    ZeroConcurrencyLimit,
}

/// Errors raised while encoding, decoding or resuming a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Serialization to JSON or binary format failed
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Deserialization from JSON or binary format failed
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Snapshot version is not supported by this version
    #[error("Unsupported snapshot version {found}, supported: {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Snapshot does not fit the definition it names
    #[error("Snapshot validation failed: {0}")]
    ValidationFailed(String),
}
