//! Error types for the anomaly pipeline.

use thiserror::Error;

/// Errors surfaced by the pipeline and its components.
///
/// All of these are programmer or configuration errors reported synchronously to the caller.
/// None of them leave learned state partially updated.
#[derive(Error, Debug)]
pub enum HtmError {
    /// A configuration value is outside its valid range.
    #[error("invalid parameter `{name}`: {message}")]
    InvalidParameter { name: &'static str, message: String },

    /// A tick or checkpoint was requested before `init()`.
    #[error("pipeline is not initialized, call `init()` first")]
    NotInitialized,

    /// `init()` was called on a pipeline that is already ready.
    #[error("pipeline is already initialized")]
    AlreadyInitialized,

    /// The input vector does not match the configured input dimension.
    #[error("input length mismatch: expected {expected}, got {got}")]
    InputLength { expected: usize, got: usize },

    /// A column index does not exist in the column pool.
    #[error("column index {column} out of range for {num_columns} columns")]
    ColumnOutOfRange { column: usize, num_columns: usize },

    /// A prediction was scored against a tick it was not made for.
    #[error("prediction was made for tick {found}, but the current tick is {expected}")]
    StalePrediction { expected: u64, found: u64 },

    /// A checkpoint was written by an incompatible format version.
    #[error("checkpoint version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint codec error: {0}")]
    Codec(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HtmError {
    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        HtmError::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, HtmError>;
