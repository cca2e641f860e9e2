//! Error types for digipipe-core.

use crate::key::Key;
use thiserror::Error;

/// Result type alias for digipipe operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for digipipe operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Checked typed access found a different stored type.
    #[error("type mismatch for {key}: expected {expected}, found {actual}")]
    TypeMismatch {
        key: Key,
        expected: &'static str,
        actual: &'static str,
    },

    /// Data segment is not known to the event context.
    #[error("no data segment named '{0}'")]
    MissingSegment(String),

    /// A container is already stored under this key.
    #[error("container {0} already present in segment")]
    DuplicateKey(Key),

    /// No worker was registered for this key.
    #[error("no processor registered for container {0}")]
    UnknownWorker(Key),

    /// The same processor was registered twice for one key.
    #[error("processor '{processor}' already registered for container {key}")]
    DuplicateRegistration { key: Key, processor: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// A property could not be decoded to the requested type.
    #[error("invalid property '{name}': {message}")]
    InvalidProperty { name: String, message: String },

    /// A processor failed while handling an event.
    #[error("processor '{processor}' failed: {source}")]
    ProcessorFailed {
        processor: String,
        #[source]
        source: Box<Error>,
    },

    /// The output merge lock was poisoned by a panicking worker.
    #[error("output lock poisoned in '{0}'")]
    LockPoisoned(String),

    /// Worker pool could not be constructed.
    #[error("worker pool error: {0}")]
    PoolError(String),

    /// Segmentation descriptor or field error.
    #[error("segmentation error: {0}")]
    SegmentationError(String),

    /// JSON decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Wraps an error with the name of the processor that raised it.
    pub fn in_processor(self, processor: &str) -> Self {
        match self {
            // Keep the innermost processor name when nesting sequences.
            already @ Error::ProcessorFailed { .. } => already,
            other => Error::ProcessorFailed {
                processor: processor.to_string(),
                source: Box::new(other),
            },
        }
    }
}
