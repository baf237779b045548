//! Error types for bcast-producer
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use thiserror::Error;

/// Main error type for the producer pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid producer or graph configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Codec open or decode failure
    #[error("Codec error: {0}")]
    Codec(String),

    /// Filter graph parse, build or pull failure
    #[error("Filter error: {0}")]
    Filter(String),

    /// Demuxer open, read or seek failure
    #[error("Demux error: {0}")]
    Demux(String),

    /// Invalid state for operation
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A blocking wait was abandoned because its owner is shutting down
    #[error("Interrupted")]
    Interrupted,

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] bcast_common::Error),
}

impl Error {
    /// True for cooperative cancellation, which is never reported as a failure
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::Interrupted)
    }
}

/// Convenience Result type using the producer Error
pub type Result<T> = std::result::Result<T, Error>;
