//! Error handling for the trace interpretation engine
//!
//! Schema variance never raises: missing or malformed event fields degrade
//! to `None`/`"unknown"` instead of failing. The variants here are the only
//! user-facing failure conditions, kept distinct so hosts can surface each
//! one differently.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, TraceError>;

/// User-facing failure conditions
#[derive(Error, Debug)]
pub enum TraceError {
    /// The document contained no usable trace events
    #[error("no trace events found in document")]
    NoEvents,

    /// A single extracted value could not be decoded
    #[error("decode failure: {what}")]
    Decode {
        what: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A step index outside the parsed event range
    #[error("invalid step index {index}: trace has {len} steps")]
    InvalidStepIndex { index: usize, len: usize },

    /// A trace file that does not exist on disk
    #[error("trace file not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Filesystem errors from trace or sibling-file reads
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Create a decode error without an underlying cause
    pub fn decode<S: Into<String>>(what: S) -> Self {
        Self::Decode {
            what: what.into(),
            source: None,
        }
    }

    /// Create a decode error carrying the underlying cause
    pub fn decode_with_source<S: Into<String>, E: Into<Box<dyn std::error::Error + Send + Sync>>>(
        what: S,
        source: E,
    ) -> Self {
        Self::Decode {
            what: what.into(),
            source: Some(source.into()),
        }
    }

    /// Create an invalid step index error
    pub fn invalid_step_index(index: usize, len: usize) -> Self {
        Self::InvalidStepIndex { index, len }
    }

    /// Create a file-not-found error
    pub fn file_not_found<P: Into<PathBuf>>(path: P) -> Self {
        Self::FileNotFound { path: path.into() }
    }
}
