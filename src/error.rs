//! Error types shared by the buffer, the naming helpers and the save session

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for buffer and session operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the acquisition buffer and the persistence session
#[derive(Debug, Error)]
pub enum Error {
    /// A configuration value was rejected at the point of assignment
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `start()` was called without a base path and the provider could not supply one
    #[error("a base path is required before the session can start")]
    PathRequired,

    /// The path given as base path cannot be used
    #[error("invalid file path '{path}': {reason}")]
    InvalidPath {
        /// Offending path
        path: String,
        /// Why it was rejected
        reason: &'static str,
    },

    /// A write found no free capacity under the `Error` overrun policy
    #[error("buffer overrun: {unread} unread samples fill all {capacity} slots")]
    BufferOverrun {
        /// Buffer capacity in slots
        capacity: usize,
        /// Samples written but not yet read
        unread: u64,
    },

    /// A read found nothing unread under the `Error` end policy
    #[error("buffer end reached: read counter caught up with write counter at {counter}")]
    BufferEnd {
        /// Shared value of both counters
        counter: u64,
    },

    /// A requested mode is recognized but not implemented
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A custom overrun or end handler failed
    #[error("policy handler failed: {0}")]
    Handler(String),

    /// The external write callback failed
    #[error("write callback failed for '{}': {source}", path.display())]
    Callback {
        /// Path the callback was writing
        path: PathBuf,
        /// Error reported by the callback
        #[source]
        source: anyhow::Error,
    },

    /// A record file failed an integrity check
    #[error("corrupt record at offset {offset}")]
    CorruptRecord {
        /// Byte offset of the record header in the file
        offset: usize,
    },

    /// An IO error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization of a sample or configuration failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether this error comes from the buffer's overrun or end checks
    pub fn is_buffer_condition(&self) -> bool {
        matches!(self, Self::BufferOverrun { .. } | Self::BufferEnd { .. })
    }
}
