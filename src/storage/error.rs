//! Storage error types and failure classification.

use std::io::ErrorKind;

use thiserror::Error;

/// Message fragments storage engines use to report lock contention.
const CONTENTION_SIGNATURES: &[&str] = &["database is locked", "table is locked", "SQLITE_BUSY"];

/// Errors raised by a [`LogStore`](super::LogStore).
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend is temporarily unable to serve the request.
    #[error("Storage busy: {0}")]
    Busy(String),

    /// Any other backend failure.
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A record could not be encoded or decoded.
    #[error("Record encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same operation shortly is expected to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Busy(_) => true,
            StorageError::Backend(message) => is_contention_message(message),
            StorageError::Encoding(_) => false,
        }
    }
}

fn is_contention_message(message: &str) -> bool {
    CONTENTION_SIGNATURES
        .iter()
        .any(|signature| message.contains(signature))
}

impl From<sled::Error> for StorageError {
    fn from(error: sled::Error) -> Self {
        match error {
            sled::Error::Io(io)
                if matches!(
                    io.kind(),
                    ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
                ) =>
            {
                StorageError::Busy(io.to_string())
            }
            other => StorageError::Backend(other.to_string()),
        }
    }
}

/// Errors returned by the [`ResilientWriter`](super::ResilientWriter).
#[derive(Debug, Error)]
pub enum WriteError {
    /// A non-transient failure, returned after a single attempt.
    #[error("Failed to write request log: {0}")]
    Permanent(#[source] StorageError),

    /// Every attempt failed with a transient error.
    #[error("Storage still contended after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// Error from the final attempt
        #[source]
        last: StorageError,
    },
}

impl WriteError {
    /// Whether the write gave up after sustained contention.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, WriteError::RetriesExhausted { .. })
    }
}
