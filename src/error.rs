//! Error types for the intake service.

use thiserror::Error;

use crate::session::SessionError;
use crate::storage::{StorageError, WriteError};

/// Main error type for intake operations.
#[derive(Error, Debug)]
pub enum IntakeError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Durable storage errors outside the write path
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Request log write failures
    #[error("Write error: {0}")]
    Write(#[from] WriteError),

    /// Session store errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Background task failures
    #[error("Task error: {0}")]
    Task(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for intake operations.
pub type Result<T> = std::result::Result<T, IntakeError>;
