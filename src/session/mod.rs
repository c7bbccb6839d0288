//! Ephemeral session and CSRF token storage.

mod store;
mod token;

pub use store::{NewSession, SessionRecord, SessionStore};
pub use token::{constant_time_eq, generate_token, EntropySource, OsEntropy, TOKEN_BYTES};

use thiserror::Error;

/// Errors that can occur in session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The entropy source could not produce random bytes.
    #[error("Entropy source unavailable: {0}")]
    Entropy(String),
}
