//! Random token generation and comparison.

use rand::rngs::OsRng;
use rand::RngCore;

use super::SessionError;

/// Number of random bytes in a session key or CSRF token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Source of cryptographically secure random bytes.
pub trait EntropySource: Send + Sync {
    /// Fill `dest` entirely or fail; never fall back to weaker randomness.
    fn fill(&self, dest: &mut [u8]) -> Result<(), SessionError>;
}

/// Entropy from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), SessionError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| SessionError::Entropy(e.to_string()))
    }
}

/// Generate a hex-encoded token of [`TOKEN_BYTES`] random bytes.
pub fn generate_token(entropy: &dyn EntropySource) -> Result<String, SessionError> {
    let mut bytes = [0u8; TOKEN_BYTES];
    entropy.fill(&mut bytes)?;
    Ok(hex::encode(bytes))
}

/// Compare two byte strings without short-circuiting on the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
