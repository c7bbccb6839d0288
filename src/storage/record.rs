//! Persisted request records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A logged inbound request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestLog {
    /// Store-assigned identifier, increasing with insertion order
    pub id: u64,
    /// Best-effort caller address
    pub source: String,
    /// Requested path, including any query string
    pub path: String,
    /// When the request was recorded
    pub timestamp: DateTime<Utc>,
}
