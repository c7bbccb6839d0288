//! Concurrent TTL session table.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::token::{constant_time_eq, generate_token, EntropySource, OsEntropy};
use super::SessionError;
use crate::config::SessionConfig;
use crate::sweep::{spawn_periodic, SweepHandle};

/// An authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    /// Identity the session was created for
    pub principal: String,
    /// Token a state-changing request must echo back
    pub csrf_token: String,
    /// The session is valid strictly before this instant
    pub expires_at: Instant,
}

impl SessionRecord {
    /// Whether the session is no longer valid at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Tokens handed to the client when a session is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    /// Opaque key identifying the session (cookie value)
    pub session_key: String,
    /// CSRF token bound to the session
    pub csrf_token: String,
}

/// In-memory session store with lazy and periodic expiry.
///
/// Expired entries are never returned: `get` checks the deadline on every
/// read and removes what it finds expired. The background sweep only bounds
/// memory for sessions that are abandoned without a logout.
pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
    ttl: Duration,
    entropy: Arc<dyn EntropySource>,
}

impl SessionStore {
    /// Create a store whose sessions live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self::with_entropy(ttl, Arc::new(OsEntropy))
    }

    /// Create a store drawing tokens from `entropy`.
    pub fn with_entropy(ttl: Duration, entropy: Arc<dyn EntropySource>) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            entropy,
        }
    }

    /// Create a store from the session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.ttl())
    }

    /// Start a session for `principal`.
    ///
    /// Fails without storing anything if the entropy source is unavailable.
    pub fn create(&self, principal: &str) -> Result<NewSession, SessionError> {
        let session_key = generate_token(self.entropy.as_ref())?;
        let csrf_token = generate_token(self.entropy.as_ref())?;

        let record = SessionRecord {
            principal: principal.to_owned(),
            csrf_token: csrf_token.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        self.sessions.insert(session_key.clone(), record);

        debug!(principal = %principal, "Session created");

        Ok(NewSession {
            session_key,
            csrf_token,
        })
    }

    /// Look up a live session.
    pub fn get(&self, session_key: &str) -> Option<SessionRecord> {
        let now = Instant::now();
        let record = self.sessions.get(session_key).map(|entry| entry.value().clone())?;

        if record.is_expired_at(now) {
            // A concurrent create may have replaced the entry; only drop it
            // if it is still the expired one.
            self.sessions
                .remove_if(session_key, |_, current| current.is_expired_at(now));
            trace!(principal = %record.principal, "Session expired on read");
            return None;
        }

        Some(record)
    }

    /// Check `csrf_token` against the live session, in constant time.
    pub fn verify_csrf(&self, session_key: &str, csrf_token: &str) -> bool {
        self.get(session_key)
            .map(|record| constant_time_eq(record.csrf_token.as_bytes(), csrf_token.as_bytes()))
            .unwrap_or(false)
    }

    /// Remove a session. Removing an unknown key is a no-op.
    pub fn delete(&self, session_key: &str) {
        if let Some((_, record)) = self.sessions.remove(session_key) {
            debug!(principal = %record.principal, "Session deleted");
        }
    }

    /// Remove every expired session, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.sessions.retain(|_, record| {
            let expired = record.is_expired_at(now);
            if expired {
                purged += 1;
            }
            !expired
        });

        if purged > 0 {
            debug!(
                purged = purged,
                remaining = self.sessions.len(),
                "Purged expired sessions"
            );
        }
        purged
    }

    /// Start the periodic expiry sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> SweepHandle {
        let store = Arc::clone(self);
        spawn_periodic("session-expiry", period, move || {
            let store = Arc::clone(&store);
            async move {
                store.purge_expired();
            }
        })
    }

    /// Session lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.sessions.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
