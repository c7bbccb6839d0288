//! Shared state handed to every request handler.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::IntakeConfig;
use crate::ratelimit::LimiterRegistry;
use crate::session::{constant_time_eq, SessionStore};
use crate::storage::{LogStore, ResilientWriter, RetryPolicy};
use crate::sweep::{spawn_periodic, SweepHandle};

/// Operator username and password.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Compare both fields in constant time.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }

    pub fn username(&self) -> &str {
        &self.username
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// State shared by the router, middleware and extractors.
#[derive(Clone)]
pub struct AppState {
    /// Admission control; `None` when rate limiting is disabled
    pub limiter: Option<Arc<LimiterRegistry>>,
    pub sessions: Arc<SessionStore>,
    pub store: Arc<dyn LogStore>,
    pub writer: Arc<ResilientWriter>,
    /// Operator credentials; `None` disables login and statistics auth
    pub credentials: Option<Credentials>,
}

impl AppState {
    /// Build the state from configuration over an opened store.
    pub fn new(config: &IntakeConfig, store: Arc<dyn LogStore>) -> Self {
        let limiter = config
            .rate_limiting
            .enabled
            .then(|| Arc::new(LimiterRegistry::from_config(&config.rate_limiting)));

        let writer = Arc::new(ResilientWriter::new(
            Arc::clone(&store),
            RetryPolicy::from_config(&config.storage),
        ));

        let credentials = config
            .auth
            .credentials()
            .map(|(username, password)| Credentials::new(username, password));

        Self {
            limiter,
            sessions: Arc::new(SessionStore::from_config(&config.sessions)),
            store,
            writer,
            credentials,
        }
    }

    /// Start the background sweeps: bucket eviction, session expiry and,
    /// when retention is enabled, log pruning.
    pub fn spawn_maintenance(&self, config: &IntakeConfig) -> Vec<SweepHandle> {
        let mut handles = Vec::with_capacity(3);

        if let Some(limiter) = &self.limiter {
            handles.push(limiter.spawn_sweeper(config.rate_limiting.cleanup_interval()));
        }

        handles.push(
            self.sessions
                .spawn_sweeper(config.sessions.cleanup_interval()),
        );

        if let Some(retention) = config.storage.retention() {
            let store = Arc::clone(&self.store);
            handles.push(spawn_periodic(
                "log-retention",
                config.storage.retention_interval(),
                move || {
                    let store = Arc::clone(&store);
                    async move {
                        let cutoff = Utc::now() - retention;
                        match store.prune_before(cutoff).await {
                            Ok(0) => {}
                            Ok(pruned) => {
                                info!(pruned = pruned, cutoff = %cutoff, "Pruned old request logs")
                            }
                            Err(e) => warn!(error = %e, "Failed to prune old request logs"),
                        }
                    }
                },
            ));
        }

        handles
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("rate_limiting", &self.limiter.is_some())
            .field("sessions", &self.sessions.len())
            .field("credentials", &self.credentials)
            .finish()
    }
}
