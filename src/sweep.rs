//! Periodic background maintenance.
//!
//! Eviction of idle rate-limit buckets, purging of expired sessions and log
//! retention all run as independent tokio tasks on their own interval. Each
//! task is owned through a [`SweepHandle`] that can stop and join it during
//! shutdown. A sweep interrupted half-way leaves the maps consistent, because
//! every entry is also evaluated lazily on access.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{IntakeError, Result};

/// Shortest accepted sweep period; tokio intervals reject zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Handle to a running periodic task.
#[derive(Debug)]
pub struct SweepHandle {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Name of the task, used in logs.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has stopped.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signal the task to stop and wait for it to finish.
    pub async fn shutdown(self) -> Result<()> {
        // The receiver may already be gone if the task panicked
        let _ = self.shutdown_tx.send(true);

        self.task
            .await
            .map_err(|e| IntakeError::Task(format!("{} task failed: {}", self.name, e)))?;

        info!(task = self.name, "Background task stopped");
        Ok(())
    }
}

/// Spawn `tick` every `period` until the returned handle is shut down.
///
/// The first run happens one full period after spawning. Ticks that fall
/// behind are delayed rather than bunched up.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> SweepHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(MIN_PERIOD);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        debug!(task = name, period_ms = period.as_millis() as u64, "Background task started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    SweepHandle {
        name,
        shutdown_tx,
        task,
    }
}

/// Shut down every handle, reporting the first failure after joining them all.
pub async fn shutdown_all(handles: Vec<SweepHandle>) -> Result<()> {
    let mut first_error = None;

    for handle in handles {
        if let Err(e) = handle.shutdown().await {
            first_error.get_or_insert(e);
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
