//! Background retention sweeper
//!
//! One task per process, started at boot. Sleeps for the configured
//! interval, then deletes every stored file older than the retention age.
//! Stops when the shared cancellation token fires.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::store::ContentStore;

/// Timing of the sweeper loop
#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    /// Pause between two passes
    pub interval: Duration,
    /// Files last modified longer ago than this are deleted
    pub max_age: Duration,
}

/// Spawn the sweeper on the current runtime
pub fn spawn(
    store: Arc<ContentStore>,
    policy: SweepPolicy,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = policy.interval.as_secs(),
            max_age_secs = policy.max_age.as_secs(),
            "sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(policy.interval) => {}
            }

            let store = Arc::clone(&store);
            // Directory scans and deletes are blocking I/O
            match tokio::task::spawn_blocking(move || store.sweep(policy.max_age)).await {
                Ok(removed) => debug!(removed, "sweep pass finished"),
                Err(e) => error!(error = %e, "sweep pass panicked"),
            }
        }

        info!("sweeper stopped");
    })
}
