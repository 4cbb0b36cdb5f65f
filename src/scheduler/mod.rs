//! Periodic reconciliation
//!
//! The lifecycle core never schedules itself; `serve` starts this loop when a
//! reconcile interval is configured.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use crate::deployment::ReconciliationReporter;

/// Spawn the reconcile loop as a background task.
///
/// Send on (or drop) the returned sender to stop it.
pub fn spawn_reconcile_loop(
    reporter: ReconciliationReporter,
    every: Duration,
) -> watch::Sender<()> {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(());

    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Reconciler started, running every {}s", every.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = reporter.reconcile_running().await {
                        error!("Reconciliation sweep failed: {}", e);
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Reconciler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_tx
}
