//! Periodic full sync pass

use crate::engine::SyncEngine;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Runs a full pass every `period` until `shutdown` is cancelled.
///
/// The first pass starts immediately. A pass that overruns the period
/// delays the next one instead of stacking passes.
pub async fn run_periodic(engine: Arc<SyncEngine>, period: Duration, shutdown: CancellationToken) {
    info!("Periodic sync every {}", humantime::format_duration(period));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if let Err(e) = engine.sync_all(&shutdown).await {
            error!("Sync pass failed: {}", e);
        }
    }
    info!("Periodic sync stopped");
}
