//! Background sweeps.
//!
//! Two periodic loops run for the lifetime of the process: the liveness
//! sweep flips silent workers to inactive, the reclamation sweep returns
//! their stalled tasks to the queue. Each tick first takes a named lease in
//! the store, so at most one instance of a sweep runs at a time even with
//! several dispatcher processes pointed at the same store.

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use reyestr_db::Db;

use crate::metrics::add_task_reclaimed_count;
use crate::HostState;

const LIVENESS_LEASE: &str = "liveness";
const RECLAIM_LEASE: &str = "reclaim";

pub fn spawn_sweeps(state: HostState) {
    tokio::spawn(liveness_loop(state.clone()));
    tokio::spawn(reclaim_loop(state));
}

/// Flips workers without a recent heartbeat to inactive. Runs at half the
/// expected heartbeat interval so a silent worker is noticed promptly.
async fn liveness_loop(state: HostState) {
    let period = Duration::from_secs((state.opts.heartbeat_interval / 2).max(1));
    let threshold = chrono::Duration::seconds(state.opts.inactivity_threshold as i64);
    let lease = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::seconds(30));

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match state.db.try_sweep_lease(LIVENESS_LEASE, lease).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                warn!("Liveness sweep could not take its lease: {error}");
                continue;
            }
        }

        match state.db.mark_inactive(threshold).await {
            Ok(flipped) if !flipped.is_empty() => {
                info!("Marked {} worker(s) inactive: {flipped:?}", flipped.len());
            }
            Ok(_) => {}
            Err(error) => warn!("Liveness sweep failed: {error}"),
        }
    }
}

/// Returns held tasks of silent workers to the queue. Reclamation is not a
/// failure; the task simply becomes claimable again.
async fn reclaim_loop(state: HostState) {
    let period = Duration::from_secs(state.opts.reclaim_interval.max(1));
    let threshold = chrono::Duration::seconds(state.opts.inactivity_threshold as i64);
    let lease = chrono::Duration::from_std(period).unwrap_or(chrono::Duration::seconds(60));

    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        match state.db.try_sweep_lease(RECLAIM_LEASE, lease).await {
            Ok(true) => {}
            Ok(false) => continue,
            Err(error) => {
                warn!("Reclamation sweep could not take its lease: {error}");
                continue;
            }
        }

        match state.db.reclaim_stalled(threshold).await {
            Ok(reclaimed) if !reclaimed.is_empty() => {
                info!(
                    "Returned {} stalled task(s) to the queue: {reclaimed:?}",
                    reclaimed.len()
                );
                add_task_reclaimed_count(reclaimed.len() as u64);
                state.cache.invalidate_prefix("tasks:").await;
            }
            Ok(_) => {}
            Err(error) => warn!("Reclamation sweep failed: {error}"),
        }
    }
}
