use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDateTime, TimeDelta};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::Engine;
use crate::observability as obs;

/// Cancel every booking still pending after `grace` has elapsed since its
/// creation. Rows that fail are logged and skipped. Returns how many were
/// cancelled.
pub async fn sweep_expired(engine: &Engine, now: NaiveDateTime, grace: Duration) -> usize {
    let started = std::time::Instant::now();
    let Some(cutoff) = TimeDelta::from_std(grace)
        .ok()
        .and_then(|g| now.checked_sub_signed(g))
    else {
        return 0;
    };

    let mut expired = 0;
    for booking_id in engine.collect_expired_pending(cutoff).await {
        match engine.expire_pending(booking_id, cutoff).await {
            Ok(true) => {
                expired += 1;
                info!(booking_id, "expired unconfirmed booking");
            }
            // Confirmed or cancelled since it was collected
            Ok(false) => debug!(booking_id, "sweeper skip: no longer pending"),
            Err(e) => error!(booking_id, "sweeper failed to expire booking: {e}"),
        }
    }
    metrics::histogram!(obs::SWEEP_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
    expired
}

/// Periodically expire stale pending bookings until `shutdown` fires.
pub async fn run_sweeper(
    engine: Arc<Engine>,
    every: Duration,
    grace: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let n = sweep_expired(&engine, engine.now(), grace).await;
                if n > 0 {
                    info!("sweep cancelled {n} expired bookings");
                }
            }
        }
    }
    info!("sweeper stopped");
}

/// Periodically compact the WAL once `threshold` appends have accumulated.
pub async fn run_compactor(
    engine: Arc<Engine>,
    threshold: u64,
    every: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let appends = engine.wal_appends_since_compact().await;
                if appends < threshold {
                    continue;
                }
                match engine.compact_wal().await {
                    Ok(()) => {
                        metrics::counter!(obs::WAL_COMPACTIONS_TOTAL).increment(1);
                        info!("compacted WAL after {appends} appends");
                    }
                    Err(e) => error!("WAL compaction failed: {e}"),
                }
            }
        }
    }
}
