use std::net::SocketAddr;

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: bookings admitted. Labels: status (initial status).
pub const BOOKINGS_CREATED_TOTAL: &str = "tablebook_bookings_created_total";

/// Counter: create/update requests refused by admission. Labels: reason.
pub const ADMISSIONS_REJECTED_TOTAL: &str = "tablebook_admissions_rejected_total";

/// Counter: bookings cancelled by users or admins.
pub const BOOKINGS_CANCELLED_TOTAL: &str = "tablebook_bookings_cancelled_total";

/// Counter: pending bookings cancelled by the sweeper.
pub const BOOKINGS_EXPIRED_TOTAL: &str = "tablebook_bookings_expired_total";

// ── Background work ─────────────────────────────────────────────

/// Histogram: duration of one sweep in seconds.
pub const SWEEP_DURATION_SECONDS: &str = "tablebook_sweep_duration_seconds";

/// Counter: WAL compactions performed.
pub const WAL_COMPACTIONS_TOTAL: &str = "tablebook_wal_compactions_total";

// ── Storage ─────────────────────────────────────────────────────

/// Gauge: restaurants loaded.
pub const RESTAURANTS_ACTIVE: &str = "tablebook_restaurants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablebook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablebook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), metrics_exporter_prometheus::BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
