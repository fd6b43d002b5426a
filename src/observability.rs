use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

// ── Booking flow ────────────────────────────────────────────────

/// Counter: reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "roombook_reservations_created_total";

/// Counter: create/edit attempts refused because the range was taken.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "roombook_reservation_conflicts_total";

/// Counter: status changes applied. Labels: transition.
pub const TRANSITIONS_TOTAL: &str = "roombook_transitions_total";

/// Counter: check-ins refused. Labels: reason.
pub const CHECK_IN_REJECTED_TOTAL: &str = "roombook_check_in_rejected_total";

// ── Locks ───────────────────────────────────────────────────────

/// Counter: space lock waits that hit the timeout.
pub const LOCK_CONTENTION_TOTAL: &str = "roombook_lock_contention_total";

/// Histogram: time spent waiting for a space lock, seconds.
pub const LOCK_WAIT_SECONDS: &str = "roombook_lock_wait_seconds";

/// Histogram: time a space lock was held, seconds.
pub const LOCK_HOLD_SECONDS: &str = "roombook_lock_hold_seconds";

/// Gauge: registered spaces.
pub const SPACES_ACTIVE: &str = "roombook_spaces_active";

// ── Reminders ───────────────────────────────────────────────────

pub const REMINDERS_SENT_TOTAL: &str = "roombook_reminders_sent_total";

/// Counter: reminders claimed but not delivered.
pub const REMINDERS_FAILED_TOTAL: &str = "roombook_reminders_failed_total";

// ── Journal ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "roombook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "roombook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
