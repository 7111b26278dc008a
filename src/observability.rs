use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::engine::EngineError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: engine mutations. Labels: op, outcome.
pub const MUTATIONS_TOTAL: &str = "slotbook_mutations_total";

/// Histogram: mutation latency in seconds, including retries. Labels: op.
pub const MUTATION_DURATION_SECONDS: &str = "slotbook_mutation_duration_seconds";

/// Counter: rejected candidates by conflict scope. Labels: scope.
pub const CONFLICTS_TOTAL: &str = "slotbook_conflicts_total";

/// Counter: transactions retried after transient contention. Labels: op.
pub const TRANSACTION_RETRIES_TOTAL: &str = "slotbook_transaction_retries_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: live bookings.
pub const BOOKINGS_ACTIVE: &str = "slotbook_bookings_active";

/// Gauge: live slots on the shared timeline.
pub const SLOTS_ACTIVE: &str = "slotbook_slots_active";

/// Histogram: WAL commit (append + fsync) duration in seconds.
pub const WAL_COMMIT_DURATION_SECONDS: &str = "slotbook_wal_commit_duration_seconds";

/// Histogram: events per WAL commit record.
pub const WAL_COMMIT_EVENTS: &str = "slotbook_wal_commit_events";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short label for the outcome of a mutation.
pub fn outcome_label<T>(result: &Result<T, EngineError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(e) => e.kind_label(),
    }
}

/// Conflict scope label, if the error is a conflict.
pub fn conflict_scope(err: &EngineError) -> Option<&'static str> {
    match err {
        EngineError::IntraRequestConflict { .. } => Some("request"),
        EngineError::IntraBookingConflict { .. } => Some("booking"),
        EngineError::SystemConflict { .. } => Some("system"),
        _ => None,
    }
}
