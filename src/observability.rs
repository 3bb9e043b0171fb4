use std::net::SocketAddr;

use crate::coordinator::BookingError;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: boundary operations handled. Labels: operation, outcome.
pub const REQUESTS_TOTAL: &str = "salonslot_requests_total";

/// Histogram: boundary operation latency in seconds. Labels: operation.
pub const REQUEST_DURATION_SECONDS: &str = "salonslot_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Histogram: time spent queued for a slot turn, in seconds.
pub const SLOT_TURN_WAIT_SECONDS: &str = "salonslot_slot_turn_wait_seconds";

/// Gauge: slot-turn registry entries. Labels: tenant.
pub const SLOT_TURNS_ACTIVE: &str = "salonslot_slot_turns_active";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "salonslot_tenants_active";

/// Counter: reverse-index entries rebuilt by the fallback scan.
pub const INDEX_REPAIRS_TOTAL: &str = "salonslot_index_repairs_total";

/// Counter: notification deliveries that failed.
pub const NOTIFY_FAILURES_TOTAL: &str = "salonslot_notify_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "salonslot_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "salonslot_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Short outcome label for a boundary operation result.
pub fn outcome_label<T>(result: &Result<T, BookingError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(BookingError::Validation(_)) => "validation",
        Err(BookingError::Conflict(code)) => code.as_str(),
        Err(BookingError::NotFound(_)) => "not_found",
        Err(BookingError::Timeout) => "timeout",
        Err(BookingError::Unavailable(_)) => "unavailable",
        Err(BookingError::Internal(_)) => "internal",
    }
}

/// Count one finished operation and record its latency.
pub fn record_request<T>(operation: &'static str, started: std::time::Instant, result: &Result<T, BookingError>) {
    metrics::counter!(REQUESTS_TOTAL, "operation" => operation, "outcome" => outcome_label(result))
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}
