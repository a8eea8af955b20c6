use std::net::SocketAddr;

// ── Lifecycle metrics ───────────────────────────────────────────

/// Counter: booking creation attempts. Labels: outcome.
pub const BOOKINGS_CREATED_TOTAL: &str = "daybook_bookings_created_total";

/// Counter: booking status transitions. Labels: to.
pub const BOOKING_TRANSITIONS_TOTAL: &str = "daybook_booking_transitions_total";

/// Counter: bookings left with `payment_status=failed`. Labels: action.
pub const PAYMENT_RECONCILIATION_TOTAL: &str = "daybook_payment_reconciliation_total";

// ── Payment processor metrics ───────────────────────────────────

/// Counter: processor calls. Labels: verb, outcome.
pub const PAYMENT_CALLS_TOTAL: &str = "daybook_payment_calls_total";

/// Histogram: processor call latency in seconds. Labels: verb.
pub const PAYMENT_CALL_DURATION_SECONDS: &str = "daybook_payment_call_duration_seconds";

// ── Calendar metrics ────────────────────────────────────────────

/// Counter: bulk per-date outcomes. Labels: kind, outcome.
pub const BULK_DATES_TOTAL: &str = "daybook_bulk_dates_total";

/// Counter: watcher actions. Labels: action.
pub const WATCHER_ACTIONS_TOTAL: &str = "daybook_watcher_actions_total";

/// Gauge: registered vehicles.
pub const VEHICLES_ACTIVE: &str = "daybook_vehicles_active";

// ── Storage metrics ─────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "daybook_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "daybook_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}
