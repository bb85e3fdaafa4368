use std::net::SocketAddr;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "courtside_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "courtside_query_duration_seconds";

// ── Booking ─────────────────────────────────────────────────────

/// Counter: pending reservations created.
pub const RESERVATIONS_CREATED_TOTAL: &str = "courtside_reservations_created_total";

/// Counter: reservation attempts that lost the race for their slot.
pub const RESERVATION_CONFLICTS_TOTAL: &str = "courtside_reservation_conflicts_total";

/// Counter: pending reservations cancelled because payment never arrived.
pub const RESERVATIONS_EXPIRED_TOTAL: &str = "courtside_reservations_expired_total";

/// Counter: mutations that gave up waiting for a court's write lock.
pub const LOCK_TIMEOUTS_TOTAL: &str = "courtside_lock_timeouts_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "courtside_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "courtside_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "courtside_connections_rejected_total";

/// Gauge: clubs with an open engine.
pub const CLUBS_ACTIVE: &str = "courtside_clubs_active";

/// Counter: connections that failed to resolve their club.
pub const CLUB_OPEN_FAILURES_TOTAL: &str = "courtside_club_open_failures_total";

/// Histogram: journal group-commit sync duration in seconds.
pub const JOURNAL_SYNC_DURATION_SECONDS: &str = "courtside_journal_sync_duration_seconds";

/// Histogram: journal group-commit batch size (events per sync).
pub const JOURNAL_BATCH_SIZE: &str = "courtside_journal_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!(error = %e, "failed to install Prometheus metrics exporter"),
    }
}
