use std::net::SocketAddr;

use crate::model::Role;
use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "bookd_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "bookd_query_duration_seconds";

// ── Booking lifecycle ───────────────────────────────────────────

/// Counter: reservations created (always WAITING).
pub const RESERVATIONS_CREATED_TOTAL: &str = "bookd_reservations_created_total";

/// Counter: owner decisions. Labels: status (APPROVED / REJECTED).
pub const RESERVATION_TRANSITIONS_TOTAL: &str = "bookd_reservation_transitions_total";

// ── USE metrics (resource utilization) ──────────────────────────

pub const CONNECTIONS_ACTIVE: &str = "bookd_connections_active";
pub const CONNECTIONS_TOTAL: &str = "bookd_connections_total";
/// Counter: connections refused at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "bookd_connections_rejected_total";
/// Gauge: tenants with a loaded engine.
pub const TENANTS_ACTIVE: &str = "bookd_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "bookd_wal_flush_duration_seconds";

/// Histogram: events per WAL group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "bookd_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op without a port.
pub fn init(port: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a command.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertParty { .. } => "insert_party",
        Command::InsertItem { .. } => "insert_item",
        Command::InsertReservation { .. } => "create_reservation",
        Command::UpdateReservation { approved: true, .. } => "approve_reservation",
        Command::UpdateReservation { approved: false, .. } => "reject_reservation",
        Command::SelectReservation { .. } => "get_reservation",
        Command::SelectReservations { role: Role::Booker, .. } => "list_booker_reservations",
        Command::SelectReservations { role: Role::Owner, .. } => "list_owner_reservations",
        Command::SelectItemBookings { .. } => "item_bookings",
        Command::SelectCompletedBookings { .. } => "completed_bookings",
    }
}
