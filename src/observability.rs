use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total queries executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "agenda_queries_total";

/// Histogram: query latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "agenda_query_duration_seconds";

/// Counter: bookings rejected. Labels: reason (unavailable, conflict).
pub const BOOKING_REJECTED_TOTAL: &str = "agenda_booking_rejected_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "agenda_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "agenda_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "agenda_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "agenda_tenants_active";

/// Counter: startup/auth failures.
pub const AUTH_FAILURES_TOTAL: &str = "agenda_auth_failures_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "agenda_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "agenda_wal_flush_batch_size";

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

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertProfessional { .. } => "insert_professional",
        Command::UpdateProfessional { .. } => "update_professional",
        Command::DeleteProfessional { .. } => "delete_professional",
        Command::InsertWindow { .. } => "insert_window",
        Command::DeleteWindow { .. } => "delete_window",
        Command::InsertBreak { .. } => "insert_break",
        Command::DeleteBreak { .. } => "delete_break",
        Command::InsertDayOff { .. } => "insert_day_off",
        Command::DeleteDayOff { .. } => "delete_day_off",
        Command::InsertAppointment { .. } => "insert_appointment",
        Command::UpdateAppointmentStatus { .. } => "update_appointment_status",
        Command::SelectProfessionals => "select_professionals",
        Command::SelectWindows { .. } => "select_windows",
        Command::SelectBreaks { .. } => "select_breaks",
        Command::SelectDaysOff { .. } => "select_days_off",
        Command::SelectAppointments { .. } => "select_appointments",
        Command::SelectSlots { .. } => "select_slots",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
        Command::UnlistenAll => "unlisten_all",
    }
}
