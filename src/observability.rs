use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total statements executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "spelplaut_queries_total";

/// Histogram: statement latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "spelplaut_query_duration_seconds";

/// Counter: reservation requests. Labels: outcome.
pub const RESERVATION_REQUESTS_TOTAL: &str = "spelplaut_reservation_requests_total";

/// Counter: reservations moved to completed by the sweeper.
pub const RESERVATIONS_COMPLETED_TOTAL: &str = "spelplaut_reservations_completed_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "spelplaut_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "spelplaut_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "spelplaut_connections_rejected_total";

/// Gauge: courts currently loaded.
pub const COURTS_ACTIVE: &str = "spelplaut_courts_active";

/// Counter: logins refused by the rate limiter.
pub const LOGINS_THROTTLED_TOTAL: &str = "spelplaut_logins_throttled_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "spelplaut_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "spelplaut_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::InsertCourt { .. } => "insert_court",
        Command::UpdateCourt { .. } => "update_court",
        Command::DeleteCourt { .. } => "delete_court",
        Command::BlockDate { .. } => "block_date",
        Command::UnblockDate { .. } => "unblock_date",
        Command::InsertReservation { .. } => "insert_reservation",
        Command::Reschedule { .. } => "reschedule",
        Command::SetState { .. } => "set_state",
        Command::SetPaid { .. } => "set_paid",
        Command::SelectCourts { .. } => "select_courts",
        Command::SelectReservations { .. } => "select_reservations",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectFreeRanges { .. } => "select_free_ranges",
        Command::SelectReport { .. } => "select_report",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[test]
    fn labels_are_snake_case() {
        let cmd = Command::SetPaid {
            id: Ulid::new(),
            paid: true,
        };
        assert_eq!(command_label(&cmd), "set_paid");
        assert!(init(None).is_ok());
    }
}
