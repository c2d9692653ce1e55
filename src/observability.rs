use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::protocol::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: requests handled. Labels: op, status.
pub const REQUESTS_TOTAL: &str = "innkeep_requests_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "innkeep_request_duration_seconds";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: open TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "innkeep_connections_active";

pub const CONNECTIONS_TOTAL: &str = "innkeep_connections_total";

/// Counter: connections turned away at the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "innkeep_connections_rejected_total";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "innkeep_wal_flush_duration_seconds";

/// Histogram: events per group-commit flush.
pub const WAL_FLUSH_BATCH_SIZE: &str = "innkeep_wal_flush_batch_size";

// ── Booking metrics ─────────────────────────────────────────────

pub const RESERVATIONS_CREATED_TOTAL: &str = "innkeep_reservations_created_total";

/// Counter: committed lifecycle transitions. Labels: action.
pub const TRANSITIONS_TOTAL: &str = "innkeep_transitions_total";

/// Counter: requests rejected by the overlap guard.
pub const SCHEDULE_CONFLICTS_TOTAL: &str = "innkeep_schedule_conflicts_total";

pub const ROOM_CHANGES_TOTAL: &str = "innkeep_room_changes_total";

/// Install the Prometheus exporter on `port`. No-op if port is None.
pub fn init(port: Option<u16>) -> Result<(), BuildError> {
    let Some(port) = port else { return Ok(()) };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
    Ok(())
}

/// Short metrics label for a request.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::RegisterRoom { .. } => "register_room",
        Request::SetRoomStatus { .. } => "set_room_status",
        Request::ListRooms => "list_rooms",
        Request::CheckAvailability { .. } => "check_availability",
        Request::MergeBusy { .. } => "merge_busy",
        Request::FreeSlots { .. } => "free_slots",
        Request::SuggestRooms { .. } => "suggest_rooms",
        Request::Quote { .. } => "quote",
        Request::CreateReservation { .. } => "create_reservation",
        Request::GetReservation { .. } => "get_reservation",
        Request::ListReservations { .. } => "list_reservations",
        Request::Transition { .. } => "transition",
        Request::ChangeRoom { .. } => "change_room",
        Request::Reschedule { .. } => "reschedule",
        Request::RecordRefund { .. } => "record_refund",
        Request::Subscribe { .. } => "subscribe",
        Request::Unsubscribe => "unsubscribe",
        Request::Ping => "ping",
    }
}
