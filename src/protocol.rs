//! Newline-delimited JSON protocol: one request object per line, tagged by
//! `op`, answered by exactly one response line.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use ulid::Ulid;

use crate::engine::{
    Action, EngineError, ErrorKind, ReservationRequest, ServiceSelection, StayRequest,
};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;

/// Parsed request from one input line.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    RegisterRoom {
        room: Room,
    },
    SetRoomStatus {
        room_id: Ulid,
        status: RoomStatus,
    },
    ListRooms,
    CheckAvailability {
        room_id: Ulid,
        stay: Interval,
    },
    MergeBusy {
        room_id: Ulid,
        day: NaiveDate,
    },
    FreeSlots {
        room_id: Ulid,
        #[serde(default)]
        window_days: Option<u32>,
    },
    SuggestRooms {
        reservation_id: Ulid,
    },
    Quote {
        room_id: Ulid,
        stay: StayRequest,
        #[serde(default)]
        addons: Vec<Ulid>,
        #[serde(default)]
        services: Vec<ServiceSelection>,
    },
    CreateReservation {
        reservation: ReservationRequest,
    },
    GetReservation {
        reservation_id: Ulid,
    },
    ListReservations {
        room_id: Ulid,
    },
    Transition {
        reservation_id: Ulid,
        action: Action,
    },
    ChangeRoom {
        reservation_id: Ulid,
        new_room_id: Ulid,
    },
    Reschedule {
        reservation_id: Ulid,
        stay: StayRequest,
    },
    RecordRefund {
        reservation_id: Ulid,
        amount: Amount,
    },
    /// Start streaming notices on this connection; all rooms when `room_id`
    /// is absent.
    Subscribe {
        #[serde(default)]
        room_id: Option<Ulid>,
    },
    Unsubscribe,
    Ping,
}

#[derive(Debug)]
pub enum ProtocolError {
    Empty,
    TooLong(usize),
    Parse(String),
}

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::TooLong(_) => ErrorKind::LimitExceeded,
            ProtocolError::Empty | ProtocolError::Parse(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::Empty => write!(f, "empty request"),
            ProtocolError::TooLong(n) => {
                write!(f, "request of {n} bytes exceeds {MAX_LINE_LEN} bytes")
            }
            ProtocolError::Parse(s) => write!(f, "parse error: {s}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

pub fn parse_request(line: &str) -> Result<Request, ProtocolError> {
    if line.len() > MAX_LINE_LEN {
        return Err(ProtocolError::TooLong(line.len()));
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(ProtocolError::Empty);
    }
    serde_json::from_str(trimmed).map_err(|e| ProtocolError::Parse(e.to_string()))
}

// ── Response lines ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
    /// Reservations standing in the way, when there are any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<ConflictInfo>,
}

impl From<&EngineError> for ErrorBody {
    fn from(e: &EngineError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            detail: e.conflicts().to_vec(),
        }
    }
}

impl From<&ProtocolError> for ErrorBody {
    fn from(e: &ProtocolError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            detail: Vec::new(),
        }
    }
}

pub fn success_line<T: Serialize>(data: &T) -> String {
    match serde_json::to_value(data) {
        Ok(data) => json!({ "ok": true, "data": data }).to_string(),
        Err(e) => failure_line(&ErrorBody {
            kind: ErrorKind::InvalidRequest,
            message: format!("unserializable response: {e}"),
            detail: Vec::new(),
        }),
    }
}

pub fn failure_line(body: &ErrorBody) -> String {
    let detail: Vec<Value> = body
        .detail
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .collect();
    let mut error = json!({ "kind": body.kind, "message": body.message });
    if !detail.is_empty() {
        error["detail"] = Value::Array(detail);
    }
    json!({ "ok": false, "error": error }).to_string()
}

pub fn notice_line(notice: &Notice) -> String {
    match serde_json::to_value(notice) {
        Ok(notice) => json!({ "notice": notice }).to_string(),
        Err(e) => json!({ "notice": null, "error": e.to_string() }).to_string(),
    }
}
