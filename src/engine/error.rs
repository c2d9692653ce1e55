use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{ConflictInfo, ReservationStatus};

/// Stable classification of engine errors, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ScheduleConflict,
    InvalidTransition,
    EarlierBookingPending,
    RoomOccupied,
    AlreadyInState,
    NotFound,
    AlreadyExists,
    InvalidInterval,
    InvalidAmount,
    InvalidRequest,
    UnknownAddon,
    ServiceUnavailable,
    UnknownGuest,
    LimitExceeded,
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// The requested interval overlaps these active reservations.
    ScheduleConflict(Vec<ConflictInfo>),
    InvalidTransition {
        status: ReservationStatus,
        action: &'static str,
    },
    /// An earlier booking still holds the room; retry with `force` to override.
    EarlierBookingPending(ConflictInfo),
    /// Another guest is checked in. Not overridable.
    RoomOccupied(ConflictInfo),
    /// Duplicate action; nothing changed.
    AlreadyInState(ReservationStatus),
    InvalidInterval(&'static str),
    InvalidAmount(&'static str),
    InvalidRequest(&'static str),
    UnknownAddon(Ulid),
    ServiceUnavailable(Ulid),
    UnknownGuest(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            EngineError::ScheduleConflict(_) => ErrorKind::ScheduleConflict,
            EngineError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            EngineError::EarlierBookingPending(_) => ErrorKind::EarlierBookingPending,
            EngineError::RoomOccupied(_) => ErrorKind::RoomOccupied,
            EngineError::AlreadyInState(_) => ErrorKind::AlreadyInState,
            EngineError::InvalidInterval(_) => ErrorKind::InvalidInterval,
            EngineError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            EngineError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            EngineError::UnknownAddon(_) => ErrorKind::UnknownAddon,
            EngineError::ServiceUnavailable(_) => ErrorKind::ServiceUnavailable,
            EngineError::UnknownGuest(_) => ErrorKind::UnknownGuest,
            EngineError::LimitExceeded(_) => ErrorKind::LimitExceeded,
            EngineError::WalError(_) => ErrorKind::Storage,
        }
    }

    /// Reservations the caller needs to see to correct the request.
    pub fn conflicts(&self) -> &[ConflictInfo] {
        match self {
            EngineError::ScheduleConflict(list) => list,
            EngineError::EarlierBookingPending(info) | EngineError::RoomOccupied(info) => {
                std::slice::from_ref(info)
            }
            _ => &[],
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::ScheduleConflict(list) => {
                write!(f, "schedule conflict with")?;
                for (i, c) in list.iter().enumerate() {
                    let sep = if i == 0 { " " } else { ", " };
                    write!(f, "{sep}{} ({}) {}", c.code, c.guest, c.stay)?;
                }
                Ok(())
            }
            EngineError::InvalidTransition { status, action } => {
                write!(f, "invalid transition: {action} not allowed from {status}")
            }
            EngineError::EarlierBookingPending(c) => write!(
                f,
                "earlier booking {} ({}) {} has not checked in; confirm and retry with force",
                c.code, c.guest, c.stay
            ),
            EngineError::RoomOccupied(c) => {
                write!(f, "room occupied by {} ({})", c.code, c.guest)
            }
            EngineError::AlreadyInState(status) => write!(f, "already {status}"),
            EngineError::InvalidInterval(msg) => write!(f, "invalid interval: {msg}"),
            EngineError::InvalidAmount(msg) => write!(f, "invalid amount: {msg}"),
            EngineError::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
            EngineError::UnknownAddon(id) => write!(f, "add-on not offered by this room: {id}"),
            EngineError::ServiceUnavailable(id) => write!(f, "service unavailable: {id}"),
            EngineError::UnknownGuest(user) => write!(f, "unknown guest: {user}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
