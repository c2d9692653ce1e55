use chrono::Datelike;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_interval(stay: &Interval) -> Result<(), EngineError> {
    if stay.start >= stay.end {
        return Err(EngineError::InvalidInterval("check-out must be after check-in"));
    }
    for point in [stay.start, stay.end] {
        let year = point.date.year();
        if !(MIN_VALID_YEAR..=MAX_VALID_YEAR).contains(&year) {
            return Err(EngineError::InvalidInterval("date out of range"));
        }
    }
    Ok(())
}

/// Active reservations on the room overlapping `stay`, other than `exclude`.
pub(crate) fn find_conflicts(
    rs: &RoomState,
    stay: &Interval,
    exclude: Option<Ulid>,
) -> Vec<ConflictInfo> {
    rs.active_overlapping(stay)
        .filter(|r| Some(r.id) != exclude)
        .map(Reservation::summary)
        .collect()
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &Interval,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    let conflicts = find_conflicts(rs, stay, exclude);
    if conflicts.is_empty() {
        return Ok(());
    }
    metrics::counter!(crate::observability::SCHEDULE_CONFLICTS_TOTAL).increment(1);
    Err(EngineError::ScheduleConflict(conflicts))
}

/// Room-level guard for checking `guest` in at `now`.
///
/// A different checked-in reservation is a hard stop. An earlier booking that
/// has not arrived yet but whose stay covers `now` needs staff to confirm the
/// override (`force`).
pub(crate) fn check_in_guard(
    rs: &RoomState,
    guest: &Reservation,
    now: TimePoint,
    force: bool,
) -> Result<(), EngineError> {
    if let Some(occupant) = rs
        .reservations
        .iter()
        .find(|r| r.id != guest.id && r.status == ReservationStatus::CheckedIn)
    {
        return Err(EngineError::RoomOccupied(occupant.summary()));
    }
    if force {
        return Ok(());
    }
    let earlier = rs.reservations.iter().find(|r| {
        r.id != guest.id
            && matches!(
                r.status,
                ReservationStatus::PendingPayment
                    | ReservationStatus::Pending
                    | ReservationStatus::Confirmed
            )
            && r.stay.start < guest.stay.start
            && r.stay.contains(now)
    });
    match earlier {
        Some(r) => Err(EngineError::EarlierBookingPending(r.summary())),
        None => Ok(()),
    }
}
