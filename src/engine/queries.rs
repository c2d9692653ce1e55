use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{self, rank_candidates, FreeSlots};
use super::conflict::{find_conflicts, validate_interval};
use super::mutations::ServiceSelection;
use super::pricing::{self, StayRequest};
use super::{Engine, EngineError};

impl Engine {
    /// Active reservations on the room that overlap `stay`. Empty means free.
    pub async fn check_availability(
        &self,
        room_id: Ulid,
        stay: Interval,
    ) -> Result<Vec<ConflictInfo>, EngineError> {
        validate_interval(&stay)?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(find_conflicts(&guard, &stay, None))
    }

    pub async fn merge_busy(&self, room_id: Ulid, day: NaiveDate) -> Result<Vec<Interval>, EngineError> {
        validate_interval(&Interval::whole_day(day))?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(availability::merge_busy(&guard, day))
    }

    /// Free periods per day for `window_days` days starting today.
    pub async fn free_slots(
        &self,
        room_id: Ulid,
        window_days: Option<u32>,
    ) -> Result<FreeSlots, EngineError> {
        let days = window_days.unwrap_or(DEFAULT_WINDOW_DAYS);
        if days == 0 {
            return Err(EngineError::InvalidRequest("window must cover at least one day"));
        }
        if days > MAX_WINDOW_DAYS {
            return Err(EngineError::LimitExceeded("window too wide"));
        }
        let today = self.clock.now().date;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(FreeSlots::capture(&guard, today, days))
    }

    /// Rooms the reservation could move to, best first.
    pub async fn suggest_rooms(&self, reservation_id: Ulid) -> Result<Vec<RankedRoom>, EngineError> {
        let reservation = self.get_reservation(reservation_id).await?;

        let rooms: Vec<_> = self
            .state
            .iter()
            .filter(|e| *e.key() != reservation.room_id)
            .map(|e| e.value().clone())
            .collect();

        let mut candidates = Vec::new();
        for rs in rooms {
            let guard = rs.read().await;
            if !find_conflicts(&guard, &reservation.stay, Some(reservation.id)).is_empty() {
                continue;
            }
            candidates.push(RankedRoom {
                room_id: guard.room.id,
                number: guard.room.number,
                status: guard.room.status,
                estimated_charge: pricing::estimate_for(&guard.room, &reservation),
                recommended: false,
            });
        }
        Ok(rank_candidates(candidates))
    }

    /// Price a prospective stay without booking it.
    pub async fn quote(
        &self,
        room_id: Ulid,
        stay: &StayRequest,
        addon_ids: &[Ulid],
        services: &[ServiceSelection],
    ) -> Result<Quote, EngineError> {
        let resolved = pricing::resolve_stay(stay, self.settings.overnight_checkout)?;
        let lines = self.resolve_services(services).await?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let charges = pricing::price(&guard.room, &resolved, addon_ids, &lines)?;
        Ok(Quote {
            mode: resolved.mode,
            stay: resolved.stay,
            hours: resolved.hours,
            charges,
        })
    }

    pub async fn get_reservation(&self, reservation_id: Ulid) -> Result<Reservation, EngineError> {
        for _ in 0..super::LOCK_ATTEMPTS {
            let room_id = self
                .room_of(&reservation_id)
                .ok_or(EngineError::NotFound(reservation_id))?;
            let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
            let guard = rs.read().await;
            if let Some(r) = guard.reservation(&reservation_id) {
                return Ok(r.clone());
            }
        }
        Err(EngineError::NotFound(reservation_id))
    }

    /// Every reservation ever placed on the room, by check-in.
    pub async fn list_reservations(&self, room_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        Ok(guard.reservations.clone())
    }

    /// All rooms ordered by room number.
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let rooms: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(rooms.len());
        for rs in rooms {
            let guard = rs.read().await;
            out.push(RoomInfo {
                room: guard.room.clone(),
                active_reservations: guard.reservations.iter().filter(|r| r.is_active()).count(),
            });
        }
        out.sort_by_key(|info| (info.room.number, info.room.id));
        out
    }
}
