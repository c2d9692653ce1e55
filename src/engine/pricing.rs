//! Tariff arithmetic. Pure functions over a room's tariff and the resolved
//! stay; the engine calls these under the room lock so the price always
//! matches the room the reservation ends up on.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::validate_interval;
use super::EngineError;

/// Stay as described by the caller. Check-out is derived for Hourly and
/// Overnight, explicit for Daily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StayRequest {
    Hourly { check_in: TimePoint, hours: u32 },
    Overnight { check_in: TimePoint },
    Daily { check_in: TimePoint, check_out: TimePoint },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedStay {
    pub mode: RentalMode,
    pub stay: Interval,
    pub hours: Option<u32>,
}

/// Turn a stay request into a concrete `[check_in, check_out)` interval.
///
/// Overnight stays end at the first `overnight_checkout` strictly after
/// check-in.
pub fn resolve_stay(
    req: &StayRequest,
    overnight_checkout: NaiveTime,
) -> Result<ResolvedStay, EngineError> {
    let resolved = match *req {
        StayRequest::Hourly { check_in, hours } => {
            if hours == 0 {
                return Err(EngineError::InvalidInterval("hourly stay needs at least one hour"));
            }
            if hours > MAX_HOURLY_HOURS {
                return Err(EngineError::LimitExceeded("hourly stay too long"));
            }
            let check_out = check_in
                .checked_add_hours(hours)
                .ok_or(EngineError::InvalidInterval("date out of range"))?;
            ResolvedStay {
                mode: RentalMode::Hourly,
                stay: Interval { start: check_in, end: check_out },
                hours: Some(hours),
            }
        }
        StayRequest::Overnight { check_in } => {
            let out_date = if check_in.time < overnight_checkout {
                check_in.date
            } else {
                next_day(check_in.date)
            };
            ResolvedStay {
                mode: RentalMode::Overnight,
                stay: Interval {
                    start: check_in,
                    end: TimePoint::new(out_date, overnight_checkout),
                },
                hours: None,
            }
        }
        StayRequest::Daily { check_in, check_out } => ResolvedStay {
            mode: RentalMode::Daily,
            stay: Interval { start: check_in, end: check_out },
            hours: None,
        },
    };
    validate_interval(&resolved.stay)?;
    if resolved.mode == RentalMode::Daily && nights(&resolved.stay) > MAX_DAILY_NIGHTS {
        return Err(EngineError::LimitExceeded("daily stay too long"));
    }
    Ok(resolved)
}

/// Calendar nights covered by a stay, at least one.
pub fn nights(stay: &Interval) -> i64 {
    (stay.end.date - stay.start.date).num_days().max(1)
}

/// Whole hours covered by a stay, rounded up, at least one.
fn billable_hours(stay: &Interval) -> i64 {
    let minutes = stay.duration().num_minutes();
    ((minutes + 59) / 60).max(1)
}

pub fn room_charge(tariff: &Tariff, mode: RentalMode, stay: &Interval, hours: Option<u32>) -> Amount {
    match mode {
        RentalMode::Hourly => {
            let h = hours.map(i64::from).unwrap_or_else(|| billable_hours(stay)).max(1);
            tariff.first_hour + (h - 1) * tariff.additional_hour
        }
        RentalMode::Overnight => tariff.overnight,
        RentalMode::Daily => nights(stay) * tariff.daily,
    }
}

/// Add-ons are charged once per stay; free add-ons contribute 0.
pub fn addon_charge(room: &Room, addon_ids: &[Ulid]) -> Result<Amount, EngineError> {
    let mut total = 0;
    for (i, id) in addon_ids.iter().enumerate() {
        if addon_ids[..i].contains(id) {
            return Err(EngineError::InvalidRequest("duplicate add-on"));
        }
        let addon = room
            .addons
            .iter()
            .find(|a| a.id == *id)
            .ok_or(EngineError::UnknownAddon(*id))?;
        total += addon.unit_price();
    }
    Ok(total)
}

pub fn service_charge(lines: &[ServiceLine]) -> Amount {
    lines.iter().map(ServiceLine::amount).sum()
}

/// Full price of a stay on `room`.
pub fn price(
    room: &Room,
    resolved: &ResolvedStay,
    addon_ids: &[Ulid],
    services: &[ServiceLine],
) -> Result<Charges, EngineError> {
    Ok(Charges::new(
        room_charge(&room.tariff, resolved.mode, &resolved.stay, resolved.hours),
        addon_charge(room, addon_ids)?,
        service_charge(services),
    ))
}

/// What the reservation's stay would cost in `room`'s tariff.
pub fn estimate_for(room: &Room, reservation: &Reservation) -> Amount {
    room_charge(&room.tariff, reservation.mode, &reservation.stay, reservation.hours)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tp(date: &str, time: &str) -> TimePoint {
        TimePoint::new(date.parse().unwrap(), time.parse().unwrap())
    }

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 0, 0).unwrap()
    }

    fn room_r() -> Room {
        Room {
            id: Ulid::new(),
            number: 101,
            floor: 1,
            category: "standard".into(),
            room_type: "double".into(),
            status: RoomStatus::Available,
            tariff: Tariff {
                first_hour: 50,
                additional_hour: 20,
                overnight: 200,
                daily: 400,
            },
            addons: vec![
                Addon { id: Ulid::new(), name: "Minibar".into(), price: Some(30) },
                Addon { id: Ulid::new(), name: "Wi-Fi".into(), price: None },
                Addon { id: Ulid::new(), name: "Towels".into(), price: Some(0) },
            ],
        }
    }

    #[test]
    fn hourly_three_hours() {
        let room = room_r();
        let resolved = resolve_stay(
            &StayRequest::Hourly { check_in: tp("2024-10-24", "10:00:00"), hours: 3 },
            noon(),
        )
        .unwrap();
        assert_eq!(resolved.stay.end, tp("2024-10-24", "13:00:00"));
        let charges = price(&room, &resolved, &[], &[]).unwrap();
        assert_eq!(charges.room, 90);
        assert_eq!(charges.total, 90);
    }

    #[test]
    fn hourly_single_hour_is_first_hour_rate() {
        let room = room_r();
        let stay = Interval::new(tp("2024-10-24", "10:00:00"), tp("2024-10-24", "11:00:00"));
        assert_eq!(room_charge(&room.tariff, RentalMode::Hourly, &stay, Some(1)), 50);
    }

    #[test]
    fn hourly_without_count_rounds_up() {
        let room = room_r();
        let stay = Interval::new(tp("2024-10-24", "10:00:00"), tp("2024-10-24", "12:10:00"));
        assert_eq!(room_charge(&room.tariff, RentalMode::Hourly, &stay, None), 90);
    }

    #[test]
    fn daily_three_nights() {
        let room = room_r();
        let resolved = resolve_stay(
            &StayRequest::Daily {
                check_in: tp("2024-10-24", "14:00:00"),
                check_out: tp("2024-10-27", "12:00:00"),
            },
            noon(),
        )
        .unwrap();
        assert_eq!(price(&room, &resolved, &[], &[]).unwrap().room, 1200);
    }

    #[test]
    fn overnight_ends_next_day_at_checkout_time() {
        let resolved = resolve_stay(
            &StayRequest::Overnight { check_in: tp("2024-10-24", "21:00:00") },
            noon(),
        )
        .unwrap();
        assert_eq!(resolved.stay.end, tp("2024-10-25", "12:00:00"));
        assert_eq!(room_charge(&room_r().tariff, resolved.mode, &resolved.stay, None), 200);
    }

    #[test]
    fn overnight_after_midnight_ends_same_day() {
        let resolved = resolve_stay(
            &StayRequest::Overnight { check_in: tp("2024-10-25", "02:00:00") },
            noon(),
        )
        .unwrap();
        assert_eq!(resolved.stay.end, tp("2024-10-25", "12:00:00"));
    }

    #[test]
    fn daily_checkout_before_checkin_rejected() {
        let err = resolve_stay(
            &StayRequest::Daily {
                check_in: tp("2024-10-27", "14:00:00"),
                check_out: tp("2024-10-24", "12:00:00"),
            },
            noon(),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInterval(_)));
    }

    #[test]
    fn zero_and_oversized_hourly_rejected() {
        let check_in = tp("2024-10-24", "10:00:00");
        assert!(matches!(
            resolve_stay(&StayRequest::Hourly { check_in, hours: 0 }, noon()),
            Err(EngineError::InvalidInterval(_))
        ));
        assert!(matches!(
            resolve_stay(&StayRequest::Hourly { check_in, hours: MAX_HOURLY_HOURS + 1 }, noon()),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn addons_priced_once_and_free_ones_cost_nothing() {
        let room = room_r();
        let ids: Vec<Ulid> = room.addons.iter().map(|a| a.id).collect();
        assert_eq!(addon_charge(&room, &ids).unwrap(), 30);
    }

    #[test]
    fn unknown_and_duplicate_addons_rejected() {
        let room = room_r();
        assert!(matches!(
            addon_charge(&room, &[Ulid::new()]),
            Err(EngineError::UnknownAddon(_))
        ));
        let id = room.addons[0].id;
        assert!(matches!(
            addon_charge(&room, &[id, id]),
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[test]
    fn total_is_sum_of_components_and_stable() {
        let room = room_r();
        let resolved = resolve_stay(
            &StayRequest::Hourly { check_in: tp("2024-10-24", "10:00:00"), hours: 2 },
            noon(),
        )
        .unwrap();
        let services = vec![ServiceLine {
            service_id: Ulid::new(),
            name: "Laundry".into(),
            quantity: 2,
            unit_price: 12,
        }];
        let addons = [room.addons[0].id];
        let first = price(&room, &resolved, &addons, &services).unwrap();
        let second = price(&room, &resolved, &addons, &services).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.total, first.room + first.addons + first.services);
        assert_eq!(first, Charges::new(70, 30, 24));
    }
}
