use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::model::*;

// ── Busy / free computation ──────────────────────────────────────

/// Merge sorted overlapping or touching intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Interval]) -> Vec<Interval> {
    let mut merged: Vec<Interval> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove every interval of `to_remove` (sorted, disjoint) from `base` (sorted, disjoint).
pub fn subtract_intervals(base: &[Interval], to_remove: &[Interval]) -> Vec<Interval> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Interval::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Interval::new(current_start, current_end));
        }
    }

    result
}

/// Clip stays to `bounds`, sort, and merge into maximal busy periods.
pub fn busy_periods<'a>(
    stays: impl IntoIterator<Item = &'a Interval>,
    bounds: &Interval,
) -> Vec<Interval> {
    let mut busy: Vec<Interval> = stays
        .into_iter()
        .filter_map(|s| s.clip(bounds))
        .collect();
    busy.sort_by_key(|s| s.start);
    merge_overlapping(&busy)
}

/// Busy periods of one room on one calendar day, from its active reservations.
pub fn merge_busy(rs: &RoomState, day: NaiveDate) -> Vec<Interval> {
    let bounds = Interval::whole_day(day);
    busy_periods(rs.active_overlapping(&bounds).map(|r| &r.stay), &bounds)
}

/// Complement of `busy` within `[00:00, 24:00)` of `day`.
pub fn free_periods(busy: &[Interval], day: NaiveDate) -> Vec<Interval> {
    subtract_intervals(&[Interval::whole_day(day)], busy)
}

// ── Free-slot sequence ───────────────────────────────────────────

/// Snapshot of a room's active stays over a window of days. Iterating it
/// computes free periods day by day; iterate as often as you like.
#[derive(Debug, Clone)]
pub struct FreeSlots {
    room_id: Ulid,
    stays: Vec<Interval>,
    first_day: NaiveDate,
    days: u32,
}

impl FreeSlots {
    pub fn new(room_id: Ulid, stays: Vec<Interval>, first_day: NaiveDate, days: u32) -> Self {
        Self {
            room_id,
            stays,
            first_day,
            days,
        }
    }

    /// Snapshot the active stays of `rs` that touch the window.
    pub fn capture(rs: &RoomState, first_day: NaiveDate, days: u32) -> Self {
        let last = first_day
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        let window = Interval::new(TimePoint::midnight(first_day), TimePoint::midnight(last));
        let stays = rs.active_overlapping(&window).map(|r| r.stay).collect();
        Self::new(rs.room.id, stays, first_day, days)
    }

    pub fn room_id(&self) -> Ulid {
        self.room_id
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn iter(&self) -> FreeSlotIter<'_> {
        FreeSlotIter {
            slots: self,
            day_index: 0,
            current_day: self.first_day,
            pending: Vec::new().into_iter(),
        }
    }
}

impl<'a> IntoIterator for &'a FreeSlots {
    type Item = FreeSlot;
    type IntoIter = FreeSlotIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

pub struct FreeSlotIter<'a> {
    slots: &'a FreeSlots,
    day_index: u32,
    current_day: NaiveDate,
    pending: std::vec::IntoIter<Interval>,
}

impl Iterator for FreeSlotIter<'_> {
    type Item = FreeSlot;

    fn next(&mut self) -> Option<FreeSlot> {
        loop {
            if let Some(period) = self.pending.next() {
                return Some(FreeSlot {
                    day: self.current_day,
                    period,
                });
            }
            if self.day_index >= self.slots.days {
                return None;
            }
            let day = self
                .slots
                .first_day
                .checked_add_days(Days::new(u64::from(self.day_index)))?;
            self.day_index += 1;
            self.current_day = day;

            let bounds = Interval::whole_day(day);
            let busy = busy_periods(self.slots.stays.iter(), &bounds);
            self.pending = free_periods(&busy, day).into_iter();
        }
    }
}

// ── Candidate ranking ────────────────────────────────────────────

/// Order reassignment candidates: ready rooms first, then cheaper, then by
/// room number. Rooms that are neither Available nor Dirty are dropped.
/// The first entry is flagged as the recommendation.
pub fn rank_candidates(mut candidates: Vec<RankedRoom>) -> Vec<RankedRoom> {
    candidates.retain(|c| matches!(c.status, RoomStatus::Available | RoomStatus::Dirty));
    candidates.sort_by_key(|c| {
        let readiness = match c.status {
            RoomStatus::Available => 0u8,
            _ => 1,
        };
        (readiness, c.estimated_charge, c.number, c.room_id)
    });
    for (i, c) in candidates.iter_mut().enumerate() {
        c.recommended = i == 0;
    }
    candidates
}
