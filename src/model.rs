use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Money in the smallest currency unit. Never a float.
pub type Amount = i64;

// ── Interval model ───────────────────────────────────────────────

/// A local calendar date plus a time of day. Ordered by date, then time.
/// No timezone is attached: callers hand in already-localized points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimePoint {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl TimePoint {
    pub fn new(date: NaiveDate, time: NaiveTime) -> Self {
        Self { date, time }
    }

    pub fn midnight(date: NaiveDate) -> Self {
        Self {
            date,
            time: NaiveTime::MIN,
        }
    }

    pub fn to_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn checked_add_hours(&self, hours: u32) -> Option<Self> {
        self.to_datetime()
            .checked_add_signed(TimeDelta::hours(i64::from(hours)))
            .map(Self::from)
    }
}

impl From<NaiveDateTime> for TimePoint {
    fn from(dt: NaiveDateTime) -> Self {
        Self {
            date: dt.date(),
            time: dt.time(),
        }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.date, self.time.format("%H:%M"))
    }
}

/// The calendar day after `date`, saturating at the end of chrono's range.
pub fn next_day(date: NaiveDate) -> NaiveDate {
    date.succ_opt().unwrap_or(date)
}

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interval {
    pub start: TimePoint,
    pub end: TimePoint,
}

impl Interval {
    pub fn new(start: TimePoint, end: TimePoint) -> Self {
        debug_assert!(start < end, "Interval start must be before end");
        Self { start, end }
    }

    /// `[date 00:00, next day 00:00)`.
    pub fn whole_day(date: NaiveDate) -> Self {
        Self::new(TimePoint::midnight(date), TimePoint::midnight(next_day(date)))
    }

    pub fn duration(&self) -> TimeDelta {
        self.end.to_datetime() - self.start.to_datetime()
    }

    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains(&self, t: TimePoint) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_interval(&self, other: &Interval) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Intersection with `bounds`, or `None` when they do not overlap.
    pub fn clip(&self, bounds: &Interval) -> Option<Interval> {
        if !self.overlaps(bounds) {
            return None;
        }
        Some(Interval::new(
            self.start.max(bounds.start),
            self.end.min(bounds.end),
        ))
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Available,
    Occupied,
    Dirty,
    Maintenance,
}

/// Per-room price table. One rate per rental mode, plus the hourly step.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tariff {
    pub first_hour: Amount,
    pub additional_hour: Amount,
    pub overnight: Amount,
    pub daily: Amount,
}

/// Optional amenity attached to a room. No price, or price 0, means included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addon {
    pub id: Ulid,
    pub name: String,
    pub price: Option<Amount>,
}

impl Addon {
    pub fn unit_price(&self) -> Amount {
        self.price.unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub number: u32,
    pub floor: i32,
    pub category: String,
    pub room_type: String,
    pub status: RoomStatus,
    pub tariff: Tariff,
    pub addons: Vec<Addon>,
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RentalMode {
    Hourly,
    Overnight,
    Daily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Online booking waiting for proof of transfer.
    PendingPayment,
    /// Cash booking waiting for staff confirmation.
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Completed,
    Cancelled,
}

impl ReservationStatus {
    /// Statuses that hold the room.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::PendingPayment | Self::Pending | Self::Confirmed | Self::CheckedIn
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PendingPayment => "pending_payment",
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Online,
}

/// Who owns the reservation. A registered identity and an ad-hoc walk-in
/// record are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guest {
    Registered { user_id: String, display_name: String },
    WalkIn { name: String, phone: String },
}

impl Guest {
    pub fn label(&self) -> &str {
        match self {
            Guest::Registered { display_name, .. } => display_name,
            Guest::WalkIn { name, .. } => name,
        }
    }
}

/// A service line priced at the moment it was attached to the reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceLine {
    pub service_id: Ulid,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Amount,
}

impl ServiceLine {
    pub fn amount(&self) -> Amount {
        self.unit_price * Amount::from(self.quantity)
    }
}

/// Priced components of a stay. `total` is always the sum of the three parts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charges {
    pub room: Amount,
    pub addons: Amount,
    pub services: Amount,
    pub total: Amount,
}

impl Charges {
    pub fn new(room: Amount, addons: Amount, services: Amount) -> Self {
        Self {
            room,
            addons,
            services,
            total: room + addons + services,
        }
    }

    pub fn with_room(self, room: Amount) -> Self {
        Self::new(room, self.addons, self.services)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub amount: Amount,
    pub detail: String,
    pub request_id: Option<Ulid>,
    pub at: TimePoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub code: String,
    pub guest: Guest,
    pub room_id: Ulid,
    pub mode: RentalMode,
    pub stay: Interval,
    /// Booked hours, Hourly mode only.
    pub hours: Option<u32>,
    pub adults: u32,
    pub children: u32,
    pub addons: Vec<Ulid>,
    pub services: Vec<ServiceLine>,
    pub charges: Charges,
    pub paid: Amount,
    pub owed: Amount,
    pub refunded: Amount,
    pub status: ReservationStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    /// Second Online confirmation step. Always true for Cash.
    pub confirmed: bool,
    pub payments: Vec<PaymentRecord>,
    pub created_at: TimePoint,
}

impl Reservation {
    /// Short human-readable code derived from the random tail of the id.
    pub fn code_for(id: &Ulid) -> String {
        let s = id.to_string();
        format!("BK-{}", &s[s.len() - 6..])
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Amount taken beyond what the stay now costs, not yet handed back.
    pub fn refund_due(&self) -> Amount {
        (self.paid - self.refunded - self.charges.total).max(0)
    }

    /// Recompute `owed` and `payment_status` from charges and payments.
    pub fn reconcile(&mut self) {
        self.owed = (self.charges.total - self.paid - self.refunded).max(0);
        self.payment_status = if self.owed == 0 && (self.paid > 0 || self.charges.total == 0) {
            PaymentStatus::Paid
        } else if self.paid > 0 {
            PaymentStatus::PartiallyPaid
        } else {
            PaymentStatus::Unpaid
        };
    }

    pub fn summary(&self) -> ConflictInfo {
        ConflictInfo {
            reservation_id: self.id,
            code: self.code.clone(),
            guest: self.guest.label().to_string(),
            stay: self.stay,
            status: self.status,
        }
    }
}

// ── Per-room state ───────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Every reservation ever placed on this room, sorted by `stay.start`.
    pub reservations: Vec<Reservation>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            reservations: Vec::new(),
        }
    }

    /// Insert maintaining sort order by stay start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.stay.start <= reservation.stay.start);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// Replace a reservation by id (its stay may have moved), or insert it.
    pub fn upsert_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        self.insert_reservation(reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Reservations whose stay overlaps the query window.
    /// Binary search skips everything starting at or after `query.end`.
    pub fn overlapping(&self, query: &Interval) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.stay.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.stay.end > query.start)
    }

    /// Active reservations overlapping the query window.
    pub fn active_overlapping(&self, query: &Interval) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.is_active())
    }
}

// ── WAL records ──────────────────────────────────────────────────

/// The event types. This is the WAL record format; every state change is
/// exactly one event so a commit is all-or-nothing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomRegistered {
        room: Room,
    },
    RoomStatusChanged {
        room_id: Ulid,
        status: RoomStatus,
    },
    /// Create or replace a reservation snapshot on its room.
    ReservationRecorded {
        reservation: Reservation,
    },
    /// Atomic room reassignment: drop from `from_room`, record on the new room.
    ReservationMoved {
        from_room: Ulid,
        reservation: Reservation,
    },
}

impl Event {
    pub fn room_id(&self) -> Ulid {
        match self {
            Event::RoomRegistered { room } => room.id,
            Event::RoomStatusChanged { room_id, .. } => *room_id,
            Event::ReservationRecorded { reservation }
            | Event::ReservationMoved { reservation, .. } => reservation.room_id,
        }
    }
}

/// Notices for external collaborators (invoice rendering, guest messaging).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Notice {
    InvoiceReady {
        reservation_id: Ulid,
        code: String,
        room_id: Ulid,
        total: Amount,
        paid: Amount,
    },
    ReservationCancelled {
        reservation_id: Ulid,
        code: String,
        guest: Guest,
        refund_due: Amount,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Summary of a reservation standing in the way of a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictInfo {
    pub reservation_id: Ulid,
    pub code: String,
    pub guest: String,
    pub stay: Interval,
    pub status: ReservationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeSlot {
    pub day: NaiveDate,
    pub period: Interval,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedRoom {
    pub room_id: Ulid,
    pub number: u32,
    pub status: RoomStatus,
    pub estimated_charge: Amount,
    pub recommended: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub mode: RentalMode,
    pub stay: Interval,
    pub hours: Option<u32>,
    pub charges: Charges,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room: Room,
    pub active_reservations: usize,
}
