use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{
    RESERVATIONS_CREATED_TOTAL, ROOM_CHANGES_TOTAL, TRANSITIONS_TOTAL,
};

use super::conflict::{check_in_guard, check_no_conflict};
use super::lifecycle::{self, Action};
use super::pricing::{self, StayRequest};
use super::{Engine, EngineError, RoomGuard, WalCommand};

/// Who the reservation is for, as the caller names them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuestRequest {
    Registered { user_id: String },
    WalkIn { name: String, phone: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSelection {
    pub service_id: Ulid,
    #[serde(default = "one")]
    pub quantity: u32,
}

fn one() -> u32 {
    1
}

/// A fully formed booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRequest {
    /// Caller-chosen id; resubmitting the same id is rejected, not repeated.
    #[serde(default = "Ulid::new")]
    pub id: Ulid,
    pub room_id: Ulid,
    pub guest: GuestRequest,
    pub stay: StayRequest,
    #[serde(default = "one")]
    pub adults: u32,
    #[serde(default)]
    pub children: u32,
    #[serde(default)]
    pub addons: Vec<Ulid>,
    #[serde(default)]
    pub services: Vec<ServiceSelection>,
    pub payment_method: PaymentMethod,
}

/// A reservation after a change, plus money the staff must hand back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationOutcome {
    pub reservation: Reservation,
    pub refund_due: Option<Amount>,
}

impl ReservationOutcome {
    fn reporting_refund(reservation: Reservation) -> Self {
        let due = reservation.refund_due();
        Self {
            reservation,
            refund_due: (due > 0).then_some(due),
        }
    }
}

fn check_text(value: &str, max: usize, what: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidRequest(what));
    }
    if value.len() > max {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn validate_room(room: &Room) -> Result<(), EngineError> {
    check_text(&room.category, MAX_NAME_LEN, "room category")?;
    check_text(&room.room_type, MAX_NAME_LEN, "room type")?;
    let t = &room.tariff;
    if [t.first_hour, t.additional_hour, t.overnight, t.daily]
        .iter()
        .any(|rate| *rate < 0)
    {
        return Err(EngineError::InvalidAmount("tariff rates must not be negative"));
    }
    if [t.first_hour, t.additional_hour, t.overnight, t.daily]
        .iter()
        .any(|rate| *rate > MAX_RATE)
    {
        return Err(EngineError::LimitExceeded("tariff rate too large"));
    }
    if room.addons.len() > MAX_ADDONS_PER_ROOM {
        return Err(EngineError::LimitExceeded("too many add-ons on room"));
    }
    let mut seen = HashSet::new();
    for addon in &room.addons {
        check_text(&addon.name, MAX_NAME_LEN, "add-on name")?;
        if addon.price.is_some_and(|p| p < 0) {
            return Err(EngineError::InvalidAmount("add-on price must not be negative"));
        }
        if addon.price.is_some_and(|p| p > MAX_RATE) {
            return Err(EngineError::LimitExceeded("add-on price too large"));
        }
        if !seen.insert(addon.id) {
            return Err(EngineError::InvalidRequest("duplicate add-on id"));
        }
    }
    Ok(())
}

fn validate_detail(detail: &Option<String>) -> Result<(), EngineError> {
    match detail {
        Some(d) if d.len() > MAX_DETAIL_LEN => Err(EngineError::LimitExceeded("detail too long")),
        _ => Ok(()),
    }
}

fn record_payment(
    r: &mut Reservation,
    amount: Amount,
    detail: String,
    request_id: Option<Ulid>,
    at: TimePoint,
) {
    r.payments.push(PaymentRecord {
        amount,
        detail,
        request_id,
        at,
    });
    r.paid += amount;
    r.reconcile();
}

fn invoice_ready(r: &Reservation) -> Notice {
    Notice::InvoiceReady {
        reservation_id: r.id,
        code: r.code.clone(),
        room_id: r.room_id,
        total: r.charges.total,
        paid: r.paid,
    }
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────────

    /// Insert a room or replace its catalog data (tariff, add-ons, labels).
    /// Reservations already on the room keep their prices.
    pub async fn register_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room(&room)?;
        if self.get_room(&room.id).is_none() {
            if self.state.len() >= MAX_ROOMS {
                return Err(EngineError::LimitExceeded("too many rooms"));
            }
            match self.commit_new_room(room.clone()).await {
                Err(EngineError::AlreadyExists(_)) => {}
                other => {
                    if other.is_ok() {
                        info!("room {} registered as #{}", room.id, room.number);
                    }
                    return other;
                }
            }
        }
        let guard = self.lock_room(room.id).await?;
        self.commit(vec![guard], Event::RoomRegistered { room }, Vec::new())
            .await
    }

    pub async fn set_room_status(&self, room_id: Ulid, status: RoomStatus) -> Result<(), EngineError> {
        let guard = self.lock_room(room_id).await?;
        if guard.room.status == status {
            return Ok(());
        }
        self.commit(vec![guard], Event::RoomStatusChanged { room_id, status }, Vec::new())
            .await
    }

    // ── Reservations ─────────────────────────────────────────

    async fn resolve_guest(&self, req: &GuestRequest) -> Result<Guest, EngineError> {
        match req {
            GuestRequest::Registered { user_id } => {
                check_text(user_id, MAX_NAME_LEN, "user id")?;
                let profile = self
                    .guests
                    .guest(user_id)
                    .await
                    .ok_or_else(|| EngineError::UnknownGuest(user_id.clone()))?;
                Ok(Guest::Registered {
                    user_id: profile.user_id,
                    display_name: profile.name,
                })
            }
            GuestRequest::WalkIn { name, phone } => {
                check_text(name, MAX_NAME_LEN, "guest name")?;
                check_text(phone, MAX_PHONE_LEN, "guest phone")?;
                Ok(Guest::WalkIn {
                    name: name.trim().to_string(),
                    phone: phone.trim().to_string(),
                })
            }
        }
    }

    /// Price service selections from the catalog. Done before any room lock.
    pub(super) async fn resolve_services(
        &self,
        selections: &[ServiceSelection],
    ) -> Result<Vec<ServiceLine>, EngineError> {
        if selections.len() > MAX_SERVICES_PER_RESERVATION {
            return Err(EngineError::LimitExceeded("too many services"));
        }
        let mut lines = Vec::with_capacity(selections.len());
        for sel in selections {
            if sel.quantity == 0 {
                return Err(EngineError::InvalidRequest("service quantity must be at least 1"));
            }
            if sel.quantity > MAX_SERVICE_QUANTITY {
                return Err(EngineError::LimitExceeded("service quantity too large"));
            }
            if lines.iter().any(|l: &ServiceLine| l.service_id == sel.service_id) {
                return Err(EngineError::InvalidRequest("duplicate service"));
            }
            let item = self
                .catalog
                .service(&sel.service_id)
                .await
                .filter(|item| item.available)
                .ok_or(EngineError::ServiceUnavailable(sel.service_id))?;
            if item.price < 0 {
                return Err(EngineError::InvalidAmount("service price must not be negative"));
            }
            if item.price > MAX_RATE {
                return Err(EngineError::LimitExceeded("service price too large"));
            }
            lines.push(ServiceLine {
                service_id: item.id,
                name: item.name,
                quantity: sel.quantity,
                unit_price: item.price,
            });
        }
        Ok(lines)
    }

    pub async fn create_reservation(
        &self,
        req: ReservationRequest,
    ) -> Result<Reservation, EngineError> {
        if req.adults == 0 {
            return Err(EngineError::InvalidRequest("at least one adult is required"));
        }
        if req.adults.saturating_add(req.children) > MAX_OCCUPANTS {
            return Err(EngineError::LimitExceeded("too many occupants"));
        }
        if req.addons.len() > MAX_ADDONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many add-ons"));
        }
        if self.reservation_rooms.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let resolved = pricing::resolve_stay(&req.stay, self.settings.overnight_checkout)?;
        let guest = self.resolve_guest(&req.guest).await?;
        let services = self.resolve_services(&req.services).await?;

        let guard = self.lock_room(req.room_id).await?;
        let claim = self.claim_reservation_id(req.id, req.room_id)?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        if let Err(e) = check_no_conflict(&guard, &resolved.stay, None) {
            debug!("reservation {} rejected on room {}: {e}", req.id, req.room_id);
            return Err(e);
        }
        let charges = pricing::price(&guard.room, &resolved, &req.addons, &services)?;

        let (status, confirmed) = match req.payment_method {
            PaymentMethod::Online => (ReservationStatus::PendingPayment, false),
            PaymentMethod::Cash => (ReservationStatus::Pending, true),
        };
        let mut reservation = Reservation {
            id: req.id,
            code: Reservation::code_for(&req.id),
            guest,
            room_id: req.room_id,
            mode: resolved.mode,
            stay: resolved.stay,
            hours: resolved.hours,
            adults: req.adults,
            children: req.children,
            addons: req.addons,
            services,
            charges,
            paid: 0,
            owed: 0,
            refunded: 0,
            status,
            payment_status: PaymentStatus::Unpaid,
            payment_method: req.payment_method,
            confirmed,
            payments: Vec::new(),
            created_at: self.clock.now(),
        };
        reservation.reconcile();

        let event = Event::ReservationRecorded {
            reservation: reservation.clone(),
        };
        self.commit_claimed(vec![guard], event, Vec::new(), Some(claim))
            .await?;
        metrics::counter!(RESERVATIONS_CREATED_TOTAL).increment(1);
        info!(
            "reservation {} created on room {} for {} ({})",
            reservation.code,
            reservation.room_id,
            reservation.stay,
            reservation.status
        );
        Ok(reservation)
    }

    /// Apply a staff action to a reservation.
    pub async fn transition(
        &self,
        reservation_id: Ulid,
        action: Action,
    ) -> Result<ReservationOutcome, EngineError> {
        match &action {
            Action::ConfirmPaymentReceived { detail, .. } | Action::Pay { detail, .. } => {
                validate_detail(detail)?
            }
            Action::Cancel { reason, .. } | Action::CancelAndEnd { reason } => {
                validate_detail(reason)?
            }
            _ => {}
        }

        let guard = self.lock_reservation(reservation_id).await?;
        let current = guard
            .reservation(&reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))?;
        let step = lifecycle::transition(
            current.status,
            current.payment_method,
            current.confirmed,
            &action,
        )?;

        let now = self.clock.now();
        let mut next = current.clone();
        next.status = step.to;
        next.confirmed = step.confirmed;
        let mut notices = Vec::new();
        let mut refund_due = None;

        match &action {
            Action::ConfirmPaymentReceived {
                amount,
                detail,
                request_id,
            } => {
                if *amount < 0 {
                    return Err(EngineError::InvalidAmount("payment must not be negative"));
                }
                if *amount > current.owed {
                    return Err(EngineError::InvalidAmount("payment exceeds amount owed"));
                }
                if *amount > 0 {
                    let detail = detail.clone().unwrap_or_else(|| "online transfer".into());
                    record_payment(&mut next, *amount, detail, *request_id, now);
                }
            }
            Action::CheckIn { force } => check_in_guard(&guard, &current, now, *force)?,
            Action::CheckOut => {
                if next.payment_status == PaymentStatus::Paid {
                    notices.push(invoice_ready(&next));
                }
            }
            Action::Pay {
                amount,
                detail,
                request_id,
            } => {
                let repeated = request_id
                    .is_some_and(|rid| current.payments.iter().any(|p| p.request_id == Some(rid)));
                if repeated || current.payment_status == PaymentStatus::Paid {
                    return Err(EngineError::AlreadyInState(current.status));
                }
                if *amount <= 0 {
                    return Err(EngineError::InvalidAmount("payment must be positive"));
                }
                if *amount > current.owed {
                    return Err(EngineError::InvalidAmount("payment exceeds amount owed"));
                }
                let detail = detail.clone().unwrap_or_else(|| "settlement".into());
                record_payment(&mut next, *amount, detail, *request_id, now);
                if next.owed == 0 {
                    notices.push(invoice_ready(&next));
                }
            }
            Action::Cancel { .. } | Action::CancelAndEnd { .. } => {
                // Money goes back by hand; report what was taken.
                let refund = (next.paid - next.refunded).max(0);
                refund_due = Some(refund);
                notices.push(Notice::ReservationCancelled {
                    reservation_id: next.id,
                    code: next.code.clone(),
                    guest: next.guest.clone(),
                    refund_due: refund,
                });
            }
            Action::ConfirmBooking | Action::Complete | Action::RevertCheckIn => {}
        }

        let event = Event::ReservationRecorded {
            reservation: next.clone(),
        };
        self.commit(vec![guard], event, notices).await?;
        metrics::counter!(TRANSITIONS_TOTAL, "action" => action.name()).increment(1);
        info!(
            "reservation {}: {} {} -> {}",
            next.code,
            action.name(),
            current.status,
            next.status
        );
        Ok(ReservationOutcome {
            reservation: next,
            refund_due,
        })
    }

    /// Move a Confirmed or CheckedIn reservation to another room, re-pricing
    /// the room charge from the new tariff. Both rooms stay locked until the
    /// move is durable.
    pub async fn change_room(
        &self,
        reservation_id: Ulid,
        new_room_id: Ulid,
    ) -> Result<ReservationOutcome, EngineError> {
        if self.get_room(&new_room_id).is_none() {
            return Err(EngineError::NotFound(new_room_id));
        }
        for _ in 0..super::LOCK_ATTEMPTS {
            let from_room_id = self
                .room_of(&reservation_id)
                .ok_or(EngineError::NotFound(reservation_id))?;

            if from_room_id == new_room_id {
                let guard = self.lock_room(from_room_id).await?;
                let Some(current) = guard.reservation(&reservation_id) else {
                    continue;
                };
                return Err(match current.status {
                    ReservationStatus::Confirmed | ReservationStatus::CheckedIn => {
                        EngineError::AlreadyInState(current.status)
                    }
                    status => EngineError::InvalidTransition {
                        status,
                        action: "change_room",
                    },
                });
            }

            // Ascending id order, like every other two-room lock.
            let (from, to) = if from_room_id < new_room_id {
                let from = self.lock_room(from_room_id).await?;
                let to = self.lock_room(new_room_id).await?;
                (from, to)
            } else {
                let to = self.lock_room(new_room_id).await?;
                let from = self.lock_room(from_room_id).await?;
                (from, to)
            };
            let Some(current) = from.reservation(&reservation_id).cloned() else {
                continue;
            };
            return self.move_locked(from, to, current).await;
        }
        Err(EngineError::NotFound(reservation_id))
    }

    async fn move_locked(
        &self,
        from: RoomGuard,
        to: RoomGuard,
        current: Reservation,
    ) -> Result<ReservationOutcome, EngineError> {
        if !matches!(
            current.status,
            ReservationStatus::Confirmed | ReservationStatus::CheckedIn
        ) {
            return Err(EngineError::InvalidTransition {
                status: current.status,
                action: "change_room",
            });
        }
        if to.reservations.len() >= MAX_RESERVATIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many reservations on room"));
        }
        check_no_conflict(&to, &current.stay, Some(current.id))?;

        let mut next = current.clone();
        next.room_id = to.room.id;
        next.charges = current
            .charges
            .with_room(pricing::estimate_for(&to.room, &current));
        next.reconcile();

        let from_room = from.room.id;
        let event = Event::ReservationMoved {
            from_room,
            reservation: next.clone(),
        };
        self.commit(vec![from, to], event, Vec::new()).await?;
        metrics::counter!(ROOM_CHANGES_TOTAL).increment(1);
        info!(
            "reservation {} moved {} -> {}, total {} -> {}",
            next.code, from_room, next.room_id, current.charges.total, next.charges.total
        );
        Ok(ReservationOutcome::reporting_refund(next))
    }

    /// Change the dates (and rental mode) of a reservation that has not
    /// started yet, on the same room.
    pub async fn reschedule(
        &self,
        reservation_id: Ulid,
        stay: StayRequest,
    ) -> Result<ReservationOutcome, EngineError> {
        let resolved = pricing::resolve_stay(&stay, self.settings.overnight_checkout)?;
        let guard = self.lock_reservation(reservation_id).await?;
        let current = guard
            .reservation(&reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))?;
        if !matches!(
            current.status,
            ReservationStatus::PendingPayment
                | ReservationStatus::Pending
                | ReservationStatus::Confirmed
        ) {
            return Err(EngineError::InvalidTransition {
                status: current.status,
                action: "reschedule",
            });
        }
        check_no_conflict(&guard, &resolved.stay, Some(reservation_id))?;

        let mut next = current.clone();
        next.mode = resolved.mode;
        next.stay = resolved.stay;
        next.hours = resolved.hours;
        next.charges = current.charges.with_room(pricing::room_charge(
            &guard.room.tariff,
            resolved.mode,
            &resolved.stay,
            resolved.hours,
        ));
        next.reconcile();
        if next == current {
            return Ok(ReservationOutcome::reporting_refund(next));
        }

        let event = Event::ReservationRecorded {
            reservation: next.clone(),
        };
        self.commit(vec![guard], event, Vec::new()).await?;
        info!("reservation {} rescheduled to {}", next.code, next.stay);
        Ok(ReservationOutcome::reporting_refund(next))
    }

    /// Record a refund that staff has already handed back.
    pub async fn record_refund(
        &self,
        reservation_id: Ulid,
        amount: Amount,
    ) -> Result<Reservation, EngineError> {
        if amount <= 0 {
            return Err(EngineError::InvalidAmount("refund must be positive"));
        }
        let guard = self.lock_reservation(reservation_id).await?;
        let current = guard
            .reservation(&reservation_id)
            .cloned()
            .ok_or(EngineError::NotFound(reservation_id))?;
        if current.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                status: current.status,
                action: "record_refund",
            });
        }
        if amount > current.refund_due() {
            return Err(EngineError::InvalidAmount("refund exceeds amount due"));
        }

        let mut next = current;
        next.refunded += amount;
        next.reconcile();
        let event = Event::ReservationRecorded {
            reservation: next.clone(),
        };
        self.commit(vec![guard], event, Vec::new()).await?;
        info!("reservation {}: refund of {amount} recorded", next.code);
        Ok(next)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as one `RoomRegistered` per room followed by one
    /// `ReservationRecorded` per reservation.
    ///
    /// Every room is read-locked (ascending id) and new rooms are held off
    /// until the swap is done, so no commit can land between snapshot and
    /// swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry.lock().await;
        let mut room_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        room_ids.sort();

        let mut guards = Vec::with_capacity(room_ids.len());
        for id in room_ids {
            if let Some(rs) = self.get_room(&id) {
                guards.push(rs.read_owned().await);
            }
        }

        let mut events = Vec::with_capacity(guards.len());
        for rs in &guards {
            events.push(Event::RoomRegistered {
                room: rs.room.clone(),
            });
        }
        for rs in &guards {
            for reservation in &rs.reservations {
                events.push(Event::ReservationRecorded {
                    reservation: reservation.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
