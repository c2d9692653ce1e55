//! Reservation status machine. `transition` is a pure, total function of
//! (status, payment method, confirmed flag, action); the engine applies the
//! returned step together with the action's payment side effects.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::{Amount, PaymentMethod, ReservationStatus};

use super::EngineError;

/// Staff action on an existing reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Proof of an online transfer arrived.
    ConfirmPaymentReceived {
        amount: Amount,
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        request_id: Option<Ulid>,
    },
    ConfirmBooking,
    CheckIn {
        #[serde(default)]
        force: bool,
    },
    CheckOut,
    Pay {
        amount: Amount,
        #[serde(default)]
        detail: Option<String>,
        #[serde(default)]
        request_id: Option<Ulid>,
    },
    Complete,
    RevertCheckIn,
    CancelAndEnd {
        #[serde(default)]
        reason: Option<String>,
    },
    Cancel {
        #[serde(default)]
        reason: Option<String>,
        /// Required to cancel a reservation that is already Confirmed.
        #[serde(default)]
        revoke_confirmation: bool,
    },
}

impl Action {
    pub const fn name(&self) -> &'static str {
        match self {
            Action::ConfirmPaymentReceived { .. } => "confirm_payment_received",
            Action::ConfirmBooking => "confirm_booking",
            Action::CheckIn { .. } => "check_in",
            Action::CheckOut => "check_out",
            Action::Pay { .. } => "pay",
            Action::Complete => "complete",
            Action::RevertCheckIn => "revert_check_in",
            Action::CancelAndEnd { .. } => "cancel_and_end",
            Action::Cancel { .. } => "cancel",
        }
    }
}

/// Where a legal transition lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub to: ReservationStatus,
    pub confirmed: bool,
}

pub fn transition(
    status: ReservationStatus,
    method: PaymentMethod,
    confirmed: bool,
    action: &Action,
) -> Result<Step, EngineError> {
    use PaymentMethod::*;
    use ReservationStatus::*;

    let to = |to, confirmed| Ok(Step { to, confirmed });
    let repeat = || Err(EngineError::AlreadyInState(status));

    match (status, action) {
        (PendingPayment, Action::ConfirmPaymentReceived { .. }) if method == Online => {
            to(Confirmed, false)
        }
        (Confirmed | CheckedIn | CheckedOut | Completed, Action::ConfirmPaymentReceived { .. })
            if method == Online =>
        {
            repeat()
        }

        (Confirmed, Action::ConfirmBooking) if method == Online && !confirmed => {
            to(Confirmed, true)
        }
        (Pending, Action::ConfirmBooking) if method == Cash => to(Confirmed, true),
        (Confirmed, Action::ConfirmBooking) => repeat(),

        (Confirmed, Action::CheckIn { .. }) if confirmed => to(CheckedIn, confirmed),
        (CheckedIn, Action::CheckIn { .. }) => repeat(),

        (CheckedIn, Action::CheckOut) => to(CheckedOut, confirmed),
        (CheckedOut, Action::CheckOut) => repeat(),

        (CheckedOut, Action::Pay { .. }) => to(CheckedOut, confirmed),

        (CheckedOut, Action::Complete) => to(Completed, confirmed),
        (Completed, Action::Complete) => repeat(),

        (CheckedIn, Action::RevertCheckIn) => to(Confirmed, confirmed),

        (CheckedIn, Action::CancelAndEnd { .. }) => to(Cancelled, confirmed),

        (PendingPayment | Pending, Action::Cancel { .. }) => to(Cancelled, confirmed),
        (Confirmed, Action::Cancel { revoke_confirmation: true, .. }) => {
            to(Cancelled, confirmed)
        }
        (Cancelled, Action::Cancel { .. } | Action::CancelAndEnd { .. }) => repeat(),

        _ => Err(EngineError::InvalidTransition {
            status,
            action: action.name(),
        }),
    }
}
