use crate::model::{Booking, BookingStatus, PaymentStatus};

use super::EngineError;

/// Every way a booking can move between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transition {
    ConfirmPayment,
    Approve,
    Reject,
    /// Host did not answer before the approval deadline.
    Expire,
    Cancel,
    Complete,
}

impl Transition {
    pub const ALL: [Transition; 6] = [
        Transition::ConfirmPayment,
        Transition::Approve,
        Transition::Reject,
        Transition::Expire,
        Transition::Cancel,
        Transition::Complete,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Transition::ConfirmPayment => "confirm payment for",
            Transition::Approve => "approve",
            Transition::Reject => "reject",
            Transition::Expire => "expire",
            Transition::Cancel => "cancel",
            Transition::Complete => "complete",
        }
    }

    pub fn target(&self) -> BookingStatus {
        match self {
            Transition::ConfirmPayment | Transition::Approve => BookingStatus::Confirmed,
            Transition::Reject | Transition::Expire => BookingStatus::Rejected,
            Transition::Cancel => BookingStatus::Cancelled,
            Transition::Complete => BookingStatus::Completed,
        }
    }

    fn allowed_from(&self, from: BookingStatus) -> bool {
        use BookingStatus::*;
        match self {
            Transition::ConfirmPayment => from == Pending,
            Transition::Approve | Transition::Reject => matches!(from, Pending | AwaitingApproval),
            Transition::Expire => from == AwaitingApproval,
            Transition::Cancel => matches!(from, Pending | AwaitingApproval | Confirmed),
            Transition::Complete => from == Confirmed,
        }
    }
}

/// Target status of `transition` out of `from`, or `InvalidTransition`.
/// Terminal states accept nothing.
pub fn validate_transition(
    from: BookingStatus,
    transition: Transition,
) -> Result<BookingStatus, EngineError> {
    if transition.allowed_from(from) {
        Ok(transition.target())
    } else {
        Err(EngineError::InvalidTransition {
            from,
            action: transition.label(),
        })
    }
}

pub fn allowed_transitions(from: BookingStatus) -> Vec<Transition> {
    Transition::ALL
        .into_iter()
        .filter(|t| t.allowed_from(from))
        .collect()
}

/// Payment state a booking row may carry for its status.
fn payment_consistent(status: BookingStatus, payment: PaymentStatus) -> bool {
    match payment {
        PaymentStatus::Captured => {
            matches!(status, BookingStatus::Confirmed | BookingStatus::Completed)
        }
        PaymentStatus::Refunded => {
            matches!(status, BookingStatus::Cancelled | BookingStatus::Rejected)
        }
        PaymentStatus::Pending | PaymentStatus::Authorized | PaymentStatus::Failed => true,
    }
}

/// Row-level invariants checked before every booking write.
pub(crate) fn row_is_consistent(booking: &Booking) -> bool {
    let deadline_ok =
        booking.approval_deadline.is_some() == (booking.status == BookingStatus::AwaitingApproval);
    deadline_ok
        && booking.start_date <= booking.end_date
        && payment_consistent(booking.status, booking.payment_status)
        && booking.total_amount == booking.subtotal + booking.service_fee
}
