use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    Conflict {
        vehicle_id: Ulid,
        date: NaiveDate,
    },
    /// The acting user does not own the vehicle or booking.
    Unauthorized(Ulid),
    PaymentFailed(String),
    InvalidTransition {
        from: BookingStatus,
        action: &'static str,
    },
    ValidationFailed(String),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::Conflict { .. } => "conflict",
            EngineError::Unauthorized(_) => "unauthorized",
            EngineError::PaymentFailed(_) => "payment_failed",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::ValidationFailed(_) => "validation_failed",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::Conflict { vehicle_id, date } => {
                write!(f, "vehicle {vehicle_id} is not available on {date}")
            }
            EngineError::Unauthorized(id) => write!(f, "not permitted to act on {id}"),
            EngineError::PaymentFailed(e) => write!(f, "payment failed: {e}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a booking that is {from}")
            }
            EngineError::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<crate::payment::PaymentError> for EngineError {
    fn from(e: crate::payment::PaymentError) -> Self {
        EngineError::PaymentFailed(e.to_string())
    }
}
