use chrono::NaiveDate;
use thiserror::Error;
use ulid::Ulid;

use crate::model::{Conflict, StayRange};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("{reason} ({stay})")]
    InvalidRange { stay: StayRange, reason: &'static str },
    #[error("check-in date {check_in} is in the past (today is {today})")]
    PastDate { check_in: NaiveDate, today: NaiveDate },
    #[error("room {0} is not active")]
    RoomInactive(Ulid),
    #[error("room {room_id} is already booked for {} (booking {})", .conflict.stay, .conflict.booking_id)]
    RoomUnavailable { room_id: Ulid, conflict: Conflict },
    #[error("only active bookings can be changed: {0}")]
    NotEditable(Ulid),
    #[error("booking {0} is already cancelled")]
    AlreadyCancelled(Ulid),
    #[error("permission denied for {0}")]
    Forbidden(Ulid),
    #[error("room number {0:?} is already taken")]
    DuplicateRoomNumber(String),
    #[error("room {0} has bookings and cannot be deleted")]
    RoomHasBookings(Ulid),
    #[error("invalid price: {0}")]
    InvalidPrice(String),
    #[error("capacity must be between 1 and 20, got {0}")]
    InvalidCapacity(u32),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    /// The request field a validation error is reported against.
    pub fn field(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "check_out",
            EngineError::PastDate { .. } => "check_in",
            EngineError::RoomInactive(_) | EngineError::RoomUnavailable { .. } => "room",
            EngineError::NotEditable(_) | EngineError::AlreadyCancelled(_) => "status",
            EngineError::DuplicateRoomNumber(_) => "room_number",
            EngineError::InvalidPrice(_) => "price_per_night",
            EngineError::InvalidCapacity(_) => "capacity",
            EngineError::NotFound(_) | EngineError::AlreadyExists(_) => "id",
            EngineError::Forbidden(_) => "user",
            EngineError::RoomHasBookings(_) => "room",
            EngineError::LimitExceeded(_) | EngineError::WalError(_) => "request",
        }
    }
}
