use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_order(stay: &StayRange) -> Result<(), EngineError> {
    if stay.check_out <= stay.check_in {
        return Err(EngineError::InvalidRange {
            stay: *stay,
            reason: "check-out date must be after check-in date",
        });
    }
    Ok(())
}

/// Ordering and maximum length. Applies to every create and reschedule.
pub(crate) fn validate_stay(stay: &StayRange) -> Result<(), EngineError> {
    validate_order(stay)?;
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::InvalidRange {
            stay: *stay,
            reason: "booking cannot exceed 365 days",
        });
    }
    Ok(())
}

/// New bookings may start today but not earlier.
pub(crate) fn validate_not_past(stay: &StayRange, today: NaiveDate) -> Result<(), EngineError> {
    if stay.check_in < today {
        return Err(EngineError::PastDate {
            check_in: stay.check_in,
            today,
        });
    }
    Ok(())
}

/// Validate catalog fields and normalize the price to two decimal places.
pub(crate) fn validate_room_spec(mut spec: RoomSpec) -> Result<RoomSpec, EngineError> {
    if spec.number.trim().is_empty() {
        return Err(EngineError::LimitExceeded("room number must not be empty"));
    }
    if spec.number.chars().count() > MAX_ROOM_NUMBER_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    if spec
        .description
        .as_ref()
        .is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LEN)
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    let price = spec.price_per_night;
    if price <= rust_decimal::Decimal::ZERO {
        return Err(EngineError::InvalidPrice(format!("{price} must be greater than zero")));
    }
    if price.normalize().scale() > PRICE_SCALE {
        return Err(EngineError::InvalidPrice(format!("{price} has more than two decimal places")));
    }
    if price > MAX_PRICE {
        return Err(EngineError::InvalidPrice(format!("{price} exceeds {MAX_PRICE}")));
    }
    if !(MIN_CAPACITY..=MAX_CAPACITY).contains(&spec.capacity) {
        return Err(EngineError::InvalidCapacity(spec.capacity));
    }
    spec.price_per_night.rescale(PRICE_SCALE);
    Ok(spec)
}

/// First active booking on the room overlapping `stay`, ignoring `exclude`.
/// Cancelled bookings never block.
pub(crate) fn find_conflict<'a>(
    rs: &'a RoomState,
    stay: &StayRange,
    exclude: Option<Ulid>,
) -> Option<&'a Booking> {
    rs.overlapping(stay)
        .find(|b| b.is_active() && Some(b.id) != exclude)
}

pub(crate) fn check_no_conflict(
    rs: &RoomState,
    stay: &StayRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match find_conflict(rs, stay, exclude) {
        Some(existing) => Err(EngineError::RoomUnavailable {
            room_id: rs.id,
            conflict: Conflict {
                booking_id: existing.id,
                stay: existing.stay,
            },
        }),
        None => Ok(()),
    }
}
