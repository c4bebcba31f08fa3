use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

/// Booking bounds: start strictly before end, inside the supported range.
pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start == span.end {
        return Err(EngineError::InvalidInput(
            "start time can't be equal to end time".into(),
        ));
    }
    if span.start > span.end {
        return Err(EngineError::InvalidInput(
            "start time must be before end time".into(),
        ));
    }
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_BOOKING_DURATION_MS {
        return Err(EngineError::LimitExceeded("booking too long"));
    }
    Ok(())
}

pub(crate) fn validate_text(
    value: &str,
    field: &str,
    max_len: usize,
    limit_msg: &'static str,
) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} must not be blank")));
    }
    if value.len() > max_len {
        return Err(EngineError::LimitExceeded(limit_msg));
    }
    Ok(())
}

pub(crate) fn parse_state(token: &str) -> Result<BookingState, EngineError> {
    token.parse().map_err(EngineError::InvalidInput)
}

/// Offset must be non-negative, limit at least one.
pub(crate) fn validate_page(offset: i64, limit: i64) -> Result<(), EngineError> {
    if offset < 0 {
        return Err(EngineError::InvalidInput(format!(
            "offset must not be negative, got {offset}"
        )));
    }
    if limit < 1 {
        return Err(EngineError::InvalidInput(format!(
            "limit must be at least 1, got {limit}"
        )));
    }
    if limit > MAX_PAGE_SIZE {
        return Err(EngineError::LimitExceeded("page too large"));
    }
    Ok(())
}

/// Page `offset / limit` of size `limit`. An offset that is not a multiple of
/// `limit` rounds down to the start of its page.
pub(crate) fn page<T>(rows: Vec<T>, offset: i64, limit: i64) -> Vec<T> {
    let limit = limit as usize;
    let first = (offset as usize / limit).saturating_mul(limit);
    rows.into_iter().skip(first).take(limit).collect()
}

// ── Authorization ────────────────────────────────────────────

pub(crate) fn ensure_not_owner(item: &Item, user_id: Id) -> Result<(), EngineError> {
    if item.owner_id == user_id {
        return Err(EngineError::Forbidden(format!(
            "owner cannot book their own item {}",
            item.id
        )));
    }
    Ok(())
}

pub(crate) fn ensure_owner(item: &Item, user_id: Id) -> Result<(), EngineError> {
    if item.owner_id != user_id {
        return Err(EngineError::Forbidden(format!(
            "user {user_id} is not the owner of item {}",
            item.id
        )));
    }
    Ok(())
}

/// Only the item owner and the booker may see a booking.
pub(crate) fn ensure_participant(
    item: &Item,
    booking: &Booking,
    user_id: Id,
) -> Result<(), EngineError> {
    if user_id != item.owner_id && user_id != booking.booker_id {
        return Err(EngineError::Forbidden(format!(
            "user {user_id} is not allowed to access booking {}",
            booking.id
        )));
    }
    Ok(())
}

/// Status an owner's decision moves a booking to.
///
/// Only repeating the decision the booking already carries is refused; a
/// REJECTED booking can still be approved and an APPROVED one rejected.
pub(crate) fn decide(current: BookingStatus, approve: bool) -> Result<BookingStatus, EngineError> {
    match (approve, current) {
        (true, BookingStatus::Approved) | (false, BookingStatus::Rejected) => Err(
            EngineError::InvalidState("booking status was already changed".into()),
        ),
        (true, _) => Ok(BookingStatus::Approved),
        (false, _) => Ok(BookingStatus::Rejected),
    }
}
