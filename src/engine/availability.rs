use crate::model::*;

// ── Last / next booking annotation ─────────────────────────────────

/// The APPROVED booking with the latest start strictly before `now`.
///
/// `started_before` is sorted by start, so walking it backwards yields the
/// latest start first; equal starts resolve to the higher id.
pub fn last_booking(state: &ItemState, now: Ms) -> Option<&Booking> {
    state
        .started_before(now)
        .iter()
        .rev()
        .find(|b| b.status == BookingStatus::Approved)
}

/// The booking with the earliest start strictly after `now`, or nothing if
/// that booking was rejected. There is no fallback to the one after it.
pub fn next_booking(state: &ItemState, now: Ms) -> Option<&Booking> {
    state
        .starting_after(now)
        .first()
        .filter(|b| b.status != BookingStatus::Rejected)
}
