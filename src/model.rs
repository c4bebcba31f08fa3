use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Store-assigned numeric identifier for users, items and bookings.
pub type Id = u64;

/// Half-open booking window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Started strictly before `now` and ends strictly after it.
    pub fn is_current(&self, now: Ms) -> bool {
        self.start < now && self.end > now
    }

    pub fn is_future(&self, now: Ms) -> bool {
        self.start > now
    }

    pub fn is_past(&self, now: Ms) -> bool {
        self.end < now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Waiting,
    Approved,
    Rejected,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Waiting => "WAITING",
            BookingStatus::Approved => "APPROVED",
            BookingStatus::Rejected => "REJECTED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filter applied when listing bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingState {
    All,
    Current,
    Future,
    Past,
    Waiting,
    Rejected,
}

impl BookingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingState::All => "ALL",
            BookingState::Current => "CURRENT",
            BookingState::Future => "FUTURE",
            BookingState::Past => "PAST",
            BookingState::Waiting => "WAITING",
            BookingState::Rejected => "REJECTED",
        }
    }

    /// Whether `booking` falls into this state at `now`.
    pub fn matches(&self, booking: &Booking, now: Ms) -> bool {
        match self {
            BookingState::All => true,
            BookingState::Current => booking.span.is_current(now),
            BookingState::Future => booking.span.is_future(now),
            BookingState::Past => booking.span.is_past(now),
            BookingState::Waiting => booking.status == BookingStatus::Waiting,
            BookingState::Rejected => booking.status == BookingStatus::Rejected,
        }
    }
}

/// Exact, case-sensitive match against the state tokens.
impl FromStr for BookingState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ALL" => Ok(BookingState::All),
            "CURRENT" => Ok(BookingState::Current),
            "FUTURE" => Ok(BookingState::Future),
            "PAST" => Ok(BookingState::Past),
            "WAITING" => Ok(BookingState::Waiting),
            "REJECTED" => Ok(BookingState::Rejected),
            other => Err(format!("unknown state: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Id,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Id,
    pub owner_id: Id,
    pub name: String,
    pub description: String,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Id,
    pub item_id: Id,
    pub booker_id: Id,
    pub span: Span,
    pub status: BookingStatus,
}

/// An item together with every booking made on it.
#[derive(Debug, Clone)]
pub struct ItemState {
    pub item: Item,
    /// Sorted by `span.start`; equal starts keep insertion (id) order.
    pub bookings: Vec<Booking>,
}

impl ItemState {
    pub fn new(item: Item) -> Self {
        Self {
            item,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining sort order by start.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .partition_point(|b| b.span.start <= booking.span.start);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Id) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Id) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Bookings whose start is strictly before `now`, in start order.
    pub fn started_before(&self, now: Ms) -> &[Booking] {
        let bound = self.bookings.partition_point(|b| b.span.start < now);
        &self.bookings[..bound]
    }

    /// Bookings whose start is strictly after `now`, in start order.
    pub fn starting_after(&self, now: Ms) -> &[Booking] {
        let bound = self.bookings.partition_point(|b| b.span.start <= now);
        &self.bookings[bound..]
    }
}

/// Flat event types. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Id,
        name: String,
        email: String,
    },
    ItemListed {
        id: Id,
        owner_id: Id,
        name: String,
        description: String,
        available: bool,
    },
    ItemAvailabilityChanged {
        id: Id,
        available: bool,
    },
    BookingRequested {
        id: Id,
        item_id: Id,
        booker_id: Id,
        span: Span,
    },
    BookingDecided {
        id: Id,
        item_id: Id,
        status: BookingStatus,
    },
}

// ── Read projections ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub id: Id,
    pub name: String,
    pub owner_id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookerInfo {
    pub id: Id,
}

/// What callers see of a booking. Built fresh on every read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingView {
    pub id: Id,
    pub start: Ms,
    pub end: Ms,
    pub item: ItemInfo,
    pub booker: BookerInfo,
    pub status: BookingStatus,
}

impl BookingView {
    pub fn new(booking: &Booking, item: &Item) -> Self {
        Self {
            id: booking.id,
            start: booking.span.start,
            end: booking.span.end,
            item: ItemInfo {
                id: item.id,
                name: item.name.clone(),
                owner_id: item.owner_id,
            },
            booker: BookerInfo {
                id: booking.booker_id,
            },
            status: booking.status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookingRef {
    pub id: Id,
    pub booker_id: Id,
}

impl From<&Booking> for BookingRef {
    fn from(b: &Booking) -> Self {
        Self {
            id: b.id,
            booker_id: b.booker_id,
        }
    }
}

/// An item as displayed; the booking annotations are only filled for its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemDetails {
    pub item: Item,
    pub last_booking: Option<BookingRef>,
    pub next_booking: Option<BookingRef>,
}
