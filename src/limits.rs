use crate::model::Ms;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;
pub const MAX_DESCRIPTION_LEN: usize = 4096;

pub const MAX_USERS: usize = 1_000_000;
pub const MAX_ITEMS: usize = 1_000_000;
pub const MAX_BOOKINGS_PER_ITEM: usize = 100_000;

/// Largest WAL frame payload. A longer length prefix is a corrupt tail.
pub const MAX_EVENT_BYTES: usize = 64 * 1024;

/// Largest page a listing may request.
pub const MAX_PAGE_SIZE: i64 = 1_000;

/// 1970-01-01 .. 2200-01-01
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Ten years.
pub const MAX_BOOKING_DURATION_MS: Ms = 10 * 365 * 24 * 3_600_000;
