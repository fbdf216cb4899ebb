//! Hard bounds on engine inputs.

pub const MAX_RESTAURANTS: usize = 10_000;
pub const MAX_BOOKINGS_PER_RESTAURANT: usize = 500_000;
pub const MAX_CAPACITY: u32 = 10_000;
pub const MAX_PARTY_SIZE: u32 = 100;
pub const MAX_TEXT_LEN: usize = 256;
pub const MAX_TRANSLATIONS: usize = 8;
/// Bookings further out than this many days are rejected.
pub const MAX_BOOKING_HORIZON_DAYS: i64 = 366;
pub const MIN_AVAILABILITY_STEP_MINUTES: u32 = 5;

/// Largest WAL frame payload. Longer length words are treated as corruption.
pub const MAX_WAL_FRAME_BYTES: usize = 1 << 20;
