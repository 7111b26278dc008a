use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;

/// 9999-12-31T23:59:59.999Z, the last instant a four-digit-year date can name.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// A single slot may not span more than a leap year. Slots are exclusive
/// system-wide, so this caps how much timeline one request can claim.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * DAY_MS;

pub const MAX_SLOTS_PER_REQUEST: usize = 256;

pub const MAX_SLOTS_PER_BOOKING: usize = 1024;
