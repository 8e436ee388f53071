use crate::model::{Ms, DAY_MS};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// A single reservation may not be longer than a week.
pub const MAX_SPAN_DURATION_MS: Ms = 7 * DAY_MS;

pub const MAX_PURPOSE_LEN: usize = 1024;
pub const MAX_ROOM_NAME_LEN: usize = 256;

/// Active reservations held in one room or user ledger.
pub const MAX_SLOTS_PER_LEDGER: usize = 100_000;

/// Availability queries over a window wider than this are refused.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// Largest encoded event a WAL frame may carry. Anything bigger is corruption.
pub const MAX_WAL_FRAME_BYTES: usize = 64 * 1024;
