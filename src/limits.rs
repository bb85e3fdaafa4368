//! Hard limits applied to every club. Requests beyond these fail with
//! `EngineError::LimitExceeded` instead of growing memory without bound.

use crate::model::Ms;

pub const MAX_CLUBS: usize = 1024;
pub const MAX_CLUB_NAME_LEN: usize = 256;

pub const MAX_COURTS_PER_CLUB: usize = 10_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 256;

/// Reservations and blocks kept per court, cancelled ones included.
pub const MAX_ENTRIES_PER_COURT: usize = 100_000;
pub const MAX_PRICE_PERIODS_PER_COURT: usize = 48;

/// Consecutive slots a single reservation may cover.
pub const MAX_SLOTS_PER_RESERVATION: usize = 8;

/// Highest hourly rate a court may be registered with.
pub const MAX_HOURLY_RATE: i64 = 1_000_000;
/// Steepest surcharge a price period may apply, in percent (-1000 is 11x).
pub const MIN_ADJUSTMENT_PERCENT: i64 = -1_000;

pub const MAX_SLOT_MINUTES: u32 = 24 * 60;
pub const MAX_ADVANCE_DAYS: u32 = 365;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;
