use chrono::NaiveTime;
use rust_decimal::Decimal;
use thiserror::Error;
use ulid::Ulid;

use crate::model::ReservationStatus;

/// Invalid schedule or price configuration. Raised when the configuration is
/// saved; the read path only logs anomalies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("open time {open} must be before close time {close}")]
    InvalidHours { open: NaiveTime, close: NaiveTime },
    #[error("time {0} must be whole minutes")]
    NotMinuteAligned(NaiveTime),
    #[error("slot duration must be positive")]
    ZeroSlotDuration,
    #[error("slot duration of {0} minutes exceeds one day")]
    SlotTooLong(u32),
    #[error("at least one weekday must be available")]
    NoWeekdays,
    #[error("weekday {0} out of range 1-7")]
    InvalidWeekday(u8),
    #[error("malformed weekday list: {0:?}")]
    MalformedWeekdays(String),
    #[error("unknown trailing slot policy: {0}")]
    UnknownTrailingSlotPolicy(String),
    #[error("maximum advance of {0} days is too far")]
    AdvanceTooFar(u32),
    #[error("unknown time zone: {0}")]
    UnknownTimezone(String),
    #[error("hourly rate must not be negative: {0}")]
    NegativeRate(Decimal),
    #[error("hourly rate {0} exceeds the maximum of {max}", max = crate::limits::MAX_HOURLY_RATE)]
    RateTooHigh(Decimal),
    #[error("price period [{start}, {end}) is empty or inverted")]
    InvalidPeriod { start: NaiveTime, end: NaiveTime },
    #[error(
        "price adjustment {0}% out of range {min}..=100",
        min = crate::limits::MIN_ADJUSTMENT_PERCENT
    )]
    AdjustmentOutOfRange(Decimal),
    #[error("price out of range")]
    PriceOverflow,
    #[error("price period {added} overlaps existing period {existing}")]
    OverlappingPeriods { existing: Ulid, added: Ulid },
}

/// A requested start that the court's booking policy does not allow. Each
/// variant is reported as-is so the client can say exactly what to change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BookingWindowError {
    #[error("the court does not open on that day")]
    OutsideOperatingDays,
    #[error("too soon: slots must be booked at least {min_advance_hours}h ahead")]
    TooSoon { min_advance_hours: u32 },
    #[error("too far ahead: slots may be booked at most {max_advance_days} days ahead")]
    TooFarAhead { max_advance_days: u32 },
    #[error("requested time does not line up with the court's slots")]
    MisalignedSlot,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    /// Lost the race for a time range. The id is the entry holding it.
    #[error("conflict with existing reservation or block: {0}")]
    Conflict(Ulid),
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("booking window: {0}")]
    BookingWindow(#[from] BookingWindowError),
    #[error("reservation {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: Ulid,
        from: ReservationStatus,
        to: ReservationStatus,
    },
    #[error("payment window of reservation {0} has closed")]
    PaymentWindowClosed(Ulid),
    #[error("court {0} is not available for booking")]
    CourtUnavailable(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("timed out waiting for the court ledger")]
    Timeout,
    #[error("journal error: {0}")]
    Storage(String),
}

impl EngineError {
    /// Transient infrastructure failures. Safe to retry as-is, unlike a
    /// `Conflict`, which needs a different slot.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Timeout | EngineError::Storage(_))
    }
}
