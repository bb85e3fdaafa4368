use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::engine::ConfigError;
use crate::limits::*;
use crate::model::Ms;

/// Set of operating weekdays. Stored as a bitmask, bit 0 = Monday.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub const EMPTY: WeekdaySet = WeekdaySet(0);
    pub const ALL: WeekdaySet = WeekdaySet(0b111_1111);

    pub fn single(day: Weekday) -> Self {
        WeekdaySet(1 << day.num_days_from_monday())
    }

    /// Build from ISO day numbers, 1 = Monday .. 7 = Sunday.
    pub fn from_iso(days: &[u8]) -> Result<Self, ConfigError> {
        let mut set = WeekdaySet::EMPTY;
        for &d in days {
            if !(1..=7).contains(&d) {
                return Err(ConfigError::InvalidWeekday(d));
            }
            set.0 |= 1 << (d - 1);
        }
        Ok(set)
    }

    pub fn insert(&mut self, day: Weekday) {
        self.0 |= 1 << day.num_days_from_monday();
    }

    pub fn contains(&self, day: Weekday) -> bool {
        self.0 & (1 << day.num_days_from_monday()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// ISO numbers of the days in the set, ascending.
    pub fn iso_days(&self) -> Vec<u8> {
        (0..7u8).filter(|b| self.0 & (1 << b) != 0).map(|b| b + 1).collect()
    }
}

impl fmt::Debug for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeekdaySet({self})")
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<String> = self.iso_days().iter().map(u8::to_string).collect();
        f.write_str(&days.join(","))
    }
}

/// Parses the comma separated ISO form, e.g. `"1,2,3,4,5"`. Validation happens
/// here, at write time, so the engine never sees a malformed day list.
impl FromStr for WeekdaySet {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut days = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let day: u8 = part
                .parse()
                .map_err(|_| ConfigError::MalformedWeekdays(s.to_string()))?;
            days.push(day);
        }
        WeekdaySet::from_iso(&days)
    }
}

/// What to do with the last slot of the day when `slot_minutes` does not
/// evenly divide the open/close window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrailingSlot {
    /// Emit the short slot, ending at close time.
    #[default]
    Truncate,
    /// Only emit full-length slots.
    Drop,
}

impl TrailingSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrailingSlot::Truncate => "truncate",
            TrailingSlot::Drop => "drop",
        }
    }
}

impl FromStr for TrailingSlot {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "truncate" => Ok(TrailingSlot::Truncate),
            "drop" => Ok(TrailingSlot::Drop),
            other => Err(ConfigError::UnknownTrailingSlotPolicy(other.to_string())),
        }
    }
}

/// Per-court operating policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
    pub slot_minutes: u32,
    pub weekdays: WeekdaySet,
    /// How soon before its start a slot may still be booked.
    pub min_advance_hours: u32,
    /// How far into the future a slot may be booked.
    pub max_advance_days: u32,
    pub trailing_slot: TrailingSlot,
    /// Zone that `open_time`, `close_time` and dates are expressed in.
    pub timezone: Tz,
}

impl Default for ScheduleConfig {
    /// 09:00–22:00, one-hour slots every day, bookable from 1 hour to 30 days ahead.
    fn default() -> Self {
        Self {
            open_time: hm(9, 0),
            close_time: hm(22, 0),
            slot_minutes: 60,
            weekdays: WeekdaySet::ALL,
            min_advance_hours: 1,
            max_advance_days: 30,
            trailing_slot: TrailingSlot::Truncate,
            timezone: Tz::UTC,
        }
    }
}

impl ScheduleConfig {
    pub fn new(open_time: NaiveTime, close_time: NaiveTime, slot_minutes: u32) -> Self {
        Self {
            open_time,
            close_time,
            slot_minutes,
            ..Self::default()
        }
    }

    pub fn with_weekdays(mut self, weekdays: WeekdaySet) -> Self {
        self.weekdays = weekdays;
        self
    }

    pub fn with_advance(mut self, min_advance_hours: u32, max_advance_days: u32) -> Self {
        self.min_advance_hours = min_advance_hours;
        self.max_advance_days = max_advance_days;
        self
    }

    pub fn with_trailing_slot(mut self, trailing_slot: TrailingSlot) -> Self {
        self.trailing_slot = trailing_slot;
        self
    }

    pub fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for t in [self.open_time, self.close_time] {
            if t.second() != 0 || t.nanosecond() != 0 {
                return Err(ConfigError::NotMinuteAligned(t));
            }
        }
        if self.open_time >= self.close_time {
            return Err(ConfigError::InvalidHours {
                open: self.open_time,
                close: self.close_time,
            });
        }
        if self.slot_minutes == 0 {
            return Err(ConfigError::ZeroSlotDuration);
        }
        if self.slot_minutes > MAX_SLOT_MINUTES {
            return Err(ConfigError::SlotTooLong(self.slot_minutes));
        }
        if self.weekdays.is_empty() {
            return Err(ConfigError::NoWeekdays);
        }
        if self.max_advance_days > MAX_ADVANCE_DAYS {
            return Err(ConfigError::AdvanceTooFar(self.max_advance_days));
        }
        Ok(())
    }

    pub fn min_advance_ms(&self) -> Ms {
        self.min_advance_hours as Ms * crate::model::MS_PER_HOUR
    }

    pub fn max_advance_ms(&self) -> Ms {
        self.max_advance_days as Ms * crate::model::MS_PER_DAY
    }

    /// Local wall-clock time → instant. Local times skipped by a DST jump
    /// return `None`; repeated ones resolve to the earlier instant.
    pub fn local_to_ms(&self, local: NaiveDateTime) -> Option<Ms> {
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.timestamp_millis())
    }

    pub fn ms_to_local(&self, ms: Ms) -> Option<NaiveDateTime> {
        DateTime::from_timestamp_millis(ms).map(|utc| utc.with_timezone(&self.timezone).naive_local())
    }
}

pub(crate) fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}
