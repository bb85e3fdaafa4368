use chrono::Datelike;

use super::slots::{generate, SlotTime};
use super::BookingWindowError;
use crate::limits::MAX_SLOTS_PER_RESERVATION;
use crate::model::*;
use crate::schedule::ScheduleConfig;

/// Check a requested start against the court's booking policy.
///
/// Checks run in a fixed order and the first failure is returned: operating
/// day, minimum notice, maximum advance, slot alignment.
pub fn validate(config: &ScheduleConfig, now: Ms, requested_start: Ms) -> Result<(), BookingWindowError> {
    day_slots(config, now, requested_start).map(|_| ())
}

/// Like [`validate`], for a reservation that may cover several consecutive
/// slots. `span.end` must land on a slot end of the same day. Returns the
/// covered slots.
pub fn validate_span(config: &ScheduleConfig, now: Ms, span: Span) -> Result<Vec<SlotTime>, BookingWindowError> {
    let slots = day_slots(config, now, span.start)?;
    let first = slots
        .iter()
        .position(|s| s.span.start == span.start)
        .ok_or(BookingWindowError::MisalignedSlot)?;

    let mut covered = Vec::new();
    let mut cursor = span.start;
    for slot in &slots[first..] {
        if slot.span.start != cursor || covered.len() == MAX_SLOTS_PER_RESERVATION {
            break;
        }
        covered.push(*slot);
        cursor = slot.span.end;
        if cursor >= span.end {
            break;
        }
    }
    if cursor != span.end {
        return Err(BookingWindowError::MisalignedSlot);
    }
    Ok(covered)
}

fn day_slots(config: &ScheduleConfig, now: Ms, start: Ms) -> Result<Vec<SlotTime>, BookingWindowError> {
    let local = config
        .ms_to_local(start)
        .ok_or(BookingWindowError::MisalignedSlot)?;
    let date = local.date();
    if !config.weekdays.contains(date.weekday()) {
        return Err(BookingWindowError::OutsideOperatingDays);
    }
    let lead = start - now;
    if lead < config.min_advance_ms() {
        return Err(BookingWindowError::TooSoon {
            min_advance_hours: config.min_advance_hours,
        });
    }
    if lead > config.max_advance_ms() {
        return Err(BookingWindowError::TooFarAhead {
            max_advance_days: config.max_advance_days,
        });
    }
    let slots = generate(config, date);
    if !slots.iter().any(|s| s.span.start == start) {
        return Err(BookingWindowError::MisalignedSlot);
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{hm, TrailingSlot, WeekdaySet};
    use chrono::{NaiveDate, NaiveTime, Weekday};

    const H: Ms = MS_PER_HOUR;
    const M: Ms = MS_PER_MINUTE;

    // 2026-10-19 is a Monday.
    fn at(day: u32, t: NaiveTime) -> Ms {
        NaiveDate::from_ymd_opt(2026, 10, day)
            .unwrap()
            .and_time(t)
            .and_utc()
            .timestamp_millis()
    }

    fn config() -> ScheduleConfig {
        ScheduleConfig::new(hm(9, 0), hm(22, 0), 60).with_advance(1, 30)
    }

    #[test]
    fn min_advance_boundary() {
        let now = at(19, hm(14, 30));
        assert_eq!(
            validate(&config(), now, at(19, hm(15, 0))),
            Err(BookingWindowError::TooSoon { min_advance_hours: 1 })
        );
        assert_eq!(validate(&config(), now, at(19, hm(16, 0))), Ok(()));
    }

    #[test]
    fn exactly_min_advance_passes() {
        let now = at(19, hm(14, 0));
        assert_eq!(validate(&config(), now, at(19, hm(15, 0))), Ok(()));
        assert!(validate(&config(), now + 1, at(19, hm(15, 0))).is_err());
    }

    #[test]
    fn max_advance_boundary() {
        let config = config().with_advance(0, 2);
        let now = at(19, hm(10, 0));
        assert_eq!(validate(&config, now, at(21, hm(10, 0))), Ok(()));
        assert_eq!(
            validate(&config, now, at(21, hm(11, 0))),
            Err(BookingWindowError::TooFarAhead { max_advance_days: 2 })
        );
    }

    #[test]
    fn closed_day_rejected_before_notice_checks() {
        let config = config().with_weekdays(WeekdaySet::single(Weekday::Tue));
        // Monday, and also too soon: the weekday check wins.
        let now = at(19, hm(9, 30));
        assert_eq!(
            validate(&config, now, at(19, hm(10, 0))),
            Err(BookingWindowError::OutsideOperatingDays)
        );
        assert_eq!(validate(&config, now, at(20, hm(10, 0))), Ok(()));
    }

    #[test]
    fn misaligned_start_rejected() {
        let now = at(19, hm(8, 0));
        for start in [at(20, hm(10, 30)), at(20, hm(8, 0)), at(20, hm(22, 0)), at(20, hm(10, 0)) + M] {
            assert_eq!(
                validate(&config(), now, start),
                Err(BookingWindowError::MisalignedSlot),
                "start {start}"
            );
        }
    }

    #[test]
    fn past_start_is_too_soon() {
        let now = at(19, hm(12, 0));
        assert_eq!(
            validate(&config(), now, at(19, hm(10, 0))),
            Err(BookingWindowError::TooSoon { min_advance_hours: 1 })
        );
    }

    #[test]
    fn span_covering_consecutive_slots() {
        let now = at(19, hm(8, 0));
        let covered = validate_span(&config(), now, Span::new(at(20, hm(10, 0)), at(20, hm(12, 0)))).unwrap();
        assert_eq!(covered.len(), 2);
        assert_eq!(covered[0].start, hm(10, 0));
        assert_eq!(covered[1].end, hm(12, 0));
    }

    #[test]
    fn span_end_must_be_slot_aligned() {
        let now = at(19, hm(8, 0));
        let start = at(20, hm(10, 0));
        assert_eq!(
            validate_span(&config(), now, Span::new(start, start + 90 * M)),
            Err(BookingWindowError::MisalignedSlot)
        );
        assert_eq!(
            validate_span(&config(), now, Span::new(start, start + 30 * M)),
            Err(BookingWindowError::MisalignedSlot)
        );
    }

    #[test]
    fn span_past_close_rejected() {
        let now = at(19, hm(8, 0));
        assert_eq!(
            validate_span(&config(), now, Span::new(at(20, hm(21, 0)), at(20, hm(23, 0)))),
            Err(BookingWindowError::MisalignedSlot)
        );
    }

    #[test]
    fn span_longer_than_limit_rejected() {
        let now = at(19, hm(8, 0));
        let start = at(20, hm(9, 0));
        let max = MAX_SLOTS_PER_RESERVATION as Ms;
        assert!(validate_span(&config(), now, Span::new(start, start + max * H)).is_ok());
        assert_eq!(
            validate_span(&config(), now, Span::new(start, start + (max + 1) * H)),
            Err(BookingWindowError::MisalignedSlot)
        );
    }

    #[test]
    fn truncated_trailing_slot_is_bookable() {
        let config = ScheduleConfig::new(hm(9, 0), hm(10, 30), 60);
        let now = at(19, hm(6, 0));
        let span = Span::new(at(19, hm(10, 0)), at(19, hm(10, 30)));
        assert_eq!(validate_span(&config, now, span).unwrap().len(), 1);

        let config = config.with_trailing_slot(TrailingSlot::Drop);
        assert_eq!(validate_span(&config, now, span), Err(BookingWindowError::MisalignedSlot));
    }
}
