use chrono::{Datelike, Duration, NaiveDate, NaiveTime};

use crate::model::*;
use crate::schedule::{ScheduleConfig, TrailingSlot};

/// Boundaries of one candidate slot, before price and state are attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotTime {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub span: Span,
}

impl SlotTime {
    pub fn minutes(&self) -> u32 {
        (self.end - self.start).num_minutes() as u32
    }
}

/// Enumerate the slots of `date`, ascending by start.
///
/// Walks from `open_time` in steps of `slot_minutes`. Every slot ends at
/// `min(start + slot_minutes, close_time)`; whether a short final slot is
/// kept depends on [`TrailingSlot`]. Days outside `weekdays` have no slots.
/// Local times that do not exist in the court's zone are skipped.
pub fn generate(config: &ScheduleConfig, date: NaiveDate) -> Vec<SlotTime> {
    if !config.weekdays.contains(date.weekday()) || config.slot_minutes == 0 {
        return Vec::new();
    }
    let step = Duration::minutes(config.slot_minutes as i64);
    let close = config.close_time;

    let mut slots = Vec::new();
    let mut start = config.open_time;
    while start < close {
        let (next, wrapped) = start.overflowing_add_signed(step);
        let full = wrapped == 0 && next <= close;
        if !full && config.trailing_slot == TrailingSlot::Drop {
            break;
        }
        let end = if full { next } else { close };

        if let (Some(s), Some(e)) = (
            config.local_to_ms(date.and_time(start)),
            config.local_to_ms(date.and_time(end)),
        ) && s < e
        {
            slots.push(SlotTime {
                date,
                start,
                end,
                span: Span::new(s, e),
            });
        }

        if !full {
            break;
        }
        start = next;
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::{hm, WeekdaySet};
    use chrono::Weekday;

    // 2026-10-19 is a Monday.
    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn times(slots: &[SlotTime]) -> Vec<(NaiveTime, NaiveTime)> {
        slots.iter().map(|s| (s.start, s.end)).collect()
    }

    #[test]
    fn two_hour_window_one_hour_slots() {
        let config = ScheduleConfig::new(hm(9, 0), hm(11, 0), 60);
        let slots = generate(&config, monday());
        assert_eq!(times(&slots), vec![(hm(9, 0), hm(10, 0)), (hm(10, 0), hm(11, 0))]);
        assert_eq!(slots[0].span.duration_ms(), MS_PER_HOUR);
    }

    #[test]
    fn closed_weekday_has_no_slots() {
        let config = ScheduleConfig::new(hm(9, 0), hm(11, 0), 60)
            .with_weekdays(WeekdaySet::single(Weekday::Tue));
        assert!(generate(&config, monday()).is_empty());
        assert_eq!(generate(&config, monday().succ_opt().unwrap()).len(), 2);
    }

    #[test]
    fn slots_cover_window_without_gaps_or_overlaps() {
        for minutes in [15, 30, 45, 60, 90, 120, 240] {
            let config = ScheduleConfig::new(hm(8, 0), hm(22, 30), minutes);
            let slots = generate(&config, monday());
            assert_eq!(slots.first().unwrap().start, hm(8, 0));
            assert_eq!(slots.last().unwrap().end, hm(22, 30), "{minutes}-minute slots");
            for pair in slots.windows(2) {
                assert_eq!(pair[0].end, pair[1].start);
                assert_eq!(pair[0].span.end, pair[1].span.start);
                assert!(pair[0].span.start < pair[1].span.start);
            }
        }
    }

    #[test]
    fn trailing_partial_slot_is_truncated_by_default() {
        // 09:00–10:30 with 60 minute slots leaves 30 minutes at the end.
        let config = ScheduleConfig::new(hm(9, 0), hm(10, 30), 60);
        let slots = generate(&config, monday());
        assert_eq!(times(&slots), vec![(hm(9, 0), hm(10, 0)), (hm(10, 0), hm(10, 30))]);
        assert_eq!(slots[1].minutes(), 30);
    }

    #[test]
    fn trailing_partial_slot_dropped_when_configured() {
        let config = ScheduleConfig::new(hm(9, 0), hm(10, 30), 60).with_trailing_slot(TrailingSlot::Drop);
        let slots = generate(&config, monday());
        assert_eq!(times(&slots), vec![(hm(9, 0), hm(10, 0))]);
    }

    #[test]
    fn exact_division_is_unaffected_by_policy() {
        for policy in [TrailingSlot::Truncate, TrailingSlot::Drop] {
            let config = ScheduleConfig::new(hm(9, 0), hm(12, 0), 90).with_trailing_slot(policy);
            assert_eq!(generate(&config, monday()).len(), 2);
        }
    }

    #[test]
    fn slot_longer_than_window() {
        let config = ScheduleConfig::new(hm(9, 0), hm(10, 0), 120);
        assert_eq!(times(&generate(&config, monday())), vec![(hm(9, 0), hm(10, 0))]);

        let config = config.with_trailing_slot(TrailingSlot::Drop);
        assert!(generate(&config, monday()).is_empty());
    }

    #[test]
    fn step_past_midnight_does_not_wrap() {
        let config = ScheduleConfig::new(hm(22, 0), hm(23, 30), 60);
        let slots = generate(&config, monday());
        assert_eq!(times(&slots), vec![(hm(22, 0), hm(23, 0)), (hm(23, 0), hm(23, 30))]);
    }

    #[test]
    fn deterministic() {
        let config = ScheduleConfig::new(hm(7, 0), hm(23, 0), 45);
        assert_eq!(generate(&config, monday()), generate(&config, monday()));
    }

    #[test]
    fn dst_gap_skips_missing_local_times() {
        // Europe/Madrid jumps from 02:00 to 03:00 on 2026-03-29.
        let config = ScheduleConfig::new(hm(0, 0), hm(5, 0), 60).with_timezone(chrono_tz::Europe::Madrid);
        let date = NaiveDate::from_ymd_opt(2026, 3, 29).unwrap();
        let slots = generate(&config, date);
        let starts: Vec<NaiveTime> = slots.iter().map(|s| s.start).collect();
        assert_eq!(starts, vec![hm(0, 0), hm(1, 0), hm(3, 0), hm(4, 0)]);
    }
}
