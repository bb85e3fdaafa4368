use chrono::NaiveTime;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ConfigError;
use crate::limits::*;

/// A time-of-day window with a percentage price adjustment. Positive
/// percentages discount, negative ones surcharge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricePeriod {
    pub id: Ulid,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub label: Option<String>,
    pub adjustment_percent: Decimal,
}

impl PricePeriod {
    pub fn contains(&self, t: NaiveTime) -> bool {
        self.start_time <= t && t < self.end_time
    }

    pub fn overlaps(&self, other: &PricePeriod) -> bool {
        self.start_time < other.end_time && other.start_time < self.end_time
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.start_time >= self.end_time {
            return Err(ConfigError::InvalidPeriod {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.adjustment_percent > Decimal::ONE_HUNDRED
            || self.adjustment_percent < Decimal::from(MIN_ADJUSTMENT_PERCENT)
        {
            return Err(ConfigError::AdjustmentOutOfRange(self.adjustment_percent));
        }
        Ok(())
    }
}

/// A court's rate table, kept sorted by `start_time`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceTable {
    periods: Vec<PricePeriod>,
}

impl PriceTable {
    pub fn periods(&self) -> &[PricePeriod] {
        &self.periods
    }

    pub fn len(&self) -> usize {
        self.periods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periods.is_empty()
    }

    /// Whether `period` could be added: well-formed and disjoint from every
    /// existing period. The size limit is the caller's concern.
    pub fn check(&self, period: &PricePeriod) -> Result<(), ConfigError> {
        period.validate()?;
        if let Some(existing) = self.periods.iter().find(|p| p.overlaps(period)) {
            return Err(ConfigError::OverlappingPeriods {
                existing: existing.id,
                added: period.id,
            });
        }
        Ok(())
    }

    pub fn insert(&mut self, period: PricePeriod) -> Result<(), ConfigError> {
        self.check(&period)?;
        self.insert_unchecked(period);
        Ok(())
    }

    /// Insert without validation. Used when applying journal events, which
    /// were checked before they were written.
    pub(crate) fn insert_unchecked(&mut self, period: PricePeriod) {
        let pos = self
            .periods
            .partition_point(|p| p.start_time <= period.start_time);
        self.periods.insert(pos, period);
    }

    pub fn remove(&mut self, id: Ulid) -> Option<PricePeriod> {
        let pos = self.periods.iter().position(|p| p.id == id)?;
        Some(self.periods.remove(pos))
    }

    pub fn contains_id(&self, id: Ulid) -> bool {
        self.periods.iter().any(|p| p.id == id)
    }

    pub fn has_room(&self) -> bool {
        self.periods.len() < MAX_PRICE_PERIODS_PER_COURT
    }

    pub fn price_for(&self, base: Decimal, slot_start: NaiveTime) -> Result<Decimal, ConfigError> {
        price_for(base, &self.periods, slot_start)
    }
}

/// Apply the period containing `slot_start`, if any, to `base`.
///
/// Periods are expected to be disjoint. If several match anyway, the first
/// one in `periods` wins and the anomaly is logged.
pub fn price_for(base: Decimal, periods: &[PricePeriod], slot_start: NaiveTime) -> Result<Decimal, ConfigError> {
    let mut matching = periods.iter().filter(|p| p.contains(slot_start));
    let Some(period) = matching.next() else {
        return Ok(base);
    };
    if let Some(other) = matching.next() {
        tracing::warn!(
            first = %period.id,
            other = %other.id,
            %slot_start,
            "overlapping price periods, applying the first"
        );
    }
    adjusted_price(base, period.adjustment_percent)
}

/// `base * (1 - percent/100)`, rounded half-up to cents.
pub fn adjusted_price(base: Decimal, adjustment_percent: Decimal) -> Result<Decimal, ConfigError> {
    let factor = Decimal::ONE
        .checked_sub(adjustment_percent / Decimal::ONE_HUNDRED)
        .ok_or(ConfigError::PriceOverflow)?;
    base.checked_mul(factor)
        .map(round_money)
        .ok_or(ConfigError::PriceOverflow)
}

/// Price of `minutes` of play at `hourly_rate`.
pub fn base_price(hourly_rate: Decimal, minutes: u32) -> Result<Decimal, ConfigError> {
    hourly_rate
        .checked_mul(Decimal::from(minutes))
        .and_then(|total| total.checked_div(Decimal::from(60)))
        .map(round_money)
        .ok_or(ConfigError::PriceOverflow)
}

/// Sum of slot prices, failing instead of overflowing.
pub fn total_price(prices: impl IntoIterator<Item = Decimal>) -> Result<Decimal, ConfigError> {
    prices
        .into_iter()
        .try_fold(Decimal::ZERO, |acc, p| acc.checked_add(p))
        .ok_or(ConfigError::PriceOverflow)
}

/// Cents, always shown with two decimals.
fn round_money(value: Decimal) -> Decimal {
    let mut cents = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    cents.rescale(2);
    cents
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::hm;

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    fn period(start: NaiveTime, end: NaiveTime, pct: Decimal) -> PricePeriod {
        PricePeriod {
            id: Ulid::new(),
            start_time: start,
            end_time: end,
            label: None,
            adjustment_percent: pct,
        }
    }

    #[test]
    fn surcharge_period_raises_price() {
        let periods = vec![period(hm(18, 0), hm(22, 0), d("-15"))];
        assert_eq!(price_for(d("1000"), &periods, hm(19, 0)).unwrap(), d("1150"));
    }

    #[test]
    fn discount_period_lowers_price() {
        let periods = vec![period(hm(9, 0), hm(12, 0), d("20"))];
        assert_eq!(price_for(d("1000"), &periods, hm(9, 0)).unwrap(), d("800"));
    }

    #[test]
    fn no_matching_period_returns_base() {
        let periods = vec![period(hm(18, 0), hm(22, 0), d("-15"))];
        assert_eq!(price_for(d("1000"), &periods, hm(17, 0)).unwrap(), d("1000"));
        assert_eq!(price_for(d("1000"), &[], hm(17, 0)).unwrap(), d("1000"));
    }

    #[test]
    fn period_end_is_exclusive() {
        let periods = vec![period(hm(18, 0), hm(22, 0), d("-15"))];
        assert_eq!(price_for(d("1000"), &periods, hm(22, 0)).unwrap(), d("1000"));
        assert_eq!(price_for(d("1000"), &periods, hm(18, 0)).unwrap(), d("1150"));
    }

    #[test]
    fn rounds_half_up_to_cents() {
        // 10.05 * 0.5 = 5.025
        assert_eq!(adjusted_price(d("10.05"), d("50")).unwrap(), d("5.03"));
        // 33.33 * 1.125 = 37.49625
        assert_eq!(adjusted_price(d("33.33"), d("-12.5")).unwrap(), d("37.50"));
    }

    #[test]
    fn full_discount_is_free() {
        assert_eq!(adjusted_price(d("1000"), d("100")).unwrap(), d("0"));
    }

    #[test]
    fn base_price_scales_with_duration() {
        assert_eq!(base_price(d("1000"), 60).unwrap(), d("1000"));
        assert_eq!(base_price(d("1000"), 90).unwrap(), d("1500"));
        assert_eq!(base_price(d("1000"), 30).unwrap(), d("500"));
        assert_eq!(base_price(d("100"), 45).unwrap(), d("75"));
        assert_eq!(base_price(d("10"), 20).unwrap(), d("3.33"));
    }

    #[test]
    fn overlapping_period_rejected_on_insert() {
        let mut table = PriceTable::default();
        let evening = period(hm(18, 0), hm(22, 0), d("-15"));
        let evening_id = evening.id;
        table.insert(evening).unwrap();

        let clash = period(hm(21, 0), hm(23, 0), d("10"));
        let clash_id = clash.id;
        assert_eq!(
            table.insert(clash),
            Err(ConfigError::OverlappingPeriods {
                existing: evening_id,
                added: clash_id
            })
        );

        // Touching periods are fine.
        table.insert(period(hm(22, 0), hm(23, 0), d("10"))).unwrap();
        table.insert(period(hm(8, 0), hm(18, 0), d("5"))).unwrap();
        let starts: Vec<NaiveTime> = table.periods().iter().map(|p| p.start_time).collect();
        assert_eq!(starts, vec![hm(8, 0), hm(18, 0), hm(22, 0)]);
    }

    #[test]
    fn invalid_periods_rejected() {
        let mut table = PriceTable::default();
        assert!(matches!(
            table.insert(period(hm(12, 0), hm(12, 0), d("5"))),
            Err(ConfigError::InvalidPeriod { .. })
        ));
        assert_eq!(
            table.insert(period(hm(8, 0), hm(9, 0), d("101"))),
            Err(ConfigError::AdjustmentOutOfRange(d("101")))
        );
        assert!(table.is_empty());
    }

    #[test]
    fn extreme_surcharge_rejected() {
        let mut table = PriceTable::default();
        let huge = d("-1000000000000000000000000000");
        assert_eq!(
            table.insert(period(hm(8, 0), hm(9, 0), huge)),
            Err(ConfigError::AdjustmentOutOfRange(huge))
        );
        table.insert(period(hm(8, 0), hm(9, 0), d("-1000"))).unwrap();
        assert_eq!(table.price_for(d("10"), hm(8, 0)).unwrap(), d("110"));
    }

    #[test]
    fn overflow_is_an_error_not_a_panic() {
        assert_eq!(base_price(Decimal::MAX, 60), Err(ConfigError::PriceOverflow));
        assert_eq!(adjusted_price(Decimal::MAX, d("-50")), Err(ConfigError::PriceOverflow));
        assert_eq!(total_price([Decimal::MAX, Decimal::ONE]), Err(ConfigError::PriceOverflow));
        assert_eq!(total_price([d("24.00"), d("30.00")]).unwrap(), d("54.00"));
    }

    #[test]
    fn overlap_present_at_read_applies_first() {
        let mut table = PriceTable::default();
        table.insert_unchecked(period(hm(18, 0), hm(22, 0), d("-15")));
        table.insert_unchecked(period(hm(20, 0), hm(23, 0), d("50")));
        assert_eq!(table.price_for(d("1000"), hm(21, 0)).unwrap(), d("1150"));
    }

    #[test]
    fn remove_period() {
        let mut table = PriceTable::default();
        let p = period(hm(18, 0), hm(22, 0), d("-15"));
        let id = p.id;
        table.insert(p).unwrap();
        assert!(table.contains_id(id));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert_eq!(table.price_for(d("1000"), hm(19, 0)).unwrap(), d("1000"));
    }
}
