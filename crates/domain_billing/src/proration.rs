//! Proration of partial billing periods
//!
//! A billing ratio is a window inside a billing schedule period together with
//! the fraction `numerator / denominator` of the full-period price that remains
//! from the window's start to the end of the period. A subscription starting
//! mid-period is charged the remainder of the window containing its start
//! date. One ending mid-period is charged the elapsed part, i.e. the whole
//! period minus the remainder of the first window after its end date. Windows
//! may split a period into sub-buckets (e.g. weeks of a month) that are walked
//! in order.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use core_kernel::{BillingRatioId, BillingSchedulePeriodId, DateRange};
use crate::calendar::BillingSchedulePeriod;
use crate::error::BillingError;

/// Decimal places kept on prorated amounts
pub const AMOUNT_SCALE: u32 = 2;

/// A prorated window inside a billing schedule period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingRatio {
    pub id: BillingRatioId,
    pub billing_schedule_period_id: BillingSchedulePeriodId,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub billing_ratio_numerator: i32,
    pub billing_ratio_denominator: i32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingRatio {
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.range().contains(instant)
    }

    /// Checks `0 < numerator <= denominator` and a non-inverted window
    pub fn validate(&self) -> Result<(), BillingError> {
        DateRange::new(self.start_date, self.end_date)?;
        if self.billing_ratio_denominator <= 0 {
            return Err(BillingError::InvalidRatio(format!(
                "ratio {} has non-positive denominator {}",
                self.id, self.billing_ratio_denominator
            )));
        }
        if self.billing_ratio_numerator <= 0
            || self.billing_ratio_numerator > self.billing_ratio_denominator
        {
            return Err(BillingError::InvalidRatio(format!(
                "ratio {} numerator {} outside 1..={}",
                self.id, self.billing_ratio_numerator, self.billing_ratio_denominator
            )));
        }
        Ok(())
    }

    /// The ratio as a decimal fraction
    pub fn as_decimal(&self) -> Result<Decimal, BillingError> {
        self.validate()?;
        Decimal::from(self.billing_ratio_numerator)
            .checked_div(Decimal::from(self.billing_ratio_denominator))
            .ok_or_else(|| BillingError::Calculation(format!("ratio {} overflowed", self.id)))
    }

    /// Prorates a full-period amount by this window's remainder
    pub fn apply(&self, amount: Decimal) -> Result<Decimal, BillingError> {
        self.validate()?;
        ChargedFraction {
            numerator: self.billing_ratio_numerator,
            denominator: self.billing_ratio_denominator,
        }
        .apply(amount)
    }
}

/// The part of a period a subscription is charged for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChargedFraction {
    pub numerator: i32,
    pub denominator: i32,
}

impl ChargedFraction {
    /// Combines the windows around a mid-period start and a mid-period end
    ///
    /// `start` contains the subscription's start date, `end` its end date and
    /// `after_end` is the first window starting after the end date (`None`
    /// when the end date falls in the period's last window). The charge is
    /// the remainder at the start minus the remainder after the end. Returns
    /// `None` when neither date needs prorating.
    ///
    /// # Errors
    ///
    /// `InvalidRatio` if the windows disagree on the denominator, if
    /// `after_end` is given without `end`, or if nothing is left to charge.
    pub fn between(
        start: Option<&BillingRatio>,
        end: Option<&BillingRatio>,
        after_end: Option<&BillingRatio>,
    ) -> Result<Option<Self>, BillingError> {
        if end.is_none() && after_end.is_some() {
            return Err(BillingError::InvalidRatio(
                "window after the end date given without an end window".to_string(),
            ));
        }
        let denominator = match (start, end) {
            (None, None) => return Ok(None),
            (Some(ratio), _) | (None, Some(ratio)) => ratio.billing_ratio_denominator,
        };

        for ratio in [start, end, after_end].into_iter().flatten() {
            ratio.validate()?;
            if ratio.billing_ratio_denominator != denominator {
                return Err(BillingError::InvalidRatio(format!(
                    "ratio {} has denominator {}, expected {}",
                    ratio.id, ratio.billing_ratio_denominator, denominator
                )));
            }
        }

        let remaining_at_start = start.map_or(denominator, |r| r.billing_ratio_numerator);
        let remaining_after_end = after_end.map_or(0, |r| r.billing_ratio_numerator);
        let numerator = remaining_at_start - remaining_after_end;
        if numerator <= 0 {
            return Err(BillingError::InvalidRatio(format!(
                "nothing left to charge: {} remaining at start, {} after end",
                remaining_at_start, remaining_after_end
            )));
        }

        Ok(Some(Self { numerator, denominator }))
    }

    /// Prorates a full-period amount
    ///
    /// Multiplies before dividing so that e.g. `31 * 17 / 31` is exact, then
    /// rounds to [`AMOUNT_SCALE`] places with midpoints away from zero.
    pub fn apply(&self, amount: Decimal) -> Result<Decimal, BillingError> {
        let scaled = amount
            .checked_mul(Decimal::from(self.numerator))
            .and_then(|v| v.checked_div(Decimal::from(self.denominator)))
            .ok_or_else(|| {
                BillingError::Calculation(format!(
                    "prorating {} by {}/{} overflowed",
                    amount, self.numerator, self.denominator
                ))
            })?;
        Ok(scaled.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero))
    }
}

/// The non-archived ratio windows of one period, ordered by start date
#[derive(Debug, Clone)]
pub struct RatioSet {
    period_id: BillingSchedulePeriodId,
    ratios: Vec<BillingRatio>,
}

impl RatioSet {
    /// Builds the set, dropping archived windows
    ///
    /// # Errors
    ///
    /// - `InvalidRatio` if a window is malformed or lies outside the period
    /// - `InvalidCalendar` if two windows overlap
    pub fn new(
        period: &BillingSchedulePeriod,
        ratios: impl IntoIterator<Item = BillingRatio>,
    ) -> Result<Self, BillingError> {
        let mut ratios: Vec<_> = ratios.into_iter().filter(|r| !r.is_archived).collect();
        let period_range = period.range();

        for ratio in &ratios {
            if ratio.billing_schedule_period_id != period.id {
                return Err(BillingError::InvalidRatio(format!(
                    "ratio {} belongs to period {}, not {}",
                    ratio.id, ratio.billing_schedule_period_id, period.id
                )));
            }
            ratio.validate()?;
            if !period_range.encloses(&ratio.range()) {
                return Err(BillingError::InvalidRatio(format!(
                    "ratio {} window lies outside period {}",
                    ratio.id, period.id
                )));
            }
        }

        ratios.sort_by_key(|r| r.start_date);
        for pair in ratios.windows(2) {
            if pair[0].range().overlaps(&pair[1].range()) {
                return Err(BillingError::InvalidRatio(format!(
                    "ratios {} and {} overlap",
                    pair[0].id, pair[1].id
                )));
            }
        }

        Ok(Self {
            period_id: period.id,
            ratios,
        })
    }

    pub fn period_id(&self) -> BillingSchedulePeriodId {
        self.period_id
    }

    pub fn ratios(&self) -> &[BillingRatio] {
        &self.ratios
    }

    /// The window containing `from`, used to prorate a first or last charge
    pub fn first_for(&self, from: DateTime<Utc>) -> Result<&BillingRatio, BillingError> {
        self.ratios.iter().find(|r| r.contains(from)).ok_or_else(|| {
            BillingError::RatioNotFound(format!(
                "period {} has no ratio window containing {}",
                self.period_id, from
            ))
        })
    }

    /// The window starting strictly after `previous` ends
    pub fn next_after(&self, previous: &BillingRatio) -> Option<&BillingRatio> {
        self.ratios.iter().find(|r| r.start_date > previous.end_date)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn ratio(numerator: i32, denominator: i32) -> BillingRatio {
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        BillingRatio {
            id: BillingRatioId::new(),
            billing_schedule_period_id: BillingSchedulePeriodId::new(),
            start_date: start,
            end_date: Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap(),
            billing_ratio_numerator: numerator,
            billing_ratio_denominator: denominator,
            is_archived: false,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn test_apply_is_exact_for_whole_multiples() {
        assert_eq!(ratio(17, 31).apply(dec!(3100)).unwrap(), dec!(1700));
    }

    #[test]
    fn test_apply_rounds_half_away_from_zero() {
        // 1 / 8 of 0.20 = 0.025
        assert_eq!(ratio(1, 8).apply(dec!(0.20)).unwrap(), dec!(0.03));
    }

    #[test]
    fn test_full_ratio_is_identity() {
        assert_eq!(ratio(31, 31).apply(dec!(123.45)).unwrap(), dec!(123.45));
    }

    #[test]
    fn test_end_charges_the_elapsed_part() {
        // January split at the 15th; ending on the 10th leaves the second window unused
        let mut first = ratio(31, 31);
        first.start_date = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        first.end_date = Utc.with_ymd_and_hms(2024, 1, 14, 23, 59, 59).unwrap();
        let second = ratio(17, 31);

        let early = ChargedFraction::between(None, Some(&first), Some(&second)).unwrap().unwrap();
        assert_eq!(early, ChargedFraction { numerator: 14, denominator: 31 });
        assert_eq!(early.apply(dec!(3100)).unwrap(), dec!(1400));

        let late = ChargedFraction::between(None, Some(&second), None).unwrap().unwrap();
        assert_eq!(late.apply(dec!(3100)).unwrap(), dec!(3100));
    }

    #[test]
    fn test_start_and_end_in_one_period() {
        // Jan 10 to Jan 20 with daily windows: 22 days remain on the 10th, 11 after the 20th
        let start = ratio(22, 31);
        let end = ratio(12, 31);
        let after_end = ratio(11, 31);

        let fraction = ChargedFraction::between(Some(&start), Some(&end), Some(&after_end))
            .unwrap()
            .unwrap();
        assert_eq!(fraction, ChargedFraction { numerator: 11, denominator: 31 });
    }

    #[test]
    fn test_between_rejects_inconsistent_windows() {
        assert_eq!(ChargedFraction::between(None, None, None).unwrap(), None);
        assert!(ChargedFraction::between(Some(&ratio(10, 31)), Some(&ratio(11, 31)), Some(&ratio(10, 31))).is_err());
        assert!(ChargedFraction::between(None, Some(&ratio(10, 30)), Some(&ratio(5, 31))).is_err());
        assert!(ChargedFraction::between(None, None, Some(&ratio(5, 31))).is_err());
    }

    #[test]
    fn test_invalid_ratios() {
        assert!(matches!(ratio(0, 31).validate(), Err(BillingError::InvalidRatio(_))));
        assert!(matches!(ratio(32, 31).validate(), Err(BillingError::InvalidRatio(_))));
        assert!(matches!(ratio(1, 0).validate(), Err(BillingError::InvalidRatio(_))));
    }
}
