//! Property-Based Test Generators
//!
//! Provides proptest strategies for generating billing data that keeps the
//! calendar and pricing invariants intact.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::BillingScheduleId;
use domain_billing::{BillingSchedulePeriod, TaxCategory};
use proptest::prelude::*;
use rust_decimal::Decimal;

use crate::fixtures::CalendarFixtures;

/// Strategy for list prices between 0.01 and 1,000,000.00
pub fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..100_000_000i64).prop_map(|minor| Decimal::new(minor, 2))
}

/// Strategy for tax percentages between 0% and 30%
pub fn tax_percentage_strategy() -> impl Strategy<Value = Decimal> {
    (0u32..=3000u32).prop_map(|n| Decimal::new(n as i64, 2))
}

pub fn tax_category_strategy() -> impl Strategy<Value = TaxCategory> {
    prop_oneof![Just(TaxCategory::Inclusive), Just(TaxCategory::Exclusive)]
}

/// Strategy for valid ratios `numerator / denominator` with 0 < n <= d
pub fn ratio_strategy() -> impl Strategy<Value = (i32, i32)> {
    (1i32..=366i32).prop_flat_map(|denominator| (1i32..=denominator, Just(denominator)))
}

/// Strategy for a midnight timestamp in 2020..2030
pub fn day_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (0i64..3650i64).prop_map(|offset| Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::days(offset))
}

/// Strategy for a contiguous, non-overlapping run of periods on one schedule
///
/// Each period lasts 1 to 90 days and ends one second before the next starts.
pub fn period_sequence_strategy(max_len: usize) -> impl Strategy<Value = Vec<BillingSchedulePeriod>> {
    (day_strategy(), prop::collection::vec(1i64..=90i64, 1..=max_len)).prop_map(|(first, lengths)| {
        let schedule_id = BillingScheduleId::new();
        let mut start = first;
        lengths
            .into_iter()
            .map(|days| {
                let next = start + Duration::days(days);
                let period = CalendarFixtures::period(schedule_id, start, next - Duration::seconds(1));
                start = next;
                period
            })
            .collect()
    })
}
