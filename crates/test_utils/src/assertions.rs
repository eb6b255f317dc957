//! Custom Test Assertions
//!
//! Assertion helpers for billing invariants that give more meaningful
//! failure messages than a bare `assert!`.

use domain_billing::{BillItem, BillingSchedulePeriod, UpcomingBillItem, UpcomingState};
use rust_decimal::Decimal;

/// Asserts that two amounts differ by at most `tolerance`
pub fn assert_amount_approx_eq(actual: Decimal, expected: Decimal, tolerance: Decimal) {
    let diff = (actual - expected).abs();
    assert!(
        diff <= tolerance,
        "Amounts differ by more than tolerance: actual={}, expected={}, diff={}, tolerance={}",
        actual,
        expected,
        diff,
        tolerance
    );
}

/// Asserts that an amount carries at most two decimal places
pub fn assert_rounded_to_cents(amount: Decimal) {
    assert_eq!(
        amount.round_dp(2),
        amount,
        "Expected an amount rounded to cents, got {}",
        amount
    );
}

/// Asserts that exactly one row per subscription is the latest
///
/// # Panics
///
/// Panics if a subscription in `items` has zero or several latest rows
pub fn assert_single_latest(items: &[BillItem]) {
    let mut subscriptions: Vec<_> = items.iter().map(|i| i.student_product_id).collect();
    subscriptions.sort_by_key(|id| *id.as_uuid());
    subscriptions.dedup();

    for subscription in subscriptions {
        let latest = items
            .iter()
            .filter(|i| i.student_product_id == subscription && i.is_latest_bill_item)
            .count();
        assert_eq!(
            latest, 1,
            "Subscription {} has {} latest bill items",
            subscription, latest
        );
    }
}

/// Asserts that `item` was superseded by `next` and points back at it
pub fn assert_supersedes(next: &BillItem, previous: &BillItem) {
    assert!(!previous.is_latest_bill_item, "Previous bill item is still latest");
    assert!(next.is_latest_bill_item, "New bill item is not latest");
    assert_eq!(
        next.previous_bill_item_sequence_number,
        Some(previous.bill_item_sequence_number),
        "New bill item does not point at its predecessor"
    );
}

/// Asserts that an upcoming item is in `expected` state
pub fn assert_upcoming_state(item: &UpcomingBillItem, expected: UpcomingState) {
    assert_eq!(
        item.state(),
        expected,
        "Upcoming item for period {} is {:?}, expected {:?}",
        item.billing_schedule_period_id,
        item.state(),
        expected
    );
}

/// Asserts that a bill item covers exactly `period`
pub fn assert_covers_period(item: &BillItem, period: &BillingSchedulePeriod) {
    assert_eq!(item.billing_schedule_period_id, Some(period.id));
    assert_eq!(item.billing_to, Some(period.end_date));
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_approx_eq_within_tolerance() {
        assert_amount_approx_eq(dec!(100.004), dec!(100.00), dec!(0.01));
    }

    #[test]
    #[should_panic(expected = "differ by more than tolerance")]
    fn test_approx_eq_outside_tolerance() {
        assert_amount_approx_eq(dec!(100.02), dec!(100.00), dec!(0.01));
    }

    #[test]
    #[should_panic(expected = "rounded to cents")]
    fn test_rejects_sub_cent_amounts() {
        assert_rounded_to_cents(dec!(10.005));
    }
}
