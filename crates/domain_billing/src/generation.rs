//! Generation planner
//!
//! Computes the charge of the next billing schedule period from the
//! subscription's latest bill item (the "seed"). The seed carries the
//! full-period list price, the full-period discount and the tax settings; the
//! planner clips the period to the subscription, prorates a partial period by
//! the ratio windows around the subscription's start and end dates and
//! recomputes discount, final price and tax.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::debug;

use crate::bill_item::{BillItem, BillingStatus, NewBillItem, TaxCategory};
use crate::calendar::BillingSchedulePeriod;
use crate::error::BillingError;
use crate::proration::{BillingRatio, ChargedFraction, AMOUNT_SCALE};
use crate::subscription::StudentProduct;

/// Everything the planner needs to price one period
#[derive(Debug, Clone, Copy)]
pub struct GenerationInput<'a> {
    /// The subscription's current latest bill item
    pub seed: &'a BillItem,
    pub subscription: &'a StudentProduct,
    /// The period being charged
    pub period: &'a BillingSchedulePeriod,
    /// Ratio window containing [`ProrationDates::start`]
    pub start_ratio: Option<&'a BillingRatio>,
    /// Ratio window containing [`ProrationDates::end`]
    pub end_ratio: Option<&'a BillingRatio>,
    /// First ratio window after [`ProrationDates::end`]; `None` when the end
    /// falls in the period's last window
    pub after_end_ratio: Option<&'a BillingRatio>,
    /// Product-level switch that charges partial periods in full
    pub disable_pro_rating: bool,
}

/// The next charge, plus whether it is the subscription's last
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedBillItem {
    pub bill_item: NewBillItem,
    pub is_last: bool,
}

/// The subscription boundaries falling strictly inside a period
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProrationDates {
    /// Start date after the period begins
    pub start: Option<DateTime<Utc>>,
    /// End date before the period ends
    pub end: Option<DateTime<Utc>>,
}

/// The dates whose ratio windows prorate `period` for `subscription`
pub fn proration_dates(subscription: &StudentProduct, period: &BillingSchedulePeriod) -> ProrationDates {
    let range = period.range();
    let start = Some(subscription.start_date)
        .filter(|start| *start > period.start_date && range.contains(*start));
    let end = subscription
        .end_date
        .filter(|end| *end < period.end_date && range.contains(*end));
    ProrationDates { start, end }
}

fn check_window(
    ratio: Option<&BillingRatio>,
    period: &BillingSchedulePeriod,
    covers: impl Fn(&BillingRatio) -> bool,
    what: &str,
) -> Result<(), BillingError> {
    let Some(ratio) = ratio else {
        return Ok(());
    };
    if ratio.billing_schedule_period_id != period.id || !covers(ratio) {
        return Err(BillingError::InvalidRatio(format!(
            "ratio {} is not the {} window of period {}",
            ratio.id, what, period.id
        )));
    }
    Ok(())
}

/// The fraction of `period` charged, or `None` for a full charge
fn charged_fraction(
    dates: ProrationDates,
    input: &GenerationInput<'_>,
) -> Result<Option<ChargedFraction>, BillingError> {
    let period = input.period;
    let missing = |date: DateTime<Utc>| {
        BillingError::RatioNotFound(format!(
            "period {} needs a ratio window containing {}",
            period.id, date
        ))
    };

    let start = match dates.start {
        Some(date) => {
            let ratio = input.start_ratio.ok_or_else(|| missing(date))?;
            check_window(Some(ratio), period, |r| r.contains(date), "start")?;
            Some(ratio)
        }
        None => None,
    };
    let (end, after_end) = match dates.end {
        Some(date) => {
            let ratio = input.end_ratio.ok_or_else(|| missing(date))?;
            check_window(Some(ratio), period, |r| r.contains(date), "end")?;
            check_window(input.after_end_ratio, period, |r| r.start_date > ratio.end_date, "after-end")?;
            (Some(ratio), input.after_end_ratio)
        }
        None => (None, None),
    };

    ChargedFraction::between(start, end, after_end)
}

/// Tax on `final_price` for the given category and percentage
///
/// Inclusive tax is the part of the price that is tax:
/// `final * pct / (100 + pct)`; exclusive tax is added on top:
/// `final * pct / 100`.
pub fn tax_amount(
    final_price: Decimal,
    category: Option<TaxCategory>,
    percentage: Option<Decimal>,
) -> Result<Option<Decimal>, BillingError> {
    let (Some(category), Some(percentage)) = (category, percentage) else {
        return Ok(None);
    };
    if percentage.is_sign_negative() {
        return Err(BillingError::Calculation(format!("negative tax percentage {}", percentage)));
    }
    let divisor = match category {
        TaxCategory::Inclusive => dec!(100) + percentage,
        TaxCategory::Exclusive => dec!(100),
    };
    let tax = final_price
        .checked_mul(percentage)
        .and_then(|v| v.checked_div(divisor))
        .ok_or_else(|| BillingError::Calculation(format!("tax on {} overflowed", final_price)))?;
    Ok(Some(tax.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero)))
}

/// Plans the charge of `input.period`
///
/// # Errors
///
/// - `Validation` if the seed belongs to another subscription or the
///   subscription is not billable
/// - `Unbillable` if the subscription ended before the period
/// - `RatioNotFound` / `InvalidRatio` if a partial period has no usable ratio
/// - `Calculation` on arithmetic overflow
pub fn plan_next_bill_item(input: GenerationInput<'_>) -> Result<PlannedBillItem, BillingError> {
    let GenerationInput {
        seed,
        subscription,
        period,
        disable_pro_rating,
        ..
    } = input;

    if seed.student_product_id != subscription.id {
        return Err(BillingError::validation(format!(
            "seed bill item {} belongs to {}, not {}",
            seed.bill_item_sequence_number, seed.student_product_id, subscription.id
        )));
    }
    if !subscription.is_billable() {
        return Err(BillingError::validation(format!(
            "student product {} is not billable",
            subscription.id
        )));
    }
    let range = period.range();
    if subscription.ended_before(&range) {
        return Err(BillingError::unbillable(format!(
            "student product {} ended before period {}",
            subscription.id, period.id
        )));
    }

    let is_last = subscription.ends_within(&range);
    let fraction = if disable_pro_rating {
        None
    } else {
        charged_fraction(proration_dates(subscription, period), &input)?
    };

    let raw_discount = seed.raw_discount_amount.or(seed.discount_amount);
    let full_discount = raw_discount.unwrap_or(Decimal::ZERO);
    let (price, discount) = match fraction {
        Some(fraction) => (fraction.apply(seed.product_pricing)?, fraction.apply(full_discount)?),
        None => (seed.product_pricing, full_discount),
    };
    let discount = discount.min(price).max(Decimal::ZERO);
    let final_price = price - discount;
    let tax = tax_amount(final_price, seed.tax_category, seed.tax_percentage)?;

    let billing_from = subscription.start_date.max(period.start_date);
    let billing_to = match subscription.end_date {
        Some(end) if is_last => end.min(period.end_date),
        _ => period.end_date,
    };

    debug!(
        student_product_id = %subscription.id,
        period_id = %period.id,
        %price,
        %final_price,
        prorated = fraction.is_some(),
        is_last,
        "Planned next bill item"
    );

    Ok(PlannedBillItem {
        bill_item: NewBillItem {
            order_id: seed.order_id,
            student_id: seed.student_id,
            product_id: seed.product_id,
            student_product_id: seed.student_product_id,
            product_description: seed.product_description.clone(),
            product_pricing: seed.product_pricing,
            discount_id: seed.discount_id,
            discount_amount_type: seed.discount_amount_type,
            discount_amount_value: seed.discount_amount_value,
            tax_id: seed.tax_id,
            tax_category: seed.tax_category,
            tax_percentage: seed.tax_percentage,
            bill_type: seed.bill_type,
            billing_status: BillingStatus::Pending,
            billing_date: Some(period.billing_date),
            billing_from: Some(billing_from),
            billing_to: Some(billing_to),
            billing_schedule_period_id: Some(period.id),
            discount_amount: raw_discount.map(|_| discount),
            raw_discount_amount: raw_discount,
            tax_amount: tax,
            final_price,
            price,
            old_price: None,
            adjustment_price: None,
            billing_ratio_numerator: fraction.map(|f| f.numerator),
            billing_ratio_denominator: fraction.map(|f| f.denominator),
            billing_approval_status: None,
            billing_item_description: seed.billing_item_description.clone(),
            location_id: subscription.location_id,
            location_name: seed.location_name.clone(),
            is_reviewed: false,
        },
        is_last,
    })
}
