//! Pre-built Test Fixtures
//!
//! Provides ready-to-use billing data: a monthly 2024 calendar, a running
//! subscription and the bill item that seeds its next charge. Amounts are
//! chosen so that the arithmetic is easy to check by hand.

use chrono::{DateTime, Duration, TimeZone, Utc};
use core_kernel::{
    BillingRatioId, BillingScheduleId, BillingSchedulePeriodId, LocationId, OrderId, ProductId,
    StudentId, StudentProductId, TaxId,
};
use domain_billing::{
    BillItem, BillType, BillingRatio, BillingSchedule, BillingSchedulePeriod, BillingStatus,
    ProductStatus, StudentProduct, TaxCategory, UpcomingBillItem,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Fixture for temporal test data
pub struct TemporalFixtures;

impl TemporalFixtures {
    /// Midnight UTC of the given day
    pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    /// Last second of the given day
    pub fn end_of(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 23, 59, 59).unwrap()
    }

    /// A sweep time inside January 2024
    pub fn january_sweep() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 28, 9, 0, 0).unwrap()
    }
}

/// Fixture for billing calendars
pub struct CalendarFixtures;

impl CalendarFixtures {
    pub fn schedule() -> BillingSchedule {
        let created = TemporalFixtures::at(2023, 12, 1);
        BillingSchedule {
            id: BillingScheduleId::new(),
            name: "Monthly tuition 2024".to_string(),
            remarks: None,
            is_archived: false,
            created_at: created,
            updated_at: created,
        }
    }

    /// A period billed five days before it starts
    pub fn period(
        schedule_id: BillingScheduleId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> BillingSchedulePeriod {
        BillingSchedulePeriod {
            id: BillingSchedulePeriodId::new(),
            billing_schedule_id: schedule_id,
            name: start.format("%Y-%m").to_string(),
            start_date: start,
            end_date: end,
            billing_date: start - Duration::days(5),
            remarks: None,
            is_archived: false,
            created_at: start - Duration::days(30),
            updated_at: start - Duration::days(30),
        }
    }

    /// January to June 2024, one period per month
    pub fn monthly_2024(schedule_id: BillingScheduleId) -> Vec<BillingSchedulePeriod> {
        let ends = [31, 29, 31, 30, 31, 30];
        ends.iter()
            .zip(1u32..)
            .map(|(last_day, month)| {
                Self::period(
                    schedule_id,
                    TemporalFixtures::at(2024, month, 1),
                    TemporalFixtures::end_of(2024, month, *last_day),
                )
            })
            .collect()
    }

    /// A ratio window inside `period`
    pub fn ratio(
        period: &BillingSchedulePeriod,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        numerator: i32,
        denominator: i32,
    ) -> BillingRatio {
        BillingRatio {
            id: BillingRatioId::new(),
            billing_schedule_period_id: period.id,
            start_date: start,
            end_date: end,
            billing_ratio_numerator: numerator,
            billing_ratio_denominator: denominator,
            is_archived: false,
            created_at: period.created_at,
            updated_at: period.created_at,
        }
    }

    /// Daily windows covering a whole period, ratio `remaining days / total days`
    ///
    /// The window starting on day `d` of an `n`-day month carries `(n - d + 1) / n`.
    pub fn daily_ratios(period: &BillingSchedulePeriod) -> Vec<BillingRatio> {
        let days = period.range().days();
        (0..days)
            .map(|offset| {
                let start = period.start_date + Duration::days(offset);
                let end = start + Duration::days(1) - Duration::seconds(1);
                Self::ratio(period, start, end, (days - offset) as i32, days as i32)
            })
            .collect()
    }
}

/// Fixture for subscriptions
pub struct SubscriptionFixtures;

impl SubscriptionFixtures {
    /// An ordered subscription with no pending change
    pub fn running(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> StudentProduct {
        StudentProduct {
            id: StudentProductId::new(),
            student_id: StudentId::new(),
            product_id: ProductId::new(),
            location_id: LocationId::new(),
            upcoming_billing_date: None,
            start_date: start,
            end_date: end,
            product_status: ProductStatus::Ordered,
            approval_status: None,
            student_product_label: None,
            updated_from_student_product_id: None,
            updated_to_student_product_id: None,
            root_student_product_id: None,
            is_associated: false,
            is_unique: false,
            version_number: 0,
            created_at: start,
            updated_at: start,
            deleted_at: None,
        }
    }

    /// Runs for the whole of 2024
    pub fn year_2024() -> StudentProduct {
        Self::running(
            TemporalFixtures::at(2024, 1, 1),
            Some(TemporalFixtures::end_of(2024, 12, 31)),
        )
    }
}

/// Fixture for bill items
pub struct BillItemFixtures;

impl BillItemFixtures {
    /// Full monthly price
    pub fn price() -> Decimal {
        dec!(3100)
    }

    /// January charge of `subscription`: 3100 less a 10% discount, 10% tax inclusive
    pub fn january_seed(
        subscription: &StudentProduct,
        order_id: OrderId,
        period: &BillingSchedulePeriod,
    ) -> BillItem {
        BillItem {
            bill_item_sequence_number: 1,
            order_id,
            student_id: subscription.student_id,
            product_id: subscription.product_id,
            student_product_id: subscription.id,
            product_description: "Monthly tuition".to_string(),
            product_pricing: Self::price(),
            discount_id: None,
            discount_amount_type: None,
            discount_amount_value: None,
            tax_id: Some(TaxId::new()),
            tax_category: Some(TaxCategory::Inclusive),
            tax_percentage: Some(dec!(10)),
            bill_type: BillType::AdvanceBilling,
            billing_status: BillingStatus::Billed,
            billing_date: Some(period.billing_date),
            billing_from: Some(period.start_date),
            billing_to: Some(period.end_date),
            billing_schedule_period_id: Some(period.id),
            discount_amount: Some(dec!(310)),
            raw_discount_amount: Some(dec!(310)),
            tax_amount: Some(dec!(253.64)),
            final_price: dec!(2790),
            price: Self::price(),
            old_price: None,
            adjustment_price: None,
            billing_ratio_numerator: None,
            billing_ratio_denominator: None,
            billing_approval_status: None,
            billing_item_description: None,
            location_id: subscription.location_id,
            location_name: "Shibuya".to_string(),
            is_latest_bill_item: true,
            previous_bill_item_sequence_number: None,
            previous_bill_item_status: None,
            is_reviewed: false,
            created_at: period.billing_date,
            updated_at: period.billing_date,
        }
    }

    /// The upcoming item `seed` stages for `next`
    pub fn staged(seed: &BillItem, next: &BillingSchedulePeriod) -> UpcomingBillItem {
        UpcomingBillItem::from_seed(seed, next, seed.created_at)
    }
}
