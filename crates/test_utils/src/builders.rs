//! Test Data Builders
//!
//! Provides builder patterns for constructing test data with sensible defaults.
//! These builders allow tests to specify only the relevant fields while using
//! defaults for everything else.

use chrono::{DateTime, Utc};
use core_kernel::{LocationId, OrderId, ProductId, StudentId, StudentProductId, TaxId};
use domain_billing::{
    BillType, BillingSchedulePeriod, BillingStatus, NewBillItem, ProductStatus, StudentProduct,
    StudentProductLabel, TaxCategory,
};
use fake::faker::address::en::CityName;
use fake::Fake;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::fixtures::{SubscriptionFixtures, TemporalFixtures};

/// Builder for subscriptions
pub struct StudentProductBuilder {
    inner: StudentProduct,
}

impl Default for StudentProductBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StudentProductBuilder {
    /// Starts from a subscription running through 2024
    pub fn new() -> Self {
        Self {
            inner: SubscriptionFixtures::year_2024(),
        }
    }

    pub fn with_student(mut self, student_id: StudentId) -> Self {
        self.inner.student_id = student_id;
        self
    }

    pub fn with_product(mut self, product_id: ProductId) -> Self {
        self.inner.product_id = product_id;
        self
    }

    pub fn with_location(mut self, location_id: LocationId) -> Self {
        self.inner.location_id = location_id;
        self
    }

    pub fn with_start_date(mut self, start: DateTime<Utc>) -> Self {
        self.inner.start_date = start;
        self
    }

    /// Sets the end date; `None` runs open-ended
    pub fn with_end_date(mut self, end: Option<DateTime<Utc>>) -> Self {
        self.inner.end_date = end;
        self
    }

    pub fn cancelled(mut self) -> Self {
        self.inner.product_status = ProductStatus::Cancelled;
        self
    }

    pub fn with_label(mut self, label: StudentProductLabel) -> Self {
        self.inner.student_product_label = Some(label);
        self
    }

    /// Marks the subscription as the replacement of `previous`
    pub fn replacing(mut self, previous: &StudentProduct) -> Self {
        self.inner.updated_from_student_product_id = Some(previous.id);
        self.inner.root_student_product_id = Some(previous.root_student_product_id.unwrap_or(previous.id));
        self.inner.student_id = previous.student_id;
        self.inner.product_id = previous.product_id;
        self.inner.location_id = previous.location_id;
        self
    }

    pub fn associated(mut self) -> Self {
        self.inner.is_associated = true;
        self
    }

    pub fn with_id(mut self, id: StudentProductId) -> Self {
        self.inner.id = id;
        self
    }

    pub fn build(self) -> StudentProduct {
        self.inner
    }
}

/// Builder for bill items about to be inserted
pub struct NewBillItemBuilder {
    inner: NewBillItem,
}

impl NewBillItemBuilder {
    /// A full-price advance charge of `subscription` for `period`
    pub fn for_period(subscription: &StudentProduct, order_id: OrderId, period: &BillingSchedulePeriod) -> Self {
        let location_name: String = CityName().fake();
        Self {
            inner: NewBillItem {
                order_id,
                student_id: subscription.student_id,
                product_id: subscription.product_id,
                student_product_id: subscription.id,
                product_description: "Monthly tuition".to_string(),
                product_pricing: dec!(3100),
                discount_id: None,
                discount_amount_type: None,
                discount_amount_value: None,
                tax_id: None,
                tax_category: None,
                tax_percentage: None,
                bill_type: BillType::AdvanceBilling,
                billing_status: BillingStatus::Pending,
                billing_date: Some(period.billing_date),
                billing_from: Some(period.start_date),
                billing_to: Some(period.end_date),
                billing_schedule_period_id: Some(period.id),
                discount_amount: None,
                raw_discount_amount: None,
                tax_amount: None,
                final_price: dec!(3100),
                price: dec!(3100),
                old_price: None,
                adjustment_price: None,
                billing_ratio_numerator: None,
                billing_ratio_denominator: None,
                billing_approval_status: None,
                billing_item_description: None,
                location_id: subscription.location_id,
                location_name,
                is_reviewed: false,
            },
        }
    }

    /// A one-time charge billed at order time
    pub fn one_time(subscription: &StudentProduct, order_id: OrderId) -> Self {
        let mut builder = Self::for_period(
            subscription,
            order_id,
            &crate::fixtures::CalendarFixtures::period(
                core_kernel::BillingScheduleId::new(),
                TemporalFixtures::at(2024, 1, 1),
                TemporalFixtures::end_of(2024, 1, 31),
            ),
        );
        builder.inner.bill_type = BillType::BilledAtOrder;
        builder.inner.billing_date = Some(subscription.start_date);
        builder.inner.billing_from = None;
        builder.inner.billing_to = None;
        builder.inner.billing_schedule_period_id = None;
        builder
    }

    /// Sets both the list price and the final price
    pub fn with_price(mut self, price: Decimal) -> Self {
        self.inner.product_pricing = price;
        self.inner.price = price;
        self.inner.final_price = price;
        self
    }

    pub fn with_status(mut self, status: BillingStatus) -> Self {
        self.inner.billing_status = status;
        self
    }

    pub fn with_billing_date(mut self, date: DateTime<Utc>) -> Self {
        self.inner.billing_date = Some(date);
        self
    }

    /// Adds an inclusive tax at `percentage`
    pub fn with_inclusive_tax(mut self, percentage: Decimal) -> Self {
        self.inner.tax_id = Some(TaxId::new());
        self.inner.tax_category = Some(TaxCategory::Inclusive);
        self.inner.tax_percentage = Some(percentage);
        self.inner.tax_amount = domain_billing::tax_amount(
            self.inner.final_price,
            Some(TaxCategory::Inclusive),
            Some(percentage),
        )
        .unwrap();
        self
    }

    pub fn build(self) -> NewBillItem {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::CalendarFixtures;

    #[test]
    fn test_replacement_shares_the_root() {
        let original = StudentProductBuilder::new().build();
        let first = StudentProductBuilder::new().replacing(&original).build();
        let second = StudentProductBuilder::new().replacing(&first).build();

        assert_eq!(first.root_student_product_id, Some(original.id));
        assert_eq!(second.root_student_product_id, Some(original.id));
        assert_eq!(second.updated_from_student_product_id, Some(first.id));
        assert_eq!(second.student_id, original.student_id);
    }

    #[test]
    fn test_new_bill_item_defaults_to_pending_full_price() {
        let subscription = StudentProductBuilder::new().build();
        let schedule = CalendarFixtures::schedule();
        let periods = CalendarFixtures::monthly_2024(schedule.id);
        let item = NewBillItemBuilder::for_period(&subscription, OrderId::new(), &periods[1]).build();

        assert_eq!(item.billing_status, BillingStatus::Pending);
        assert_eq!(item.final_price, dec!(3100));
        assert_eq!(item.billing_schedule_period_id, Some(periods[1].id));
        assert!(!item.location_name.is_empty());
    }

    #[test]
    fn test_inclusive_tax_is_carved_out_of_the_price() {
        let subscription = StudentProductBuilder::new().build();
        let item = NewBillItemBuilder::one_time(&subscription, OrderId::new())
            .with_price(dec!(1100))
            .with_inclusive_tax(dec!(10))
            .build();

        assert_eq!(item.tax_amount, Some(dec!(100)));
        assert_eq!(item.billing_schedule_period_id, None);
    }
}
