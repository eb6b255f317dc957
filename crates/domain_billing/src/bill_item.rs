//! Bill item ledger
//!
//! Bill items are the generated charges. The ledger is append-mostly: a new
//! charge for a subscription is written as a new row that becomes the
//! subscription's latest bill item, while the row it replaces is flipped to
//! non-latest and referenced through `previous_bill_item_sequence_number` /
//! `previous_bill_item_status`.
//!
//! # Invariants
//!
//! - at most one row per `student_product_id` has `is_latest_bill_item = true`
//! - billing status only moves along [`BillingStatus::can_transition_to`]

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_kernel::{
    AccountingCategoryId, BillingSchedulePeriodId, CourseId, DiscountId, LocationId, OrderId,
    ProductId, StudentId, StudentProductId, TaxId,
};
use crate::error::BillingError;

/// Billing status of a charge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingStatus {
    /// Generated, waiting for its billing date
    Pending,
    /// Held until a reviewer approves it
    WaitingApproval,
    /// Billing date has passed and the charge was billed
    Billed,
    /// Included in an issued invoice
    Invoiced,
    /// Withdrawn before billing
    Cancelled,
    /// Annulled, usually together with its whole order
    Voided,
}

impl BillingStatus {
    /// Returns true if a charge may move from `self` to `to`
    pub fn can_transition_to(&self, to: BillingStatus) -> bool {
        use BillingStatus::*;
        matches!(
            (self, to),
            (Pending, Billed)
                | (Pending, Invoiced)
                | (Pending, WaitingApproval)
                | (Pending, Cancelled)
                | (Pending, Voided)
                | (WaitingApproval, Pending)
                | (WaitingApproval, Voided)
                | (Billed, Invoiced)
                | (Billed, Voided)
                | (Invoiced, Voided)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BillingStatus::Cancelled | BillingStatus::Voided)
    }
}

/// When the charge is billed relative to the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillType {
    BilledAtOrder,
    AdvanceBilling,
    ArrearsBilling,
}

/// Review state of a charge that needs approval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingApprovalStatus {
    WaitingForApproval,
    Approved,
    Rejected,
}

/// Whether the tax is contained in the price or added on top
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxCategory {
    Inclusive,
    Exclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountAmountType {
    Percentage,
    Fixed,
}

/// A generated charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItem {
    pub bill_item_sequence_number: i32,
    pub order_id: OrderId,
    pub student_id: StudentId,
    pub product_id: ProductId,
    pub student_product_id: StudentProductId,
    pub product_description: String,
    /// Full-period list price
    pub product_pricing: Decimal,
    pub discount_id: Option<DiscountId>,
    pub discount_amount_type: Option<DiscountAmountType>,
    pub discount_amount_value: Option<Decimal>,
    pub tax_id: Option<TaxId>,
    pub tax_category: Option<TaxCategory>,
    pub tax_percentage: Option<Decimal>,
    pub bill_type: BillType,
    pub billing_status: BillingStatus,
    pub billing_date: Option<DateTime<Utc>>,
    pub billing_from: Option<DateTime<Utc>>,
    pub billing_to: Option<DateTime<Utc>>,
    pub billing_schedule_period_id: Option<BillingSchedulePeriodId>,
    pub discount_amount: Option<Decimal>,
    /// Discount for a full period before proration
    pub raw_discount_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub final_price: Decimal,
    /// Price charged for this (possibly partial) period
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub adjustment_price: Option<Decimal>,
    pub billing_ratio_numerator: Option<i32>,
    pub billing_ratio_denominator: Option<i32>,
    pub billing_approval_status: Option<BillingApprovalStatus>,
    pub billing_item_description: Option<serde_json::Value>,
    pub location_id: LocationId,
    pub location_name: String,
    pub is_latest_bill_item: bool,
    pub previous_bill_item_sequence_number: Option<i32>,
    pub previous_bill_item_status: Option<BillingStatus>,
    pub is_reviewed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillItem {
    /// Recurring charges are tied to a billing schedule period
    pub fn is_recurring(&self) -> bool {
        self.billing_schedule_period_id.is_some()
    }

    /// Moves the charge to `to` if the transition table allows it
    pub fn transition(&mut self, to: BillingStatus, now: DateTime<Utc>) -> Result<(), BillingError> {
        if !self.billing_status.can_transition_to(to) {
            return Err(BillingError::invalid_transition("bill item", self.billing_status, to));
        }
        self.billing_status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Makes `self` the latest charge, replacing `previous`
    ///
    /// `previous` is flipped to non-latest and `self` records its sequence
    /// number and status as back-pointers.
    pub fn supersede(&mut self, previous: &mut BillItem) -> Result<(), BillingError> {
        if previous.student_product_id != self.student_product_id {
            return Err(BillingError::validation(format!(
                "bill item {} belongs to {}, not {}",
                previous.bill_item_sequence_number,
                previous.student_product_id,
                self.student_product_id
            )));
        }
        previous.is_latest_bill_item = false;
        self.is_latest_bill_item = true;
        self.previous_bill_item_sequence_number = Some(previous.bill_item_sequence_number);
        self.previous_bill_item_status = Some(previous.billing_status);
        Ok(())
    }
}

/// A charge about to be written to the ledger
///
/// The sequence number, the latest flag and the back-pointers are assigned
/// by the ledger when the row is inserted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBillItem {
    pub order_id: OrderId,
    pub student_id: StudentId,
    pub product_id: ProductId,
    pub student_product_id: StudentProductId,
    pub product_description: String,
    pub product_pricing: Decimal,
    pub discount_id: Option<DiscountId>,
    pub discount_amount_type: Option<DiscountAmountType>,
    pub discount_amount_value: Option<Decimal>,
    pub tax_id: Option<TaxId>,
    pub tax_category: Option<TaxCategory>,
    pub tax_percentage: Option<Decimal>,
    pub bill_type: BillType,
    pub billing_status: BillingStatus,
    pub billing_date: Option<DateTime<Utc>>,
    pub billing_from: Option<DateTime<Utc>>,
    pub billing_to: Option<DateTime<Utc>>,
    pub billing_schedule_period_id: Option<BillingSchedulePeriodId>,
    pub discount_amount: Option<Decimal>,
    pub raw_discount_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub final_price: Decimal,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub adjustment_price: Option<Decimal>,
    pub billing_ratio_numerator: Option<i32>,
    pub billing_ratio_denominator: Option<i32>,
    pub billing_approval_status: Option<BillingApprovalStatus>,
    pub billing_item_description: Option<serde_json::Value>,
    pub location_id: LocationId,
    pub location_name: String,
    pub is_reviewed: bool,
}

/// A course attached to a bill item (package products)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItemCourse {
    pub bill_item_sequence_number: i32,
    pub course_id: CourseId,
    pub course_name: String,
    pub course_weight: Option<i32>,
    pub course_slot: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// An accounting category a bill item is reported under
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillItemAccountCategory {
    pub bill_item_sequence_number: i32,
    pub accounting_category_id: AccountingCategoryId,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses_have_no_exits() {
        let all = [
            BillingStatus::Pending,
            BillingStatus::WaitingApproval,
            BillingStatus::Billed,
            BillingStatus::Invoiced,
            BillingStatus::Cancelled,
            BillingStatus::Voided,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn test_pending_can_be_billed_or_voided() {
        assert!(BillingStatus::Pending.can_transition_to(BillingStatus::Billed));
        assert!(BillingStatus::Pending.can_transition_to(BillingStatus::Voided));
        assert!(!BillingStatus::Billed.can_transition_to(BillingStatus::Pending));
    }
}
