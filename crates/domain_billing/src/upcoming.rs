//! Upcoming-charge queue
//!
//! An upcoming bill item is a charge staged for a future billing schedule
//! period, keyed by `(order_id, product_id, billing_schedule_period_id)`.
//!
//! ```text
//!               ┌──────────── is_generated = true ──▶ Generated
//!  Scheduled ───┤
//!               └──────────── deleted_at set ──────▶ Voided
//! ```
//!
//! Both end states are terminal and mutually exclusive. A failed generation
//! attempt only annotates `execute_note`; the item stays scheduled and is
//! retried by the next sweep.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{
    BillingSchedulePeriodId, DiscountId, OrderId, ProductId, StudentProductId, TaxId,
};
use crate::bill_item::BillItem;
use crate::calendar::BillingSchedulePeriod;
use crate::error::BillingError;

/// Note written on the queue item that produced a subscription's final charge
pub const LAST_BILL_ITEM_NOTE: &str = "last bill item";

/// State of a queue item, derived from its flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpcomingState {
    Scheduled,
    Generated,
    Voided,
}

/// A staged, not-yet-billed charge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpcomingBillItem {
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub student_product_id: StudentProductId,
    pub product_description: String,
    pub discount_id: Option<DiscountId>,
    pub tax_id: Option<TaxId>,
    pub billing_schedule_period_id: BillingSchedulePeriodId,
    pub billing_date: DateTime<Utc>,
    pub is_generated: bool,
    pub execute_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl UpcomingBillItem {
    /// Stages the charge of `period` for the subscription billed by `seed`
    pub fn from_seed(seed: &BillItem, period: &BillingSchedulePeriod, now: DateTime<Utc>) -> Self {
        Self {
            order_id: seed.order_id,
            product_id: seed.product_id,
            student_product_id: seed.student_product_id,
            product_description: seed.product_description.clone(),
            discount_id: seed.discount_id,
            tax_id: seed.tax_id,
            billing_schedule_period_id: period.id,
            billing_date: period.billing_date,
            is_generated: false,
            execute_note: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// The same charge moved on to `period`
    pub fn for_next_period(&self, period: &BillingSchedulePeriod, now: DateTime<Utc>) -> Self {
        Self {
            billing_schedule_period_id: period.id,
            billing_date: period.billing_date,
            is_generated: false,
            execute_note: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            ..self.clone()
        }
    }

    pub fn state(&self) -> UpcomingState {
        if self.deleted_at.is_some() {
            UpcomingState::Voided
        } else if self.is_generated {
            UpcomingState::Generated
        } else {
            UpcomingState::Scheduled
        }
    }

    /// Scheduled and billed on or before `cutoff`
    pub fn is_due(&self, cutoff: DateTime<Utc>) -> bool {
        self.state() == UpcomingState::Scheduled && self.billing_date <= cutoff
    }

    pub fn mark_generated(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.leave_scheduled(UpcomingState::Generated)?;
        self.is_generated = true;
        self.updated_at = now;
        Ok(())
    }

    /// Marks generated and tags the item as the subscription's final charge
    pub fn mark_last(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.mark_generated(now)?;
        self.execute_note = Some(LAST_BILL_ITEM_NOTE.to_string());
        Ok(())
    }

    pub fn void(&mut self, now: DateTime<Utc>) -> Result<(), BillingError> {
        self.leave_scheduled(UpcomingState::Voided)?;
        self.deleted_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Records a failed generation attempt without leaving the scheduled state
    pub fn annotate_failure(&mut self, note: impl Into<String>, now: DateTime<Utc>) -> Result<(), BillingError> {
        if self.state() != UpcomingState::Scheduled {
            return Err(BillingError::invalid_transition(
                "upcoming bill item",
                self.state(),
                UpcomingState::Scheduled,
            ));
        }
        self.execute_note = Some(note.into());
        self.updated_at = now;
        Ok(())
    }

    fn leave_scheduled(&self, to: UpcomingState) -> Result<(), BillingError> {
        match self.state() {
            UpcomingState::Scheduled => Ok(()),
            from => Err(BillingError::invalid_transition("upcoming bill item", from, to)),
        }
    }
}

/// Orders a sweep batch oldest billing date first
///
/// The queue query returns newest first; processing oldest first bills the
/// most overdue charges before the rest.
pub fn sort_oldest_first(items: &mut [UpcomingBillItem]) {
    items.sort_by(|a, b| {
        a.billing_date
            .cmp(&b.billing_date)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}
