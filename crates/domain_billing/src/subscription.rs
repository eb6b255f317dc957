//! Student products (subscriptions)
//!
//! A `StudentProduct` is a student's instance of a purchased product and the
//! authoritative state of what is billed. It is mutated only through
//! version-checked updates: every change must present the `version_number`
//! the caller read, and a successful change increments it by one.
//!
//! Plan changes never edit a subscription in place. The replacement row points
//! back through `updated_from_student_product_id` and the replaced row points
//! forward through `updated_to_student_product_id`, forming a supersession
//! chain. Bundled ("associated") products point at their primary product
//! through `root_student_product_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{DateRange, LocationId, ProductId, StudentId, StudentProductId};
use crate::error::BillingError;

/// Lifecycle status of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    /// Ordered and billable
    Ordered,
    /// Terminated; never billed again
    Cancelled,
}

/// Approval of the order that created the subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

/// In-flight transition marker
///
/// A label only has meaning relative to a pending change; it is cleared
/// whenever the product status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StudentProductLabel {
    Created,
    Updated,
    UpdateScheduled,
    WithdrawalScheduled,
    GraduationScheduled,
    PauseScheduled,
    Paused,
}

impl StudentProductLabel {
    /// Labels a scheduled batch job picks up and clears
    pub fn is_scheduled(&self) -> bool {
        matches!(
            self,
            StudentProductLabel::UpdateScheduled
                | StudentProductLabel::WithdrawalScheduled
                | StudentProductLabel::GraduationScheduled
                | StudentProductLabel::PauseScheduled
        )
    }
}

/// A student's subscription to a product
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentProduct {
    pub id: StudentProductId,
    pub student_id: StudentId,
    pub product_id: ProductId,
    pub location_id: LocationId,
    pub upcoming_billing_date: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub product_status: ProductStatus,
    pub approval_status: Option<ApprovalStatus>,
    pub student_product_label: Option<StudentProductLabel>,
    pub updated_from_student_product_id: Option<StudentProductId>,
    pub updated_to_student_product_id: Option<StudentProductId>,
    pub root_student_product_id: Option<StudentProductId>,
    pub is_associated: bool,
    pub is_unique: bool,
    pub version_number: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl StudentProduct {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn is_cancelled(&self) -> bool {
        self.product_status == ProductStatus::Cancelled
    }

    pub fn is_paused(&self) -> bool {
        self.student_product_label == Some(StudentProductLabel::Paused)
    }

    /// Replaced by a newer plan through the supersession chain
    pub fn is_superseded(&self) -> bool {
        self.updated_to_student_product_id.is_some()
    }

    /// Whether the recurring billing job may charge this subscription
    pub fn is_billable(&self) -> bool {
        !self.is_deleted() && !self.is_cancelled() && !self.is_paused() && !self.is_superseded()
    }

    /// Charges are gone for good: deleted, cancelled or replaced
    pub fn is_closed(&self) -> bool {
        self.is_deleted() || self.is_cancelled() || self.is_superseded()
    }

    /// Rejects a change presented with a stale version
    pub fn check_version(&self, expected: i32) -> Result<(), BillingError> {
        if self.version_number != expected {
            return Err(BillingError::VersionMismatch {
                id: self.id.to_string(),
                expected,
                actual: self.version_number,
            });
        }
        Ok(())
    }

    /// Changes the product status, clearing the label and bumping the version
    pub fn change_status(
        &mut self,
        status: ProductStatus,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_version(expected_version)?;
        self.product_status = status;
        self.student_product_label = None;
        self.bump(now);
        Ok(())
    }

    /// Sets or clears the label under the version check
    pub fn relabel(
        &mut self,
        label: Option<StudentProductLabel>,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_version(expected_version)?;
        self.student_product_label = label;
        self.bump(now);
        Ok(())
    }

    /// Links this subscription forward to the plan replacing it
    pub fn supersede_with(
        &mut self,
        replacement: StudentProductId,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<(), BillingError> {
        self.check_version(expected_version)?;
        if replacement == self.id {
            return Err(BillingError::validation(format!(
                "student product {} cannot supersede itself",
                self.id
            )));
        }
        self.updated_to_student_product_id = Some(replacement);
        self.bump(now);
        Ok(())
    }

    /// True when the subscription's last day falls inside `range`
    pub fn ends_within(&self, range: &DateRange) -> bool {
        self.end_date.is_some_and(|end| range.contains(end))
    }

    /// True when the subscription has ended before `range` begins
    pub fn ended_before(&self, range: &DateRange) -> bool {
        self.end_date.is_some_and(|end| end < range.start)
    }

    fn bump(&mut self, now: DateTime<Utc>) {
        self.version_number += 1;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product() -> StudentProduct {
        let now = Utc::now();
        StudentProduct {
            id: StudentProductId::new(),
            student_id: StudentId::new(),
            product_id: ProductId::new(),
            location_id: LocationId::new(),
            upcoming_billing_date: None,
            start_date: now,
            end_date: None,
            product_status: ProductStatus::Ordered,
            approval_status: None,
            student_product_label: Some(StudentProductLabel::WithdrawalScheduled),
            updated_from_student_product_id: None,
            updated_to_student_product_id: None,
            root_student_product_id: None,
            is_associated: false,
            is_unique: false,
            version_number: 0,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    #[test]
    fn test_status_change_clears_label() {
        let mut sp = product();
        sp.change_status(ProductStatus::Cancelled, 0, Utc::now()).unwrap();

        assert_eq!(sp.product_status, ProductStatus::Cancelled);
        assert!(sp.student_product_label.is_none());
        assert_eq!(sp.version_number, 1);
    }

    #[test]
    fn test_stale_version_leaves_row_untouched() {
        let mut sp = product();
        let before = sp.clone();

        let result = sp.change_status(ProductStatus::Cancelled, 7, Utc::now());

        assert!(matches!(result, Err(BillingError::VersionMismatch { expected: 7, actual: 0, .. })));
        assert_eq!(sp, before);
    }

    #[test]
    fn test_superseded_subscription_is_not_billable() {
        let mut sp = product();
        assert!(sp.is_billable());

        sp.supersede_with(StudentProductId::new(), 0, Utc::now()).unwrap();

        assert!(!sp.is_billable());
        assert!(sp.is_closed());
    }

    #[test]
    fn test_paused_subscription_is_held_not_closed() {
        let mut sp = product();
        sp.relabel(Some(StudentProductLabel::Paused), 0, Utc::now()).unwrap();

        assert!(!sp.is_billable());
        assert!(!sp.is_closed());
    }

    #[test]
    fn test_cannot_supersede_itself() {
        let mut sp = product();
        let id = sp.id;
        assert!(sp.supersede_with(id, 0, Utc::now()).is_err());
    }
}
