//! Postgres enum types
//!
//! The domain enums carry no database knowledge; each gets a mirror here
//! bound to its Postgres type, with conversions both ways.

use domain_billing::{
    ApprovalStatus, BillType, BillingApprovalStatus, BillingStatus, DiscountAmountType,
    ProductStatus, StudentProductLabel, TaxCategory,
};

macro_rules! db_enum {
    ($(#[$meta:meta])* $db:ident <=> $domain:ident, $type_name:literal { $($variant:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
        #[sqlx(type_name = $type_name, rename_all = "SCREAMING_SNAKE_CASE")]
        pub enum $db {
            $($variant),+
        }

        impl From<$domain> for $db {
            fn from(value: $domain) -> Self {
                match value {
                    $($domain::$variant => $db::$variant),+
                }
            }
        }

        impl From<$db> for $domain {
            fn from(value: $db) -> Self {
                match value {
                    $($db::$variant => $domain::$variant),+
                }
            }
        }
    };
}

db_enum!(
    /// `product_status`
    DbProductStatus <=> ProductStatus, "product_status" { Ordered, Cancelled }
);

db_enum!(
    /// `approval_status`
    DbApprovalStatus <=> ApprovalStatus, "approval_status" { Pending, Approved, Rejected }
);

db_enum!(
    /// `student_product_label`
    DbStudentProductLabel <=> StudentProductLabel, "student_product_label" {
        Created,
        Updated,
        UpdateScheduled,
        WithdrawalScheduled,
        GraduationScheduled,
        PauseScheduled,
        Paused,
    }
);

db_enum!(
    /// `billing_status`
    DbBillingStatus <=> BillingStatus, "billing_status" {
        Pending,
        WaitingApproval,
        Billed,
        Invoiced,
        Cancelled,
        Voided,
    }
);

db_enum!(
    /// `bill_type`
    DbBillType <=> BillType, "bill_type" { BilledAtOrder, AdvanceBilling, ArrearsBilling }
);

db_enum!(
    /// `billing_approval_status`
    DbBillingApprovalStatus <=> BillingApprovalStatus, "billing_approval_status" {
        WaitingForApproval,
        Approved,
        Rejected,
    }
);

db_enum!(
    /// `tax_category`
    DbTaxCategory <=> TaxCategory, "tax_category" { Inclusive, Exclusive }
);

db_enum!(
    /// `discount_amount_type`
    DbDiscountAmountType <=> DiscountAmountType, "discount_amount_type" { Percentage, Fixed }
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_status_mirror_is_lossless() {
        let all = [
            BillingStatus::Pending,
            BillingStatus::WaitingApproval,
            BillingStatus::Billed,
            BillingStatus::Invoiced,
            BillingStatus::Cancelled,
            BillingStatus::Voided,
        ];
        for status in all {
            let db: DbBillingStatus = status.into();
            assert_eq!(BillingStatus::from(db), status);
        }
    }

    #[test]
    fn test_label_mirror() {
        let db = DbStudentProductLabel::from(StudentProductLabel::WithdrawalScheduled);
        assert_eq!(db, DbStudentProductLabel::WithdrawalScheduled);
    }
}
