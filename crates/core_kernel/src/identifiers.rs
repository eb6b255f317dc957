//! Strongly-typed identifiers for domain entities
//!
//! Using newtype wrappers around UUIDs provides type safety and prevents
//! accidental mixing of different identifier types. Identifiers are
//! time-ordered (UUID v7) by default so that rows inserted later sort later,
//! which the "latest row" queries of the billing ledger rely on as a
//! tie-breaker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Creates a new time-ordered identifier (v7)
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            /// Creates a new random identifier (v4)
            pub fn random() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates from an existing UUID
            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Returns the identifier prefix for display
            pub fn prefix() -> &'static str {
                $prefix
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Strip prefix if present
                let uuid_str = s.strip_prefix(concat!($prefix, "-")).unwrap_or(s);
                Ok(Self(Uuid::parse_str(uuid_str)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }

        impl From<$name> for Uuid {
            fn from(id: $name) -> Uuid {
                id.0
            }
        }
    };
}

// Subscription identifiers
define_id!(StudentId, "STU");
define_id!(StudentProductId, "SP");
define_id!(ProductId, "PRD");
define_id!(LocationId, "LOC");
define_id!(OrderId, "ORD");

// Billing calendar identifiers
define_id!(BillingScheduleId, "BS");
define_id!(BillingSchedulePeriodId, "BSP");
define_id!(BillingRatioId, "BR");

// Pricing reference identifiers
define_id!(DiscountId, "DSC");
define_id!(TaxId, "TAX");
define_id!(CourseId, "CRS");
define_id!(AccountingCategoryId, "ACAT");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_student_product_id_display() {
        let id = StudentProductId::new();
        let display = id.to_string();
        assert!(display.starts_with("SP-"));
    }

    #[test]
    fn test_id_parsing() {
        let original = BillingSchedulePeriodId::new();
        let parsed: BillingSchedulePeriodId = original.to_string().parse().unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn test_uuid_conversion() {
        let uuid = Uuid::new_v4();
        let order_id = OrderId::from(uuid);
        let back: Uuid = order_id.into();
        assert_eq!(uuid, back);
    }
}
