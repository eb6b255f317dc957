//! Unit tests for the Identifiers module
//!
//! Tests cover identifier creation, parsing, conversion, and display
//! formatting for the billing identifiers.

use core_kernel::{
    StudentId, StudentProductId, ProductId, LocationId, OrderId,
    BillingScheduleId, BillingSchedulePeriodId, BillingRatioId,
    DiscountId, TaxId, CourseId, AccountingCategoryId,
};
use uuid::Uuid;

mod student_product_id_tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_ids() {
        let id1 = StudentProductId::new();
        let id2 = StudentProductId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_new_generates_time_ordered_ids() {
        let id1 = StudentProductId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = StudentProductId::new();
        let uuid1: Uuid = id1.into();
        let uuid2: Uuid = id2.into();
        assert!(uuid1 < uuid2);
    }

    #[test]
    fn test_random_is_v4() {
        let id = StudentProductId::random();
        assert_eq!(id.as_uuid().get_version_num(), 4);
    }

    #[test]
    fn test_from_uuid() {
        let uuid = Uuid::new_v4();
        let id = StudentProductId::from_uuid(uuid);
        assert_eq!(*id.as_uuid(), uuid);
    }

    #[test]
    fn test_display_and_parse() {
        let id = StudentProductId::new();
        let display = id.to_string();
        assert!(display.starts_with("SP-"));

        let parsed: StudentProductId = display.parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn test_parse_without_prefix() {
        let uuid = Uuid::new_v4();
        let parsed: StudentProductId = uuid.to_string().parse().unwrap();
        assert_eq!(*parsed.as_uuid(), uuid);
    }

    #[test]
    fn test_parse_invalid() {
        let result: Result<StudentProductId, _> = "SP-not-a-uuid".parse();
        assert!(result.is_err());
    }
}

mod prefixes {
    use super::*;

    #[test]
    fn test_all_prefixes() {
        assert_eq!(StudentId::prefix(), "STU");
        assert_eq!(StudentProductId::prefix(), "SP");
        assert_eq!(ProductId::prefix(), "PRD");
        assert_eq!(LocationId::prefix(), "LOC");
        assert_eq!(OrderId::prefix(), "ORD");
        assert_eq!(BillingScheduleId::prefix(), "BS");
        assert_eq!(BillingSchedulePeriodId::prefix(), "BSP");
        assert_eq!(BillingRatioId::prefix(), "BR");
        assert_eq!(DiscountId::prefix(), "DSC");
        assert_eq!(TaxId::prefix(), "TAX");
        assert_eq!(CourseId::prefix(), "CRS");
        assert_eq!(AccountingCategoryId::prefix(), "ACAT");
    }
}

mod serde_behaviour {
    use super::*;

    #[test]
    fn test_serializes_transparently() {
        let id = OrderId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id.as_uuid()));

        let back: OrderId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
