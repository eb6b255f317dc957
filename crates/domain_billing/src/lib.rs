//! Billing Domain - Recurring Tuition Billing
//!
//! This crate holds the rules of the recurring billing lifecycle, free of any
//! storage concerns. The database layer (`infra_db`) persists these types and
//! the batch job drives them.
//!
//! # Components
//!
//! - **Billing Calendar** ([`calendar`]): ordered, non-overlapping billing
//!   schedule periods and the "which period contains / follows this date" rules
//! - **Proration Resolver** ([`proration`]): billing ratio windows inside a
//!   period and the arithmetic of charging a fraction of a full period
//! - **Subscription Ledger** ([`subscription`]): the `StudentProduct` record,
//!   its labels, its version number and its supersession chain
//! - **Upcoming-Charge Queue** ([`upcoming`]): staged charges and their
//!   scheduled → generated / voided state machine
//! - **Bill Item Ledger** ([`bill_item`]): generated charges, billing status
//!   transitions and the single "latest" row per subscription
//! - **Generation Planner** ([`generation`]): computes the next period's
//!   charge from the previous latest bill item
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingCalendar, GenerationInput, plan_next_bill_item};
//!
//! let calendar = BillingCalendar::new(schedule_id, periods)?;
//! let period = calendar.next_after(seed.billing_to.unwrap()).unwrap();
//! let planned = plan_next_bill_item(GenerationInput {
//!     seed: &seed,
//!     subscription: &student_product,
//!     period,
//!     start_ratio: None,
//!     end_ratio: None,
//!     after_end_ratio: None,
//!     disable_pro_rating: false,
//! })?;
//! ```

pub mod calendar;
pub mod proration;
pub mod subscription;
pub mod upcoming;
pub mod bill_item;
pub mod generation;
pub mod error;

pub use calendar::{BillingCalendar, BillingSchedule, BillingSchedulePeriod};
pub use proration::{BillingRatio, ChargedFraction, RatioSet};
pub use subscription::{
    ApprovalStatus, ProductStatus, StudentProduct, StudentProductLabel,
};
pub use upcoming::{UpcomingBillItem, UpcomingState, LAST_BILL_ITEM_NOTE};
pub use bill_item::{
    BillItem, BillItemAccountCategory, BillItemCourse, BillType,
    BillingApprovalStatus, BillingStatus, DiscountAmountType, NewBillItem, TaxCategory,
};
pub use generation::{
    plan_next_bill_item, proration_dates, tax_amount, GenerationInput, PlannedBillItem, ProrationDates,
};
pub use error::BillingError;
