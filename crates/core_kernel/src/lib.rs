//! Core Kernel - Foundational types for the tuition billing system
//!
//! This crate provides the building blocks shared by the billing domain and
//! the database layer:
//! - Strongly-typed identifiers for students, products, orders and calendars
//! - Inclusive timestamp ranges used by billing periods and ratio windows
//! - Timezone handling for "today" boundaries of batch sweeps

pub mod temporal;
pub mod identifiers;

pub use temporal::{DateRange, TemporalError, Timezone};
pub use identifiers::{
    StudentId, StudentProductId, ProductId, LocationId, OrderId,
    BillingScheduleId, BillingSchedulePeriodId, BillingRatioId,
    DiscountId, TaxId, CourseId, AccountingCategoryId,
};
