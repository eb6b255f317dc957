//! Repository implementations for the billing tables
//!
//! Every repository is a stateless value and every method takes the
//! executor as its first argument: a `&PgPool`, or `&mut *tx` to run inside
//! a caller's transaction. Methods that issue several statements take
//! `&mut PgConnection` and open a savepoint on it.
//!
//! Conventions:
//! - column lists are compile-time string constants, values are always bound
//! - `resource_path` is never listed on insert; the column default reads the
//!   session's `app.resource_path` setting
//! - reads that precede a dependent write in the same transaction lock with
//!   `FOR NO KEY UPDATE`; reporting reads never lock

pub mod billing_schedule;
pub mod billing_schedule_period;
pub mod billing_ratio;
pub mod student_product;
pub mod upcoming_bill_item;
pub mod bill_item;
pub mod bill_item_course;
pub mod bill_item_account_category;
pub mod product;
pub mod order;

pub use billing_schedule::BillingScheduleRepository;
pub use billing_schedule_period::BillingSchedulePeriodRepository;
pub use billing_ratio::BillingRatioRepository;
pub use student_product::StudentProductRepository;
pub use upcoming_bill_item::UpcomingBillItemRepository;
pub use bill_item::BillItemRepository;
pub use bill_item_course::BillItemCourseRepository;
pub use bill_item_account_category::BillItemAccountCategoryRepository;
pub use product::{ProductRepository, ProductRow, ProductType};
pub use order::{OrderRepository, OrderRow, OrderStatus};
