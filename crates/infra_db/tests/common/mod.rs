//! Shared setup for the database tests

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use core_kernel::OrderId;
use domain_billing::{BillItem, BillingSchedule, BillingSchedulePeriod, BillingStatus, StudentProduct};
use infra_db::{
    BillItemRepository, BillingSchedulePeriodRepository, BillingScheduleRepository, OrderRepository,
    OrderRow, OrderStatus, ProductRepository, ProductRow, ProductType, StudentProductRepository,
};
use test_utils::{CalendarFixtures, NewBillItemBuilder, StudentProductBuilder, TemporalFixtures};

/// A recurring product on a monthly 2024 calendar with one subscription
/// and its January charge
pub struct BillingFixture {
    pub schedule: BillingSchedule,
    pub periods: Vec<BillingSchedulePeriod>,
    pub order_id: OrderId,
    pub subscription: StudentProduct,
    pub seed: BillItem,
}

impl BillingFixture {
    pub fn january(&self) -> &BillingSchedulePeriod {
        &self.periods[0]
    }

    pub fn february(&self) -> &BillingSchedulePeriod {
        &self.periods[1]
    }

    pub fn march(&self) -> &BillingSchedulePeriod {
        &self.periods[2]
    }
}

pub fn created_at() -> DateTime<Utc> {
    TemporalFixtures::at(2023, 12, 1)
}

/// Inserts the fixture; `subscription` decides start, end and status
pub async fn setup(pool: &PgPool, subscription: StudentProduct) -> BillingFixture {
    setup_with_product(pool, subscription, true, false).await
}

pub async fn setup_with_product(
    pool: &PgPool,
    subscription: StudentProduct,
    with_schedule: bool,
    disable_pro_rating: bool,
) -> BillingFixture {
    let schedule = CalendarFixtures::schedule();
    BillingScheduleRepository.create(pool, &schedule).await.unwrap();

    let periods = CalendarFixtures::monthly_2024(schedule.id);
    for period in &periods {
        BillingSchedulePeriodRepository.create(pool, period).await.unwrap();
    }

    ProductRepository
        .create(
            pool,
            &ProductRow {
                product_id: subscription.product_id.into(),
                name: "Monthly tuition".to_string(),
                product_type: ProductType::RecurringFee,
                billing_schedule_id: with_schedule.then(|| schedule.id.into()),
                disable_pro_rating_flag: disable_pro_rating,
                is_archived: false,
                created_at: created_at(),
                updated_at: created_at(),
            },
        )
        .await
        .unwrap();

    let order_id = OrderId::new();
    OrderRepository
        .create(
            pool,
            &OrderRow {
                order_id: order_id.into(),
                student_id: subscription.student_id.into(),
                location_id: subscription.location_id.into(),
                order_status: OrderStatus::Submitted,
                order_comment: None,
                is_reviewed: false,
                created_at: created_at(),
                updated_at: created_at(),
            },
        )
        .await
        .unwrap();

    StudentProductRepository.create(pool, &subscription).await.unwrap();

    let january = NewBillItemBuilder::for_period(&subscription, order_id, &periods[0])
        .with_status(BillingStatus::Billed)
        .build();
    let mut conn = pool.acquire().await.unwrap();
    let seed = BillItemRepository
        .create_latest(&mut conn, &january, created_at())
        .await
        .unwrap();

    BillingFixture {
        schedule,
        periods,
        order_id,
        subscription,
        seed,
    }
}

/// A subscription running through 2024
pub fn year_2024() -> StudentProduct {
    StudentProductBuilder::new().build()
}
