//! Repository tests against a PostgreSQL testcontainer
//!
//! Each test starts its own container. Ignored by default; run with
//! `cargo test -p infra_db -- --ignored`.

mod common;

use chrono::Duration;
use rust_decimal_macros::dec;

use core_kernel::{
    AccountingCategoryId, BillingSchedulePeriodId, CourseId, LocationId, OrderId, ProductId, StudentId,
};
use domain_billing::{
    BillItemAccountCategory, BillItemCourse, BillingStatus, ProductStatus, StudentProductLabel,
    UpcomingBillItem, UpcomingState,
};
use infra_db::{
    BillItemAccountCategoryRepository, BillItemCourseRepository, BillItemRepository, BillingRatioRepository,
    BillingSchedulePeriodRepository, BillingScheduleRepository, DatabaseError, OrderRepository, OrderRow,
    OrderStatus, ProductRepository, ProductRow, ProductType, StudentProductRepository,
    UpcomingBillItemRepository,
};
use test_utils::{
    assert_single_latest, assert_supersedes, assert_upcoming_state, create_isolated_test_database,
    CalendarFixtures, NewBillItemBuilder, StudentProductBuilder, TemporalFixtures,
};

use common::{setup, year_2024};

// ============================================================================
// Billing Calendar
// ============================================================================

mod calendar_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_period_lookups() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillingSchedulePeriodRepository;

        let found = repo
            .get_period_by_schedule_id_and_end_time(pool, fixture.schedule.id, TemporalFixtures::at(2024, 2, 10))
            .await
            .unwrap();
        assert_eq!(found.id, fixture.february().id);

        let next = repo
            .get_next_billing_schedule_period(pool, fixture.schedule.id, fixture.january().end_date)
            .await
            .unwrap();
        assert_eq!(next.id, fixture.february().id);

        let latest = repo.get_latest_billing_schedule_period(pool, fixture.schedule.id).await.unwrap();
        assert_eq!(latest.id, fixture.periods[5].id);

        let spring = repo
            .get_all_by_schedule_id_and_range(
                pool,
                fixture.schedule.id,
                TemporalFixtures::at(2024, 3, 1),
                TemporalFixtures::end_of(2024, 4, 30),
            )
            .await
            .unwrap();
        assert_eq!(spring.len(), 2);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_period_outside_calendar_is_not_found() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;

        let result = BillingSchedulePeriodRepository
            .get_period_by_schedule_id_and_end_time(pool, fixture.schedule.id, TemporalFixtures::at(2025, 1, 15))
            .await;
        assert!(matches!(result, Err(ref e) if e.is_not_found()));

        let result = BillingSchedulePeriodRepository
            .get_by_id(pool, BillingSchedulePeriodId::new())
            .await;
        assert!(matches!(result, Err(DatabaseError::NotFound(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_overlapping_period_is_rejected() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;

        let overlapping = CalendarFixtures::period(
            fixture.schedule.id,
            TemporalFixtures::at(2024, 1, 15),
            TemporalFixtures::end_of(2024, 2, 14),
        );
        let result = BillingSchedulePeriodRepository.create(pool, &overlapping).await;
        assert!(matches!(result, Err(DatabaseError::TemporalOverlap(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_ratio_window_lookup_and_walk() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillingRatioRepository;

        for ratio in CalendarFixtures::daily_ratios(fixture.january()) {
            repo.create(pool, &ratio).await.unwrap();
        }

        let mut tx = pool.begin().await.unwrap();
        let ratio = repo
            .get_first_ratio_by_billing_schedule_period_id_and_from_time(
                &mut *tx,
                fixture.january().id,
                TemporalFixtures::at(2024, 1, 15) + Duration::hours(10),
            )
            .await
            .unwrap();
        assert_eq!((ratio.billing_ratio_numerator, ratio.billing_ratio_denominator), (17, 31));
        assert_eq!(ratio.apply(dec!(3100)).unwrap(), dec!(1700));

        let next = repo
            .get_next_ratio_by_billing_schedule_period_id_and_previous(&mut *tx, &ratio)
            .await
            .unwrap();
        assert_eq!(next.billing_ratio_numerator, 16);
        tx.rollback().await.unwrap();

        let missing = repo
            .get_first_ratio_by_billing_schedule_period_id_and_from_time(
                pool,
                fixture.february().id,
                TemporalFixtures::at(2024, 2, 10),
            )
            .await;
        assert!(matches!(missing, Err(ref e) if e.is_not_found()));
    }
}

// ============================================================================
// Subscription Ledger
// ============================================================================

mod subscription_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_versioned_update_rejects_stale_version() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = StudentProductRepository;
        let now = TemporalFixtures::january_sweep();

        let mut changed = fixture.subscription.clone();
        changed.upcoming_billing_date = Some(fixture.february().billing_date);
        let version = repo.update_with_version_number(pool, &changed, 0, now).await.unwrap();
        assert_eq!(version, 1);

        let stale = repo.update_with_version_number(pool, &changed, 0, now).await;
        assert!(matches!(stale, Err(ref e) if e.is_retryable()));

        let stored = repo.get_by_id(pool, changed.id).await.unwrap();
        assert_eq!(stored.version_number, 1);
        assert_eq!(stored.upcoming_billing_date, Some(fixture.february().billing_date));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_status_change_clears_label() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let subscription = StudentProductBuilder::new()
            .with_label(StudentProductLabel::WithdrawalScheduled)
            .build();
        let fixture = setup(pool, subscription).await;
        let repo = StudentProductRepository;
        let now = TemporalFixtures::january_sweep();

        let labelled = repo
            .get_student_products_by_student_product_label_for_update(pool, StudentProductLabel::WithdrawalScheduled)
            .await
            .unwrap();
        assert!(labelled.iter().any(|sp| sp.id == fixture.subscription.id));

        repo.update_status_student_product_and_reset_student_product_label(
            pool,
            fixture.subscription.id,
            ProductStatus::Cancelled,
            0,
            now,
        )
        .await
        .unwrap();

        let stored = repo.get_by_id(pool, fixture.subscription.id).await.unwrap();
        assert_eq!(stored.product_status, ProductStatus::Cancelled);
        assert_eq!(stored.student_product_label, None);
        assert_eq!(stored.version_number, 1);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_supersession_chain_walks_back_to_the_root() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = StudentProductRepository;
        let now = TemporalFixtures::january_sweep();

        let replacement = StudentProductBuilder::new()
            .replacing(&fixture.subscription)
            .with_start_date(TemporalFixtures::at(2024, 3, 1))
            .build();
        repo.create(pool, &replacement).await.unwrap();
        repo.set_updated_to_student_product_id(pool, fixture.subscription.id, replacement.id, 0, now)
            .await
            .unwrap();

        let chain = repo.get_supersession_chain(pool, replacement.id).await.unwrap();
        let ids: Vec<_> = chain.iter().map(|sp| sp.id).collect();
        assert_eq!(ids, vec![replacement.id, fixture.subscription.id]);
        assert_eq!(chain[1].updated_to_student_product_id, Some(replacement.id));

        let by_root = repo
            .get_student_product_associated_by_root_id(pool, fixture.subscription.id)
            .await
            .unwrap();
        assert!(by_root.iter().any(|sp| sp.id == replacement.id));
    }
}

// ============================================================================
// Upcoming-Charge Queue
// ============================================================================

mod upcoming_tests {
    use super::*;

    fn staged(fixture: &common::BillingFixture) -> UpcomingBillItem {
        UpcomingBillItem::from_seed(&fixture.seed, fixture.february(), common::created_at())
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_due_item_leaves_the_sweep_once_generated() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let item = staged(&fixture);
        repo.create(pool, &item).await.unwrap();

        let cutoff = TemporalFixtures::end_of(2024, 1, 28);
        let due = repo.get_upcoming_bill_items_for_generate(pool, cutoff, 10_000).await.unwrap();
        assert!(due.iter().any(|u| u.order_id == fixture.order_id));

        let early = repo
            .get_upcoming_bill_items_for_generate(pool, TemporalFixtures::at(2024, 1, 20), 10_000)
            .await
            .unwrap();
        assert!(!early.iter().any(|u| u.order_id == fixture.order_id));

        repo.update_current_upcoming_bill_item_status(pool, &item, cutoff).await.unwrap();

        let due = repo.get_upcoming_bill_items_for_generate(pool, cutoff, 10_000).await.unwrap();
        assert!(!due.iter().any(|u| u.order_id == fixture.order_id));

        let again = repo.update_current_upcoming_bill_item_status(pool, &item, cutoff).await;
        assert!(matches!(again, Err(DatabaseError::ConcurrencyConflict { expected: 1, actual: 0, .. })));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_removed_item_cannot_be_generated() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let item = staged(&fixture);
        repo.create(pool, &item).await.unwrap();
        let now = TemporalFixtures::january_sweep();

        let removed = repo
            .remove_old_upcoming_bill_item(pool, item.order_id, item.product_id, now)
            .await
            .unwrap();
        assert_eq!(removed.len(), 1);
        assert_upcoming_state(&removed[0], UpcomingState::Voided);

        let result = repo.update_current_upcoming_bill_item_status(pool, &item, now).await;
        assert!(matches!(result, Err(ref e) if e.is_retryable()));

        let nothing = repo
            .remove_old_upcoming_bill_item(pool, item.order_id, item.product_id, now)
            .await
            .unwrap();
        assert!(nothing.is_empty());

        // A voided key can be staged again
        repo.create(pool, &item).await.unwrap();
        let live = repo
            .get_by_key(pool, item.order_id, item.product_id, item.billing_schedule_period_id)
            .await
            .unwrap();
        assert_upcoming_state(&live, UpcomingState::Scheduled);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_live_key_is_unique() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let item = staged(&fixture);

        repo.create(pool, &item).await.unwrap();
        let duplicate = repo.create(pool, &item).await;
        assert!(matches!(duplicate, Err(DatabaseError::DuplicateEntry(_))));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_void_by_order_leaves_generated_rows() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let now = TemporalFixtures::january_sweep();

        let february = staged(&fixture);
        repo.create(pool, &february).await.unwrap();
        repo.update_current_upcoming_bill_item_status(pool, &february, now).await.unwrap();

        let march = february.for_next_period(fixture.march(), now);
        repo.create(pool, &march).await.unwrap();

        let voided = repo.void_upcoming_bill_items_by_order_id(pool, fixture.order_id, now).await.unwrap();
        assert_eq!(voided, 1);

        let generated = repo
            .get_by_key(pool, february.order_id, february.product_id, february.billing_schedule_period_id)
            .await
            .unwrap();
        assert_upcoming_state(&generated, UpcomingState::Generated);

        let gone = repo
            .get_by_key(pool, march.order_id, march.product_id, march.billing_schedule_period_id)
            .await
            .unwrap();
        assert_upcoming_state(&gone, UpcomingState::Voided);

        let due = repo
            .get_upcoming_bill_items_for_generate(pool, TemporalFixtures::end_of(2024, 12, 31), 10_000)
            .await
            .unwrap();
        assert!(!due.iter().any(|u| u.order_id == fixture.order_id));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_void_with_note_is_terminal() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let item = staged(&fixture);
        repo.create(pool, &item).await.unwrap();
        let now = TemporalFixtures::january_sweep();

        repo.void_upcoming_bill_item_with_note(pool, &item, "no billing schedule", now)
            .await
            .unwrap();

        let stored = repo
            .get_by_key(pool, item.order_id, item.product_id, item.billing_schedule_period_id)
            .await
            .unwrap();
        assert_upcoming_state(&stored, UpcomingState::Voided);
        assert_eq!(stored.execute_note.as_deref(), Some("no billing schedule"));

        let again = repo.void_upcoming_bill_item_with_note(pool, &item, "again", now).await;
        assert!(matches!(again, Err(ref e) if e.is_retryable()));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_execute_note_keeps_item_scheduled() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = UpcomingBillItemRepository;
        let item = staged(&fixture);
        repo.create(pool, &item).await.unwrap();

        repo.add_upcoming_execute_note(pool, &item, "ratio missing", TemporalFixtures::january_sweep())
            .await
            .unwrap();

        let stored = repo.get_latest_by_student_product_id(pool, fixture.subscription.id).await.unwrap();
        assert_eq!(stored.execute_note.as_deref(), Some("ratio missing"));
        assert_upcoming_state(&stored, UpcomingState::Scheduled);
    }
}

// ============================================================================
// Bill Item Ledger
// ============================================================================

mod bill_item_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_create_latest_keeps_one_latest_row() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillItemRepository;
        let now = TemporalFixtures::january_sweep();

        let february = NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.february()).build();
        let mut conn = pool.acquire().await.unwrap();
        let stored = repo.create_latest(&mut conn, &february, now).await.unwrap();

        let previous = repo.get_by_sequence_number(pool, fixture.seed.bill_item_sequence_number).await.unwrap();
        assert_supersedes(&stored, &previous);
        assert_eq!(stored.previous_bill_item_status, Some(BillingStatus::Billed));

        let all = repo
            .get_recurring_bill_items_by_order_id_and_product_id(pool, fixture.order_id, fixture.subscription.product_id)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_single_latest(&all);

        let latest = repo
            .get_latest_bill_item_by_student_product_id_for_update(pool, fixture.subscription.id)
            .await
            .unwrap();
        assert_eq!(latest.bill_item_sequence_number, stored.bill_item_sequence_number);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_second_latest_row_is_rejected_by_the_index() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;

        let sequence = BillItemRepository
            .create(
                pool,
                &NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.february()).build(),
                TemporalFixtures::january_sweep(),
            )
            .await
            .unwrap();
        let result = sqlx::query("UPDATE bill_item SET is_latest_bill_item = TRUE WHERE bill_item_sequence_number = $1")
            .bind(sequence)
            .execute(pool)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_status_update_is_conditional() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillItemRepository;
        let now = TemporalFixtures::january_sweep();

        let sequence = repo
            .create(
                pool,
                &NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.february()).build(),
                now,
            )
            .await
            .unwrap();

        repo.update_billing_status_by_sequence_number(pool, sequence, BillingStatus::Pending, BillingStatus::Billed, now)
            .await
            .unwrap();

        let lost_race = repo
            .update_billing_status_by_sequence_number(pool, sequence, BillingStatus::Pending, BillingStatus::Billed, now)
            .await;
        assert!(matches!(lost_race, Err(ref e) if e.is_retryable()));

        let backwards = repo
            .update_billing_status_by_sequence_number(pool, sequence, BillingStatus::Billed, BillingStatus::Pending, now)
            .await;
        assert!(matches!(backwards, Err(DatabaseError::Domain(_))));

        assert_eq!(
            repo.get_by_sequence_number(pool, sequence).await.unwrap().billing_status,
            BillingStatus::Billed
        );
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_due_pending_items_are_selected_for_billing() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillItemRepository;
        let now = TemporalFixtures::january_sweep();

        let february = NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.february()).build();
        let march = NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.march()).build();
        let feb_seq = repo.create(pool, &february, now).await.unwrap();
        let mar_seq = repo.create(pool, &march, now).await.unwrap();

        let due = repo
            .get_billing_items_that_need_to_be_billed(pool, TemporalFixtures::end_of(2024, 1, 28), 10_000)
            .await
            .unwrap();
        let sequences: Vec<_> = due.iter().map(|b| b.bill_item_sequence_number).collect();
        assert!(sequences.contains(&feb_seq));
        assert!(!sequences.contains(&mar_seq));
        assert!(!sequences.contains(&fixture.seed.bill_item_sequence_number));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_void_by_order_and_review_flag() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillItemRepository;
        let now = TemporalFixtures::january_sweep();

        repo.create(
            pool,
            &NewBillItemBuilder::for_period(&fixture.subscription, fixture.order_id, fixture.february()).build(),
            now,
        )
        .await
        .unwrap();

        let voided = repo.void_bill_item_by_order_id(pool, fixture.order_id, now).await.unwrap();
        assert_eq!(voided, 2);

        let reviewed = repo.update_review_flag_by_order_id(pool, fixture.order_id, true, now).await.unwrap();
        assert_eq!(reviewed, 2);

        let page = repo.get_bill_items_by_order_id_and_paging(pool, fixture.order_id, 1, 0).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].billing_status, BillingStatus::Voided);
        assert!(page[0].is_reviewed);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_seed_selection_skips_replaced_plans() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let repo = BillItemRepository;
        let now = TemporalFixtures::january_sweep();

        let seeds = repo
            .get_recurring_bill_items_for_scheduled_generation_of_next_bill_items(pool, 10_000)
            .await
            .unwrap();
        assert!(seeds.iter().any(|b| b.bill_item_sequence_number == fixture.seed.bill_item_sequence_number));

        let replacement = StudentProductBuilder::new().replacing(&fixture.subscription).build();
        StudentProductRepository.create(pool, &replacement).await.unwrap();
        StudentProductRepository
            .set_updated_to_student_product_id(pool, fixture.subscription.id, replacement.id, 0, now)
            .await
            .unwrap();

        let seeds = repo
            .get_recurring_bill_items_for_scheduled_generation_of_next_bill_items(pool, 10_000)
            .await
            .unwrap();
        assert!(!seeds.iter().any(|b| b.student_product_id == fixture.subscription.id));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_seed_selection_skips_voided_next_period() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let now = TemporalFixtures::january_sweep();

        let february = UpcomingBillItem::from_seed(&fixture.seed, fixture.february(), now);
        UpcomingBillItemRepository.create(pool, &february).await.unwrap();
        UpcomingBillItemRepository
            .void_upcoming_bill_item_with_note(pool, &february, "no billing schedule", now)
            .await
            .unwrap();

        let seeds = BillItemRepository
            .get_recurring_bill_items_for_scheduled_generation_of_next_bill_items(pool, 10_000)
            .await
            .unwrap();
        assert!(!seeds.iter().any(|b| b.student_product_id == fixture.subscription.id));
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_unknown_order_has_no_items() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();

        let page = BillItemRepository
            .get_bill_items_by_order_id_and_paging(pool, OrderId::new(), 10, 0)
            .await
            .unwrap();
        assert!(page.is_empty());
    }
}

// ============================================================================
// Create / Get Round Trips
// ============================================================================

mod round_trip_tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_calendar_rows_round_trip() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;

        let schedule = BillingScheduleRepository.get_by_id(pool, fixture.schedule.id).await.unwrap();
        assert_eq!(schedule, fixture.schedule);

        for period in &fixture.periods {
            let stored = BillingSchedulePeriodRepository.get_by_id(pool, period.id).await.unwrap();
            assert_eq!(&stored, period);
        }

        let ratio = CalendarFixtures::ratio(
            fixture.january(),
            TemporalFixtures::at(2024, 1, 15),
            TemporalFixtures::end_of(2024, 1, 31),
            17,
            31,
        );
        BillingRatioRepository.create(pool, &ratio).await.unwrap();
        assert_eq!(BillingRatioRepository.get_by_id(pool, ratio.id).await.unwrap(), ratio);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_subscription_and_queue_round_trip() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;

        let subscription = StudentProductRepository.get_by_id(pool, fixture.subscription.id).await.unwrap();
        assert_eq!(subscription, fixture.subscription);

        let item = UpcomingBillItem::from_seed(&fixture.seed, fixture.february(), common::created_at());
        UpcomingBillItemRepository.create(pool, &item).await.unwrap();
        let stored = UpcomingBillItemRepository
            .get_by_key(pool, item.order_id, item.product_id, item.billing_schedule_period_id)
            .await
            .unwrap();
        assert_eq!(stored, item);
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_bill_item_and_children_round_trip() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let fixture = setup(pool, year_2024()).await;
        let sequence = fixture.seed.bill_item_sequence_number;

        let stored = BillItemRepository.get_by_sequence_number(pool, sequence).await.unwrap();
        assert_eq!(stored, fixture.seed);

        let courses = vec![
            BillItemCourse {
                bill_item_sequence_number: sequence,
                course_id: CourseId::new(),
                course_name: "Algebra".to_string(),
                course_weight: Some(2),
                course_slot: None,
                created_at: common::created_at(),
            },
            BillItemCourse {
                bill_item_sequence_number: sequence,
                course_id: CourseId::new(),
                course_name: "Biology".to_string(),
                course_weight: None,
                course_slot: Some(1),
                created_at: common::created_at(),
            },
        ];
        let categories = vec![BillItemAccountCategory {
            bill_item_sequence_number: sequence,
            accounting_category_id: AccountingCategoryId::new(),
            created_at: common::created_at(),
        }];

        let mut conn = pool.acquire().await.unwrap();
        BillItemCourseRepository.multi_create(&mut conn, &courses).await.unwrap();
        BillItemAccountCategoryRepository.multi_create(&mut conn, &categories).await.unwrap();

        assert_eq!(
            BillItemCourseRepository.get_by_bill_item_sequence_number(pool, sequence).await.unwrap(),
            courses
        );
        assert_eq!(
            BillItemAccountCategoryRepository
                .get_by_bill_item_sequence_number(pool, sequence)
                .await
                .unwrap(),
            categories
        );

        // A failing row rolls the whole batch back
        let clash = vec![
            BillItemCourse {
                course_id: CourseId::new(),
                course_name: "Chemistry".to_string(),
                ..courses[0].clone()
            },
            courses[1].clone(),
        ];
        let result = BillItemCourseRepository.multi_create(&mut conn, &clash).await;
        assert!(matches!(result, Err(DatabaseError::DuplicateEntry(_))));
        assert_eq!(
            BillItemCourseRepository.get_by_bill_item_sequence_number(pool, sequence).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    #[ignore = "requires a Docker daemon for testcontainers"]
    async fn test_reference_rows_round_trip() {
        let db = create_isolated_test_database().await.unwrap();
        let pool = db.pool();
        let created = common::created_at();

        let product = ProductRow {
            product_id: ProductId::new().into(),
            name: "Summer course".to_string(),
            product_type: ProductType::RecurringFee,
            billing_schedule_id: None,
            disable_pro_rating_flag: true,
            is_archived: false,
            created_at: created,
            updated_at: created,
        };
        ProductRepository.create(pool, &product).await.unwrap();
        assert_eq!(ProductRepository.get_by_id(pool, product.product_id.into()).await.unwrap(), product);

        let order = OrderRow {
            order_id: OrderId::new().into(),
            student_id: StudentId::new().into(),
            location_id: LocationId::new().into(),
            order_status: OrderStatus::Submitted,
            order_comment: Some("walk-in".to_string()),
            is_reviewed: false,
            created_at: created,
            updated_at: created,
        };
        OrderRepository.create(pool, &order).await.unwrap();
        assert_eq!(OrderRepository.get_by_id(pool, order.order_id.into()).await.unwrap(), order);
    }
}
