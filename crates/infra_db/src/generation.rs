//! Recurring bill item generation job
//!
//! One sweep runs three independent phases:
//!
//! 1. **Generate**: every due upcoming bill item becomes the next latest
//!    bill item of its subscription, and the following period is staged.
//! 2. **Bill**: pending bill items whose billing date has arrived move to
//!    `BILLED`.
//! 3. **Seed**: latest recurring bill items with nothing scheduled get an
//!    upcoming item for their next period.
//!
//! Each upcoming item is generated in its own transaction. A failure rolls
//! that transaction back and is written to the item's `execute_note` in a
//! separate statement; the item stays scheduled and the next sweep retries
//! it. Failures no retry can fix (no billing schedule, a period gone from the
//! schedule, a subscription that ended before the period) void the item with
//! the note instead. Items of paused subscriptions are left scheduled
//! untouched. Because the queue transition matches `NOT is_generated` and the
//! previous latest bill item is read under lock, a retried or concurrent
//! sweep can never charge the same item twice.

use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};
use tracing::{debug, error, info, instrument, warn};

use core_kernel::Timezone;
use domain_billing::upcoming::sort_oldest_first;
use domain_billing::{
    plan_next_bill_item, proration_dates, BillItem, BillItemAccountCategory, BillItemCourse,
    BillingError, BillingRatio, BillingSchedulePeriod, BillingStatus, GenerationInput,
    ProrationDates, UpcomingBillItem,
};

use crate::error::DatabaseError;
use crate::repositories::{
    BillItemAccountCategoryRepository, BillItemCourseRepository, BillItemRepository,
    BillingRatioRepository, BillingSchedulePeriodRepository, ProductRepository,
    StudentProductRepository, UpcomingBillItemRepository,
};

/// Sweep settings
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Maximum rows each phase reads per sweep
    pub batch_size: i64,
    /// Timezone whose calendar day decides what is due
    pub timezone: Timezone,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            timezone: Timezone::default(),
        }
    }
}

/// Counters of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GenerationReport {
    /// Upcoming items turned into bill items
    pub generated: usize,
    /// Of those, the final charge of their subscription
    pub last_items: usize,
    /// Items or seeds that failed and were left for the next sweep
    pub failed: usize,
    /// Items that can never be generated, voided with their failure note
    pub abandoned: usize,
    /// Pending bill items moved to billed
    pub billed: usize,
    /// Upcoming items staged for a next period
    pub staged: usize,
    /// Upcoming items voided because their subscription is gone or replaced
    pub voided: usize,
    /// Items left scheduled because their subscription is paused
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ItemOutcome {
    Generated,
    Last,
    Voided,
    Skipped,
}

/// Ratio windows around a subscription's start and end dates
#[derive(Debug, Default)]
struct Windows {
    start: Option<BillingRatio>,
    end: Option<BillingRatio>,
    after_end: Option<BillingRatio>,
}

/// Turns `NotFound` into `None`
fn found<T>(result: Result<T, DatabaseError>) -> Result<Option<T>, DatabaseError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// The coordinating batch job
#[derive(Debug, Clone)]
pub struct GenerationJob {
    pool: PgPool,
    config: GenerationConfig,
    periods: BillingSchedulePeriodRepository,
    ratios: BillingRatioRepository,
    student_products: StudentProductRepository,
    upcoming: UpcomingBillItemRepository,
    bill_items: BillItemRepository,
    courses: BillItemCourseRepository,
    account_categories: BillItemAccountCategoryRepository,
    products: ProductRepository,
}

impl GenerationJob {
    pub fn new(pool: PgPool, config: GenerationConfig) -> Self {
        Self {
            pool,
            config,
            periods: BillingSchedulePeriodRepository,
            ratios: BillingRatioRepository,
            student_products: StudentProductRepository,
            upcoming: UpcomingBillItemRepository,
            bill_items: BillItemRepository,
            courses: BillItemCourseRepository,
            account_categories: BillItemAccountCategoryRepository,
            products: ProductRepository,
        }
    }

    /// Runs one sweep as of `now`
    ///
    /// # Errors
    ///
    /// Only the batch reads propagate; per-item failures are counted in
    /// [`GenerationReport::failed`].
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<GenerationReport, DatabaseError> {
        let cutoff = self.config.timezone.due_cutoff(now);
        let mut report = GenerationReport::default();

        self.generate_due_items(cutoff, now, &mut report).await?;
        self.bill_due_items(cutoff, now, &mut report).await?;
        self.stage_next_periods(now, &mut report).await?;

        info!(
            generated = report.generated,
            last_items = report.last_items,
            billed = report.billed,
            staged = report.staged,
            voided = report.voided,
            skipped = report.skipped,
            failed = report.failed,
            abandoned = report.abandoned,
            "Bill item generation sweep finished"
        );
        Ok(report)
    }

    async fn generate_due_items(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut GenerationReport,
    ) -> Result<(), DatabaseError> {
        let mut items = self
            .upcoming
            .get_upcoming_bill_items_for_generate(&self.pool, cutoff, self.config.batch_size)
            .await?;
        sort_oldest_first(&mut items);
        debug!(count = items.len(), "Due upcoming bill items");

        for item in &items {
            match self.generate_item(item, now).await {
                Ok(ItemOutcome::Generated) => report.generated += 1,
                Ok(ItemOutcome::Last) => {
                    report.generated += 1;
                    report.last_items += 1;
                }
                Ok(ItemOutcome::Voided) => report.voided += 1,
                Ok(ItemOutcome::Skipped) => report.skipped += 1,
                Err(e) if e.is_permanent() => {
                    report.abandoned += 1;
                    warn!(
                        order_id = %item.order_id,
                        product_id = %item.product_id,
                        period_id = %item.billing_schedule_period_id,
                        error = %e,
                        "Upcoming bill item can never be generated, voiding it"
                    );
                    if let Err(void_error) = self
                        .upcoming
                        .void_upcoming_bill_item_with_note(&self.pool, item, &e.to_string(), now)
                        .await
                    {
                        error!(
                            order_id = %item.order_id,
                            product_id = %item.product_id,
                            error = %void_error,
                            "Voiding unbillable upcoming bill item failed"
                        );
                    }
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        order_id = %item.order_id,
                        product_id = %item.product_id,
                        period_id = %item.billing_schedule_period_id,
                        error = %e,
                        "Generating upcoming bill item failed"
                    );
                    if let Err(note_error) = self
                        .upcoming
                        .add_upcoming_execute_note(&self.pool, item, &e.to_string(), now)
                        .await
                    {
                        error!(
                            order_id = %item.order_id,
                            product_id = %item.product_id,
                            error = %note_error,
                            "Recording execute note failed"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    async fn generate_item(&self, item: &UpcomingBillItem, now: DateTime<Utc>) -> Result<ItemOutcome, DatabaseError> {
        let mut tx = self.pool.begin().await?;

        let subscription = self
            .student_products
            .get_by_id_for_update(&mut *tx, item.student_product_id)
            .await?;
        if subscription.is_closed() {
            let reason = if subscription.is_deleted() {
                "deleted"
            } else if subscription.is_cancelled() {
                "cancelled"
            } else {
                "replaced by a newer plan"
            };
            let note = format!("student product {} is {}", subscription.id, reason);
            self.upcoming
                .void_upcoming_bill_item_with_note(&mut *tx, item, &note, now)
                .await?;
            tx.commit().await?;
            return Ok(ItemOutcome::Voided);
        }
        if subscription.is_paused() {
            debug!(student_product_id = %subscription.id, "Subscription paused, leaving item scheduled");
            return Ok(ItemOutcome::Skipped);
        }

        let product = self.products.get_by_id(&mut *tx, item.product_id).await?;
        let schedule_id = product.billing_schedule_id().ok_or_else(|| {
            BillingError::unbillable(format!("product {} has no billing schedule", item.product_id))
        })?;

        let staged_period = self.periods.get_by_id(&mut *tx, item.billing_schedule_period_id).await?;
        let period = self
            .periods
            .get_period_by_schedule_id_and_start_time_for_update(&mut *tx, schedule_id, staged_period.start_date)
            .await?;
        if period.id != staged_period.id {
            return Err(BillingError::unbillable(format!(
                "period {} is no longer part of schedule {}",
                staged_period.id, schedule_id
            ))
            .into());
        }

        let seed = self
            .bill_items
            .get_latest_bill_item_by_student_product_id_for_update(&mut *tx, subscription.id)
            .await?;

        let windows = if product.disable_pro_rating_flag {
            Windows::default()
        } else {
            self.ratio_windows(&mut *tx, &period, proration_dates(&subscription, &period))
                .await?
        };

        let planned = plan_next_bill_item(GenerationInput {
            seed: &seed,
            subscription: &subscription,
            period: &period,
            start_ratio: windows.start.as_ref(),
            end_ratio: windows.end.as_ref(),
            after_end_ratio: windows.after_end.as_ref(),
            disable_pro_rating: product.disable_pro_rating_flag,
        })?;

        let stored = self.bill_items.create_latest(&mut *tx, &planned.bill_item, now).await?;
        self.copy_children(&mut tx, &seed, &stored, now).await?;

        let outcome = if planned.is_last {
            self.upcoming.set_last_upcoming_bill_item(&mut *tx, item, now).await?;
            ItemOutcome::Last
        } else {
            self.upcoming
                .update_current_upcoming_bill_item_status(&mut *tx, item, now)
                .await?;
            match self
                .periods
                .get_next_billing_schedule_period(&mut *tx, schedule_id, period.end_date)
                .await
            {
                Ok(next) => {
                    self.upcoming.create(&mut *tx, &item.for_next_period(&next, now)).await?;
                }
                Err(e) if e.is_not_found() => {
                    debug!(%schedule_id, "No next period yet, the seed phase stages it later");
                }
                Err(e) => return Err(e),
            }
            ItemOutcome::Generated
        };

        tx.commit().await?;
        debug!(
            sequence = stored.bill_item_sequence_number,
            student_product_id = %subscription.id,
            ?outcome,
            "Generated bill item"
        );
        Ok(outcome)
    }

    /// Locks the windows containing the prorated dates, plus the window after
    /// the end date; a missing window is left for the planner to report
    async fn ratio_windows(
        &self,
        conn: &mut PgConnection,
        period: &BillingSchedulePeriod,
        dates: ProrationDates,
    ) -> Result<Windows, DatabaseError> {
        let mut windows = Windows::default();
        if let Some(start) = dates.start {
            windows.start = found(
                self.ratios
                    .get_first_ratio_by_billing_schedule_period_id_and_from_time(&mut *conn, period.id, start)
                    .await,
            )?;
        }
        if let Some(end) = dates.end {
            windows.end = found(
                self.ratios
                    .get_first_ratio_by_billing_schedule_period_id_and_from_time(&mut *conn, period.id, end)
                    .await,
            )?;
            if let Some(end_window) = &windows.end {
                windows.after_end = found(
                    self.ratios
                        .get_next_ratio_by_billing_schedule_period_id_and_previous(&mut *conn, end_window)
                        .await,
                )?;
            }
        }
        Ok(windows)
    }

    async fn copy_children(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        seed: &BillItem,
        stored: &BillItem,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let courses: Vec<BillItemCourse> = self
            .courses
            .get_by_bill_item_sequence_number(&mut **tx, seed.bill_item_sequence_number)
            .await?
            .into_iter()
            .map(|course| BillItemCourse {
                bill_item_sequence_number: stored.bill_item_sequence_number,
                created_at: now,
                ..course
            })
            .collect();
        self.courses.multi_create(&mut **tx, &courses).await?;

        let categories: Vec<BillItemAccountCategory> = self
            .account_categories
            .get_by_bill_item_sequence_number(&mut **tx, seed.bill_item_sequence_number)
            .await?
            .into_iter()
            .map(|category| BillItemAccountCategory {
                bill_item_sequence_number: stored.bill_item_sequence_number,
                created_at: now,
                ..category
            })
            .collect();
        self.account_categories.multi_create(&mut **tx, &categories).await
    }

    async fn bill_due_items(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
        report: &mut GenerationReport,
    ) -> Result<(), DatabaseError> {
        let items = self
            .bill_items
            .get_billing_items_that_need_to_be_billed(&self.pool, cutoff, self.config.batch_size)
            .await?;

        for item in &items {
            let result = self
                .bill_items
                .update_billing_status_by_sequence_number(
                    &self.pool,
                    item.bill_item_sequence_number,
                    BillingStatus::Pending,
                    BillingStatus::Billed,
                    now,
                )
                .await;
            match result {
                Ok(()) => report.billed += 1,
                Err(e) if e.is_retryable() => {
                    debug!(sequence = item.bill_item_sequence_number, "Bill item changed status concurrently");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(sequence = item.bill_item_sequence_number, error = %e, "Billing bill item failed");
                }
            }
        }
        Ok(())
    }

    async fn stage_next_periods(&self, now: DateTime<Utc>, report: &mut GenerationReport) -> Result<(), DatabaseError> {
        let seeds = self
            .bill_items
            .get_recurring_bill_items_for_scheduled_generation_of_next_bill_items(&self.pool, self.config.batch_size)
            .await?;

        for seed in &seeds {
            match self.stage_from_seed(seed, now).await {
                Ok(true) => report.staged += 1,
                Ok(false) => {}
                Err(e) if matches!(e, DatabaseError::DuplicateEntry(_)) => {
                    debug!(sequence = seed.bill_item_sequence_number, "Next period already staged");
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(sequence = seed.bill_item_sequence_number, error = %e, "Staging next period failed");
                }
            }
        }
        Ok(())
    }

    /// Stages the period after `seed`'s; false when there is nothing to stage
    async fn stage_from_seed(&self, seed: &BillItem, now: DateTime<Utc>) -> Result<bool, DatabaseError> {
        let Some(seed_period_id) = seed.billing_schedule_period_id else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        let product = self.products.get_by_id(&mut *tx, seed.product_id).await?;
        let Some(schedule_id) = product.billing_schedule_id() else {
            return Ok(false);
        };

        let seed_period = self.periods.get_by_id(&mut *tx, seed_period_id).await?;
        let next = match self
            .periods
            .get_next_billing_schedule_period(&mut *tx, schedule_id, seed_period.end_date)
            .await
        {
            Ok(next) => next,
            Err(e) if e.is_not_found() => return Ok(false),
            Err(e) => return Err(e),
        };

        let subscription = self
            .student_products
            .get_by_id_for_update(&mut *tx, seed.student_product_id)
            .await?;
        if !subscription.is_billable() || subscription.ended_before(&next.range()) {
            return Ok(false);
        }

        self.upcoming
            .create(&mut *tx, &UpcomingBillItem::from_seed(seed, &next, now))
            .await?;
        tx.commit().await?;
        Ok(true)
    }
}
