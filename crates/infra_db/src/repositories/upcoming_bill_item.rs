//! Upcoming bill item repository (the upcoming-charge queue)
//!
//! Rows are keyed by `(order_id, product_id, billing_schedule_period_id)`
//! among live rows. A row leaves the scheduled state exactly once: either
//! `is_generated` is set or `deleted_at` is. Every transition statement
//! matches on `NOT is_generated AND deleted_at IS NULL`, so a transition on a
//! terminal row affects nothing and is reported as a conflict.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{BillingSchedulePeriodId, OrderId, ProductId, StudentProductId};
use domain_billing::{UpcomingBillItem, LAST_BILL_ITEM_NOTE};

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! upcoming_columns {
    () => {
        "order_id, product_id, student_product_id, product_description, discount_id, tax_id, \
         billing_schedule_period_id, billing_date, is_generated, execute_note, \
         created_at, updated_at, deleted_at"
    };
}

/// Database row for `upcoming_bill_item`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UpcomingBillItemRow {
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub student_product_id: Uuid,
    pub product_description: String,
    pub discount_id: Option<Uuid>,
    pub tax_id: Option<Uuid>,
    pub billing_schedule_period_id: Uuid,
    pub billing_date: DateTime<Utc>,
    pub is_generated: bool,
    pub execute_note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<UpcomingBillItemRow> for UpcomingBillItem {
    fn from(row: UpcomingBillItemRow) -> Self {
        Self {
            order_id: row.order_id.into(),
            product_id: row.product_id.into(),
            student_product_id: row.student_product_id.into(),
            product_description: row.product_description,
            discount_id: row.discount_id.map(Into::into),
            tax_id: row.tax_id.map(Into::into),
            billing_schedule_period_id: row.billing_schedule_period_id.into(),
            billing_date: row.billing_date,
            is_generated: row.is_generated,
            execute_note: row.execute_note,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Stateless repository for the upcoming-charge queue
#[derive(Debug, Clone, Copy, Default)]
pub struct UpcomingBillItemRepository;

impl UpcomingBillItemRepository {
    /// Stages a charge
    ///
    /// # Errors
    ///
    /// `DuplicateEntry` if a live row with the same key already exists
    #[instrument(
        skip(self, executor, item),
        fields(order_id = %item.order_id, product_id = %item.product_id, period_id = %item.billing_schedule_period_id)
    )]
    pub async fn create<'e, E>(&self, executor: E, item: &UpcomingBillItem) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "UpcomingBillItem.create";
        let result = sqlx::query(concat!(
            "INSERT INTO upcoming_bill_item (",
            upcoming_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(Uuid::from(item.order_id))
        .bind(Uuid::from(item.product_id))
        .bind(Uuid::from(item.student_product_id))
        .bind(&item.product_description)
        .bind(item.discount_id.map(Uuid::from))
        .bind(item.tax_id.map(Uuid::from))
        .bind(Uuid::from(item.billing_schedule_period_id))
        .bind(item.billing_date)
        .bind(item.is_generated)
        .bind(&item.execute_note)
        .bind(item.created_at)
        .bind(item.updated_at)
        .bind(item.deleted_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Staged upcoming bill item");
        Ok(())
    }

    /// The most recent row with this key, live or not
    pub async fn get_by_key<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        product_id: ProductId,
        period_id: BillingSchedulePeriodId,
    ) -> Result<UpcomingBillItem, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: UpcomingBillItemRow = sqlx::query_as(concat!(
            "SELECT ",
            upcoming_columns!(),
            " FROM upcoming_bill_item \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id = $3 \
             ORDER BY (deleted_at IS NULL) DESC, created_at DESC \
             LIMIT 1"
        ))
        .bind(Uuid::from(order_id))
        .bind(Uuid::from(product_id))
        .bind(Uuid::from(period_id))
        .fetch_optional(executor)
        .await
        .during("UpcomingBillItem.get_by_key")?
        .ok_or_else(|| {
            DatabaseError::not_found("UpcomingBillItem", format!("{}/{}/{}", order_id, product_id, period_id))
        })?;

        Ok(row.into())
    }

    /// Scheduled items whose billing date is on or before `cutoff`
    ///
    /// Newest billing date first; a caller wanting the most overdue items
    /// first re-sorts the batch.
    pub async fn get_upcoming_bill_items_for_generate<'e, E>(
        &self,
        executor: E,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<UpcomingBillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<UpcomingBillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            upcoming_columns!(),
            " FROM upcoming_bill_item \
             WHERE NOT is_generated AND deleted_at IS NULL AND billing_date <= $1 \
             ORDER BY billing_date DESC \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
        .during("UpcomingBillItem.get_upcoming_bill_items_for_generate")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Voids the scheduled rows of a replaced plan
    ///
    /// # Returns
    ///
    /// Every voided row, so the caller can re-stage corrected entries for the
    /// same periods; empty when nothing was scheduled
    #[instrument(skip(self, executor))]
    pub async fn remove_old_upcoming_bill_item<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        product_id: ProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<UpcomingBillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<UpcomingBillItemRow> = sqlx::query_as(concat!(
            "UPDATE upcoming_bill_item SET deleted_at = $3, updated_at = $3 \
             WHERE order_id = $1 AND product_id = $2 AND NOT is_generated AND deleted_at IS NULL \
             RETURNING ",
            upcoming_columns!()
        ))
        .bind(Uuid::from(order_id))
        .bind(Uuid::from(product_id))
        .bind(now)
        .fetch_all(executor)
        .await
        .during("UpcomingBillItem.remove_old_upcoming_bill_item")?;

        debug!(removed = rows.len(), "Removed old upcoming bill items");
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Voids one scheduled row that can never be generated, keeping the reason
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if the row was already generated or voided
    #[instrument(skip(self, executor, item), fields(order_id = %item.order_id, product_id = %item.product_id))]
    pub async fn void_upcoming_bill_item_with_note<'e, E>(
        &self,
        executor: E,
        item: &UpcomingBillItem,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "UpcomingBillItem.void_upcoming_bill_item_with_note";
        let result = sqlx::query(
            "UPDATE upcoming_bill_item SET execute_note = $4, deleted_at = $5, updated_at = $5 \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id = $3 \
             AND NOT is_generated AND deleted_at IS NULL",
        )
        .bind(Uuid::from(item.order_id))
        .bind(Uuid::from(item.product_id))
        .bind(Uuid::from(item.billing_schedule_period_id))
        .bind(note)
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Voided unbillable upcoming bill item");
        Ok(())
    }

    /// Records why generating `item` failed; the row stays scheduled
    #[instrument(skip(self, executor, item), fields(order_id = %item.order_id, product_id = %item.product_id))]
    pub async fn add_upcoming_execute_note<'e, E>(
        &self,
        executor: E,
        item: &UpcomingBillItem,
        note: &str,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "UpcomingBillItem.add_upcoming_execute_note";
        let result = sqlx::query(
            "UPDATE upcoming_bill_item SET execute_note = $4, updated_at = $5 \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id = $3 \
             AND NOT is_generated AND deleted_at IS NULL",
        )
        .bind(Uuid::from(item.order_id))
        .bind(Uuid::from(item.product_id))
        .bind(Uuid::from(item.billing_schedule_period_id))
        .bind(note)
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())
    }

    /// Marks exactly the targeted scheduled row generated
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if the row was already generated or voided
    #[instrument(skip(self, executor, item), fields(order_id = %item.order_id, product_id = %item.product_id))]
    pub async fn update_current_upcoming_bill_item_status<'e, E>(
        &self,
        executor: E,
        item: &UpcomingBillItem,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "UpcomingBillItem.update_current_upcoming_bill_item_status";
        let result = sqlx::query(
            "UPDATE upcoming_bill_item SET is_generated = TRUE, updated_at = $4 \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id = $3 \
             AND NOT is_generated AND deleted_at IS NULL",
        )
        .bind(Uuid::from(item.order_id))
        .bind(Uuid::from(item.product_id))
        .bind(Uuid::from(item.billing_schedule_period_id))
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Marked upcoming bill item generated");
        Ok(())
    }

    /// Marks the row generated and tags it as the subscription's final charge
    #[instrument(skip(self, executor, item), fields(order_id = %item.order_id, product_id = %item.product_id))]
    pub async fn set_last_upcoming_bill_item<'e, E>(
        &self,
        executor: E,
        item: &UpcomingBillItem,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "UpcomingBillItem.set_last_upcoming_bill_item";
        let result = sqlx::query(
            "UPDATE upcoming_bill_item SET is_generated = TRUE, execute_note = $4, updated_at = $5 \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id = $3 \
             AND NOT is_generated AND deleted_at IS NULL",
        )
        .bind(Uuid::from(item.order_id))
        .bind(Uuid::from(item.product_id))
        .bind(Uuid::from(item.billing_schedule_period_id))
        .bind(LAST_BILL_ITEM_NOTE)
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Marked last upcoming bill item");
        Ok(())
    }

    /// Voids every scheduled row of an order; generated rows are untouched
    ///
    /// # Returns
    ///
    /// The number of rows voided
    #[instrument(skip(self, executor))]
    pub async fn void_upcoming_bill_items_by_order_id<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE upcoming_bill_item SET deleted_at = $2, updated_at = $2 \
             WHERE order_id = $1 AND NOT is_generated AND deleted_at IS NULL",
        )
        .bind(Uuid::from(order_id))
        .bind(now)
        .execute(executor)
        .await
        .during("UpcomingBillItem.void_upcoming_bill_items_by_order_id")?;

        debug!(voided = result.rows_affected(), "Voided upcoming bill items of order");
        Ok(result.rows_affected())
    }

    /// The newest live row of a subscription
    pub async fn get_latest_by_student_product_id<'e, E>(
        &self,
        executor: E,
        student_product_id: StudentProductId,
    ) -> Result<UpcomingBillItem, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: UpcomingBillItemRow = sqlx::query_as(concat!(
            "SELECT ",
            upcoming_columns!(),
            " FROM upcoming_bill_item \
             WHERE student_product_id = $1 AND deleted_at IS NULL \
             ORDER BY billing_date DESC, created_at DESC \
             LIMIT 1"
        ))
        .bind(Uuid::from(student_product_id))
        .fetch_optional(executor)
        .await
        .during("UpcomingBillItem.get_latest_by_student_product_id")?
        .ok_or_else(|| DatabaseError::not_found("UpcomingBillItem", student_product_id))?;

        Ok(row.into())
    }
}
