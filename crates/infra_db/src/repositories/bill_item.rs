//! Bill item repository (the bill item ledger)
//!
//! Append-mostly ledger of generated charges. Each subscription has at most
//! one row with `is_latest_bill_item = true`; a partial unique index backs
//! this and [`BillItemRepository::create_latest`] is the only write path
//! that moves the flag forward.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Connection, PgConnection, PgExecutor};
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{OrderId, ProductId, StudentProductId};
use domain_billing::{BillItem, BillingError, BillingStatus, NewBillItem};

use crate::enums::{
    DbBillType, DbBillingApprovalStatus, DbBillingStatus, DbDiscountAmountType, DbTaxCategory,
};
use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! bill_item_insert_columns {
    () => {
        "order_id, student_id, product_id, student_product_id, product_description, \
         product_pricing, discount_id, discount_amount_type, discount_amount_value, \
         tax_id, tax_category, tax_percentage, bill_type, billing_status, \
         billing_date, billing_from, billing_to, billing_schedule_period_id, \
         discount_amount, raw_discount_amount, tax_amount, final_price, price, \
         old_price, adjustment_price, billing_ratio_numerator, billing_ratio_denominator, \
         billing_approval_status, billing_item_description, location_id, location_name, \
         is_latest_bill_item, previous_bill_item_sequence_number, previous_bill_item_status, \
         is_reviewed, created_at, updated_at"
    };
}

macro_rules! bill_item_columns {
    () => {
        concat!("bill_item_sequence_number, ", bill_item_insert_columns!())
    };
}

/// Database row for `bill_item`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillItemRow {
    pub bill_item_sequence_number: i32,
    pub order_id: Uuid,
    pub student_id: Uuid,
    pub product_id: Uuid,
    pub student_product_id: Uuid,
    pub product_description: String,
    pub product_pricing: Decimal,
    pub discount_id: Option<Uuid>,
    pub discount_amount_type: Option<DbDiscountAmountType>,
    pub discount_amount_value: Option<Decimal>,
    pub tax_id: Option<Uuid>,
    pub tax_category: Option<DbTaxCategory>,
    pub tax_percentage: Option<Decimal>,
    pub bill_type: DbBillType,
    pub billing_status: DbBillingStatus,
    pub billing_date: Option<DateTime<Utc>>,
    pub billing_from: Option<DateTime<Utc>>,
    pub billing_to: Option<DateTime<Utc>>,
    pub billing_schedule_period_id: Option<Uuid>,
    pub discount_amount: Option<Decimal>,
    pub raw_discount_amount: Option<Decimal>,
    pub tax_amount: Option<Decimal>,
    pub final_price: Decimal,
    pub price: Decimal,
    pub old_price: Option<Decimal>,
    pub adjustment_price: Option<Decimal>,
    pub billing_ratio_numerator: Option<i32>,
    pub billing_ratio_denominator: Option<i32>,
    pub billing_approval_status: Option<DbBillingApprovalStatus>,
    pub billing_item_description: Option<serde_json::Value>,
    pub location_id: Uuid,
    pub location_name: String,
    pub is_latest_bill_item: bool,
    pub previous_bill_item_sequence_number: Option<i32>,
    pub previous_bill_item_status: Option<DbBillingStatus>,
    pub is_reviewed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BillItemRow> for BillItem {
    fn from(row: BillItemRow) -> Self {
        Self {
            bill_item_sequence_number: row.bill_item_sequence_number,
            order_id: row.order_id.into(),
            student_id: row.student_id.into(),
            product_id: row.product_id.into(),
            student_product_id: row.student_product_id.into(),
            product_description: row.product_description,
            product_pricing: row.product_pricing,
            discount_id: row.discount_id.map(Into::into),
            discount_amount_type: row.discount_amount_type.map(Into::into),
            discount_amount_value: row.discount_amount_value,
            tax_id: row.tax_id.map(Into::into),
            tax_category: row.tax_category.map(Into::into),
            tax_percentage: row.tax_percentage,
            bill_type: row.bill_type.into(),
            billing_status: row.billing_status.into(),
            billing_date: row.billing_date,
            billing_from: row.billing_from,
            billing_to: row.billing_to,
            billing_schedule_period_id: row.billing_schedule_period_id.map(Into::into),
            discount_amount: row.discount_amount,
            raw_discount_amount: row.raw_discount_amount,
            tax_amount: row.tax_amount,
            final_price: row.final_price,
            price: row.price,
            old_price: row.old_price,
            adjustment_price: row.adjustment_price,
            billing_ratio_numerator: row.billing_ratio_numerator,
            billing_ratio_denominator: row.billing_ratio_denominator,
            billing_approval_status: row.billing_approval_status.map(Into::into),
            billing_item_description: row.billing_item_description,
            location_id: row.location_id.into(),
            location_name: row.location_name,
            is_latest_bill_item: row.is_latest_bill_item,
            previous_bill_item_sequence_number: row.previous_bill_item_sequence_number,
            previous_bill_item_status: row.previous_bill_item_status.map(Into::into),
            is_reviewed: row.is_reviewed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Where a new row sits in its subscription's revision chain
#[derive(Debug, Clone, Copy)]
struct Revision {
    is_latest: bool,
    previous: Option<(i32, BillingStatus)>,
}

/// Stateless repository for bill items
#[derive(Debug, Clone, Copy, Default)]
pub struct BillItemRepository;

impl BillItemRepository {
    /// Inserts a non-latest charge
    ///
    /// # Returns
    ///
    /// The sequence number assigned by the ledger
    #[instrument(skip(self, executor, item), fields(student_product_id = %item.student_product_id))]
    pub async fn create<'e, E>(
        &self,
        executor: E,
        item: &NewBillItem,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let sequence = insert(
            executor,
            item,
            Revision {
                is_latest: false,
                previous: None,
            },
            now,
            "BillItem.create",
        )
        .await?;
        debug!(sequence, "Created bill item");
        Ok(sequence)
    }

    /// Writes `item` as its subscription's new latest charge
    ///
    /// Inside one savepoint: locks the current latest row, flips it to
    /// non-latest and inserts `item` pointing back at it. A concurrent
    /// writer blocks on the lock; the partial unique index rejects anything
    /// that slips past.
    ///
    /// # Returns
    ///
    /// The stored row
    #[instrument(skip(self, conn, item), fields(student_product_id = %item.student_product_id))]
    pub async fn create_latest(
        &self,
        conn: &mut PgConnection,
        item: &NewBillItem,
        now: DateTime<Utc>,
    ) -> Result<BillItem, DatabaseError> {
        const OP: &str = "BillItem.create_latest";
        let mut tx = conn.begin().await.during(OP)?;

        let previous = match self
            .get_latest_bill_item_by_student_product_id_for_update(&mut *tx, item.student_product_id)
            .await
        {
            Ok(previous) => Some(previous),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };

        if let Some(previous) = &previous {
            let result = sqlx::query(
                "UPDATE bill_item SET is_latest_bill_item = FALSE, updated_at = $2 \
                 WHERE bill_item_sequence_number = $1 AND is_latest_bill_item",
            )
            .bind(previous.bill_item_sequence_number)
            .bind(now)
            .execute(&mut *tx)
            .await
            .during(OP)?;
            expect_rows(OP, 1, result.rows_affected())?;
        }

        let revision = Revision {
            is_latest: true,
            previous: previous
                .as_ref()
                .map(|p| (p.bill_item_sequence_number, p.billing_status)),
        };
        let sequence = insert(&mut *tx, item, revision, now, OP).await?;
        let stored = self.get_by_sequence_number(&mut *tx, sequence).await?;

        tx.commit().await.during(OP)?;
        debug!(
            sequence,
            previous = ?revision.previous.map(|(seq, _)| seq),
            "Created latest bill item"
        );
        Ok(stored)
    }

    pub async fn get_by_sequence_number<'e, E>(&self, executor: E, sequence: i32) -> Result<BillItem, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillItemRow = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item WHERE bill_item_sequence_number = $1"
        ))
        .bind(sequence)
        .fetch_optional(executor)
        .await
        .during("BillItem.get_by_sequence_number")?
        .ok_or_else(|| DatabaseError::not_found("BillItem", sequence))?;

        Ok(row.into())
    }

    /// The subscription's latest row, locked
    pub async fn get_latest_bill_item_by_student_product_id_for_update<'e, E>(
        &self,
        executor: E,
        student_product_id: StudentProductId,
    ) -> Result<BillItem, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillItemRow = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE student_product_id = $1 AND is_latest_bill_item \
             FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(student_product_id))
        .fetch_optional(executor)
        .await
        .during("BillItem.get_latest_bill_item_by_student_product_id_for_update")?
        .ok_or_else(|| DatabaseError::not_found("BillItem", format!("latest of {}", student_product_id)))?;

        Ok(row.into())
    }

    /// Clears the latest flag of a subscription's rows
    ///
    /// Only safe inside the transaction that inserts the replacement; see
    /// [`Self::create_latest`].
    #[instrument(skip(self, executor))]
    pub async fn set_non_latest_bill_item_by_student_product_id<'e, E>(
        &self,
        executor: E,
        student_product_id: StudentProductId,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE bill_item SET is_latest_bill_item = FALSE, updated_at = $2 \
             WHERE student_product_id = $1 AND is_latest_bill_item",
        )
        .bind(Uuid::from(student_product_id))
        .bind(now)
        .execute(executor)
        .await
        .during("BillItem.set_non_latest_bill_item_by_student_product_id")?;

        Ok(result.rows_affected())
    }

    /// One page of an order's charges in ledger order
    pub async fn get_bill_items_by_order_id_and_paging<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item WHERE order_id = $1 \
             ORDER BY bill_item_sequence_number ASC \
             LIMIT $2 OFFSET $3"
        ))
        .bind(Uuid::from(order_id))
        .bind(limit)
        .bind(offset)
        .fetch_all(executor)
        .await
        .during("BillItem.get_bill_items_by_order_id_and_paging")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Recurring charges of one product of an order, by billing date
    pub async fn get_recurring_bill_items_by_order_id_and_product_id<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        product_id: ProductId,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE order_id = $1 AND product_id = $2 AND billing_schedule_period_id IS NOT NULL \
             ORDER BY billing_date ASC"
        ))
        .bind(Uuid::from(order_id))
        .bind(Uuid::from(product_id))
        .fetch_all(executor)
        .await
        .during("BillItem.get_recurring_bill_items_by_order_id_and_product_id")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Moves one charge from `from` to `to`
    ///
    /// # Errors
    ///
    /// - `Domain` if the transition table forbids `from -> to`
    /// - `ConcurrencyConflict` if the row is no longer in `from`
    #[instrument(skip(self, executor))]
    pub async fn update_billing_status_by_sequence_number<'e, E>(
        &self,
        executor: E,
        sequence: i32,
        from: BillingStatus,
        to: BillingStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "BillItem.update_billing_status_by_sequence_number";
        if !from.can_transition_to(to) {
            return Err(BillingError::invalid_transition("bill item", from, to).into());
        }

        let result = sqlx::query(
            "UPDATE bill_item SET billing_status = $3, updated_at = $4 \
             WHERE bill_item_sequence_number = $1 AND billing_status = $2",
        )
        .bind(sequence)
        .bind(DbBillingStatus::from(from))
        .bind(DbBillingStatus::from(to))
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Updated bill item status");
        Ok(())
    }

    /// Voids every charge of an order that can still be voided
    ///
    /// # Returns
    ///
    /// The number of rows voided
    #[instrument(skip(self, executor))]
    pub async fn void_bill_item_by_order_id<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE bill_item SET billing_status = 'VOIDED', updated_at = $2 \
             WHERE order_id = $1 \
             AND billing_status IN ('PENDING', 'WAITING_APPROVAL', 'BILLED', 'INVOICED')",
        )
        .bind(Uuid::from(order_id))
        .bind(now)
        .execute(executor)
        .await
        .during("BillItem.void_bill_item_by_order_id")?;

        debug!(voided = result.rows_affected(), "Voided bill items of order");
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, executor))]
    pub async fn update_review_flag_by_order_id<'e, E>(
        &self,
        executor: E,
        order_id: OrderId,
        is_reviewed: bool,
        now: DateTime<Utc>,
    ) -> Result<u64, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE bill_item SET is_reviewed = $2, updated_at = $3 WHERE order_id = $1",
        )
        .bind(Uuid::from(order_id))
        .bind(is_reviewed)
        .bind(now)
        .execute(executor)
        .await
        .during("BillItem.update_review_flag_by_order_id")?;

        Ok(result.rows_affected())
    }

    /// Pending charges whose billing date has arrived
    ///
    /// Ordered by subscription, then oldest billing date first.
    pub async fn get_billing_items_that_need_to_be_billed<'e, E>(
        &self,
        executor: E,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE billing_status = 'PENDING' AND billing_date <= $1 \
             ORDER BY student_product_id, billing_date ASC \
             LIMIT $2"
        ))
        .bind(cutoff)
        .bind(limit)
        .fetch_all(executor)
        .await
        .during("BillItem.get_billing_items_that_need_to_be_billed")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Seeds for staging the next period: one latest recurring charge per
    /// `(order, product)` whose subscription is still running, has not been
    /// replaced by a newer plan and has nothing scheduled in the queue
    ///
    /// A period after the seed's that was staged and then voided is not
    /// staged again here.
    pub async fn get_recurring_bill_items_for_scheduled_generation_of_next_bill_items<'e, E>(
        &self,
        executor: E,
        limit: i64,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT DISTINCT ON (order_id, product_id) ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE is_latest_bill_item \
             AND billing_schedule_period_id IS NOT NULL \
             AND billing_status NOT IN ('CANCELLED', 'VOIDED') \
             AND EXISTS ( \
                 SELECT 1 FROM student_product sp \
                 WHERE sp.student_product_id = bill_item.student_product_id \
                 AND sp.deleted_at IS NULL \
                 AND sp.product_status <> 'CANCELLED' \
                 AND sp.updated_to_student_product_id IS NULL \
                 AND (sp.end_date IS NULL OR sp.end_date > bill_item.billing_to) \
             ) \
             AND NOT EXISTS ( \
                 SELECT 1 FROM upcoming_bill_item u \
                 WHERE u.student_product_id = bill_item.student_product_id \
                 AND ( \
                     (NOT u.is_generated AND u.deleted_at IS NULL) \
                     OR (u.deleted_at IS NOT NULL AND u.billing_date > bill_item.billing_date) \
                 ) \
             ) \
             ORDER BY order_id, product_id, billing_date DESC \
             LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(executor)
        .await
        .during("BillItem.get_recurring_bill_items_for_scheduled_generation_of_next_bill_items")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Charges of a subscription whose service window has not ended by `now`
    pub async fn get_present_and_future_bill_items_for_student_product<'e, E>(
        &self,
        executor: E,
        student_product_id: StudentProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE student_product_id = $1 AND (billing_to IS NULL OR billing_to >= $2) \
             ORDER BY billing_from ASC NULLS FIRST, bill_item_sequence_number ASC"
        ))
        .bind(Uuid::from(student_product_id))
        .bind(now)
        .fetch_all(executor)
        .await
        .during("BillItem.get_present_and_future_bill_items_for_student_product")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Charges of a subscription whose service window ended before `now`
    pub async fn get_past_bill_items_for_student_product<'e, E>(
        &self,
        executor: E,
        student_product_id: StudentProductId,
        now: DateTime<Utc>,
    ) -> Result<Vec<BillItem>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillItemRow> = sqlx::query_as(concat!(
            "SELECT ",
            bill_item_columns!(),
            " FROM bill_item \
             WHERE student_product_id = $1 AND billing_to < $2 \
             ORDER BY billing_from ASC, bill_item_sequence_number ASC"
        ))
        .bind(Uuid::from(student_product_id))
        .bind(now)
        .fetch_all(executor)
        .await
        .during("BillItem.get_past_bill_items_for_student_product")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

async fn insert<'e, E>(
    executor: E,
    item: &NewBillItem,
    revision: Revision,
    now: DateTime<Utc>,
    operation: &str,
) -> Result<i32, DatabaseError>
where
    E: PgExecutor<'e>,
{
    let sequence: i32 = sqlx::query_scalar(concat!(
        "INSERT INTO bill_item (",
        bill_item_insert_columns!(),
        ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, \
         $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31, $32, $33, $34, $35, $36, $37) \
         RETURNING bill_item_sequence_number"
    ))
    .bind(Uuid::from(item.order_id))
    .bind(Uuid::from(item.student_id))
    .bind(Uuid::from(item.product_id))
    .bind(Uuid::from(item.student_product_id))
    .bind(&item.product_description)
    .bind(item.product_pricing)
    .bind(item.discount_id.map(Uuid::from))
    .bind(item.discount_amount_type.map(DbDiscountAmountType::from))
    .bind(item.discount_amount_value)
    .bind(item.tax_id.map(Uuid::from))
    .bind(item.tax_category.map(DbTaxCategory::from))
    .bind(item.tax_percentage)
    .bind(DbBillType::from(item.bill_type))
    .bind(DbBillingStatus::from(item.billing_status))
    .bind(item.billing_date)
    .bind(item.billing_from)
    .bind(item.billing_to)
    .bind(item.billing_schedule_period_id.map(Uuid::from))
    .bind(item.discount_amount)
    .bind(item.raw_discount_amount)
    .bind(item.tax_amount)
    .bind(item.final_price)
    .bind(item.price)
    .bind(item.old_price)
    .bind(item.adjustment_price)
    .bind(item.billing_ratio_numerator)
    .bind(item.billing_ratio_denominator)
    .bind(item.billing_approval_status.map(DbBillingApprovalStatus::from))
    .bind(&item.billing_item_description)
    .bind(Uuid::from(item.location_id))
    .bind(&item.location_name)
    .bind(revision.is_latest)
    .bind(revision.previous.map(|(sequence, _)| sequence))
    .bind(revision.previous.map(|(_, status)| DbBillingStatus::from(status)))
    .bind(item.is_reviewed)
    .bind(now)
    .bind(now)
    .fetch_one(executor)
    .await
    .during(operation)?;

    Ok(sequence)
}
