//! Student product repository (the subscription ledger)
//!
//! Every mutation after `create` is a compare-and-swap on
//! `version_number`: the statement matches `id = $1 AND version_number = $2`
//! and bumps the version by one. Zero rows affected is reported as a
//! retryable `ConcurrencyConflict`; the caller re-reads and retries.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{LocationId, StudentId, StudentProductId};
use domain_billing::{ProductStatus, StudentProduct, StudentProductLabel};

use crate::enums::{DbApprovalStatus, DbProductStatus, DbStudentProductLabel};
use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! student_product_columns {
    () => {
        "student_product_id, student_id, product_id, location_id, upcoming_billing_date, \
         start_date, end_date, product_status, approval_status, student_product_label, \
         updated_from_student_product_id, updated_to_student_product_id, root_student_product_id, \
         is_associated, is_unique, version_number, created_at, updated_at, deleted_at"
    };
}

/// Database row for `student_product`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct StudentProductRow {
    pub student_product_id: Uuid,
    pub student_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub upcoming_billing_date: Option<DateTime<Utc>>,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub product_status: DbProductStatus,
    pub approval_status: Option<DbApprovalStatus>,
    pub student_product_label: Option<DbStudentProductLabel>,
    pub updated_from_student_product_id: Option<Uuid>,
    pub updated_to_student_product_id: Option<Uuid>,
    pub root_student_product_id: Option<Uuid>,
    pub is_associated: bool,
    pub is_unique: bool,
    pub version_number: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<StudentProductRow> for StudentProduct {
    fn from(row: StudentProductRow) -> Self {
        Self {
            id: row.student_product_id.into(),
            student_id: row.student_id.into(),
            product_id: row.product_id.into(),
            location_id: row.location_id.into(),
            upcoming_billing_date: row.upcoming_billing_date,
            start_date: row.start_date,
            end_date: row.end_date,
            product_status: row.product_status.into(),
            approval_status: row.approval_status.map(Into::into),
            student_product_label: row.student_product_label.map(Into::into),
            updated_from_student_product_id: row.updated_from_student_product_id.map(Into::into),
            updated_to_student_product_id: row.updated_to_student_product_id.map(Into::into),
            root_student_product_id: row.root_student_product_id.map(Into::into),
            is_associated: row.is_associated,
            is_unique: row.is_unique,
            version_number: row.version_number,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

/// Stateless repository for student products
#[derive(Debug, Clone, Copy, Default)]
pub struct StudentProductRepository;

impl StudentProductRepository {
    /// Inserts a subscription with the version it carries (normally 0)
    #[instrument(skip(self, executor, product), fields(student_product_id = %product.id))]
    pub async fn create<'e, E>(&self, executor: E, product: &StudentProduct) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.create";
        let result = sqlx::query(concat!(
            "INSERT INTO student_product (",
            student_product_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)"
        ))
        .bind(Uuid::from(product.id))
        .bind(Uuid::from(product.student_id))
        .bind(Uuid::from(product.product_id))
        .bind(Uuid::from(product.location_id))
        .bind(product.upcoming_billing_date)
        .bind(product.start_date)
        .bind(product.end_date)
        .bind(DbProductStatus::from(product.product_status))
        .bind(product.approval_status.map(DbApprovalStatus::from))
        .bind(product.student_product_label.map(DbStudentProductLabel::from))
        .bind(product.updated_from_student_product_id.map(Uuid::from))
        .bind(product.updated_to_student_product_id.map(Uuid::from))
        .bind(product.root_student_product_id.map(Uuid::from))
        .bind(product.is_associated)
        .bind(product.is_unique)
        .bind(product.version_number)
        .bind(product.created_at)
        .bind(product.updated_at)
        .bind(product.deleted_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created student product");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
    ) -> Result<StudentProduct, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: StudentProductRow = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product WHERE student_product_id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("StudentProduct.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("StudentProduct", id))?;

        Ok(row.into())
    }

    /// Reads and locks a subscription for the rest of the transaction
    pub async fn get_by_id_for_update<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
    ) -> Result<StudentProduct, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: StudentProductRow = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product WHERE student_product_id = $1 FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("StudentProduct.get_by_id_for_update")?
        .ok_or_else(|| DatabaseError::not_found("StudentProduct", id))?;

        Ok(row.into())
    }

    /// Subscriptions with the given ids; missing ids are simply absent
    pub async fn get_by_ids<'e, E>(
        &self,
        executor: E,
        ids: &[StudentProductId],
    ) -> Result<Vec<StudentProduct>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let ids: Vec<Uuid> = ids.iter().copied().map(Uuid::from).collect();
        let rows: Vec<StudentProductRow> = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product WHERE student_product_id = ANY($1) ORDER BY created_at"
        ))
        .bind(ids)
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_by_ids")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Writes every mutable column of `product` under the version check
    ///
    /// # Returns
    ///
    /// The new version number
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if the row is not at `expected_version`
    #[instrument(skip(self, executor, product), fields(student_product_id = %product.id))]
    pub async fn update_with_version_number<'e, E>(
        &self,
        executor: E,
        product: &StudentProduct,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.update_with_version_number";
        let version: Option<i32> = sqlx::query_scalar(
            "UPDATE student_product SET \
                 upcoming_billing_date = $3, start_date = $4, end_date = $5, \
                 product_status = $6, approval_status = $7, student_product_label = $8, \
                 updated_from_student_product_id = $9, updated_to_student_product_id = $10, \
                 root_student_product_id = $11, is_associated = $12, is_unique = $13, \
                 deleted_at = $14, updated_at = $15, version_number = version_number + 1 \
             WHERE student_product_id = $1 AND version_number = $2 \
             RETURNING version_number",
        )
        .bind(Uuid::from(product.id))
        .bind(expected_version)
        .bind(product.upcoming_billing_date)
        .bind(product.start_date)
        .bind(product.end_date)
        .bind(DbProductStatus::from(product.product_status))
        .bind(product.approval_status.map(DbApprovalStatus::from))
        .bind(product.student_product_label.map(DbStudentProductLabel::from))
        .bind(product.updated_from_student_product_id.map(Uuid::from))
        .bind(product.updated_to_student_product_id.map(Uuid::from))
        .bind(product.root_student_product_id.map(Uuid::from))
        .bind(product.is_associated)
        .bind(product.is_unique)
        .bind(product.deleted_at)
        .bind(now)
        .fetch_optional(executor)
        .await
        .during(OP)?;

        let version = version.ok_or_else(|| DatabaseError::stale_version(OP, product.id, expected_version))?;
        debug!(version, "Updated student product");
        Ok(version)
    }

    /// Changes the status and clears the label in one versioned write
    #[instrument(skip(self, executor))]
    pub async fn update_status_student_product_and_reset_student_product_label<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
        status: ProductStatus,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.update_status_student_product_and_reset_student_product_label";
        let version: Option<i32> = sqlx::query_scalar(
            "UPDATE student_product SET \
                 product_status = $3, student_product_label = NULL, updated_at = $4, \
                 version_number = version_number + 1 \
             WHERE student_product_id = $1 AND version_number = $2 \
             RETURNING version_number",
        )
        .bind(Uuid::from(id))
        .bind(expected_version)
        .bind(DbProductStatus::from(status))
        .bind(now)
        .fetch_optional(executor)
        .await
        .during(OP)?;

        let version = version.ok_or_else(|| DatabaseError::stale_version(OP, id, expected_version))?;
        debug!(version, "Updated student product status");
        Ok(version)
    }

    /// Sets or clears the label in one versioned write
    #[instrument(skip(self, executor))]
    pub async fn update_student_product_label<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
        label: Option<StudentProductLabel>,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.update_student_product_label";
        let version: Option<i32> = sqlx::query_scalar(
            "UPDATE student_product SET \
                 student_product_label = $3, updated_at = $4, version_number = version_number + 1 \
             WHERE student_product_id = $1 AND version_number = $2 \
             RETURNING version_number",
        )
        .bind(Uuid::from(id))
        .bind(expected_version)
        .bind(label.map(DbStudentProductLabel::from))
        .bind(now)
        .fetch_optional(executor)
        .await
        .during(OP)?;

        let version = version.ok_or_else(|| DatabaseError::stale_version(OP, id, expected_version))?;
        debug!(version, "Updated student product label");
        Ok(version)
    }

    /// Links `id` forward to the subscription replacing it
    #[instrument(skip(self, executor))]
    pub async fn set_updated_to_student_product_id<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
        updated_to: StudentProductId,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.set_updated_to_student_product_id";
        if id == updated_to {
            return Err(DatabaseError::Domain(domain_billing::BillingError::validation(format!(
                "student product {} cannot supersede itself",
                id
            ))));
        }

        let version: Option<i32> = sqlx::query_scalar(
            "UPDATE student_product SET \
                 updated_to_student_product_id = $3, updated_at = $4, \
                 version_number = version_number + 1 \
             WHERE student_product_id = $1 AND version_number = $2 \
             RETURNING version_number",
        )
        .bind(Uuid::from(id))
        .bind(expected_version)
        .bind(Uuid::from(updated_to))
        .bind(now)
        .fetch_optional(executor)
        .await
        .during(OP)?;

        let version = version.ok_or_else(|| DatabaseError::stale_version(OP, id, expected_version))?;
        debug!(version, "Linked student product to its replacement");
        Ok(version)
    }

    /// Retires a subscription by setting `deleted_at`
    #[instrument(skip(self, executor))]
    pub async fn soft_delete<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
        expected_version: i32,
        now: DateTime<Utc>,
    ) -> Result<i32, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "StudentProduct.soft_delete";
        let version: Option<i32> = sqlx::query_scalar(
            "UPDATE student_product SET \
                 deleted_at = $3, updated_at = $3, version_number = version_number + 1 \
             WHERE student_product_id = $1 AND version_number = $2 AND deleted_at IS NULL \
             RETURNING version_number",
        )
        .bind(Uuid::from(id))
        .bind(expected_version)
        .bind(now)
        .fetch_optional(executor)
        .await
        .during(OP)?;

        let version = version.ok_or_else(|| DatabaseError::stale_version(OP, id, expected_version))?;
        debug!(version, "Soft deleted student product");
        Ok(version)
    }

    /// Recurring subscriptions of a student at a location that billing may charge
    ///
    /// Excludes paused, cancelled and deleted rows, rows that ended before
    /// `now`, and every id in `ignore` (the ones already being replaced, see
    /// [`Self::get_ignore_student_product_id_of_recurring_products_of_student_in_location`]).
    pub async fn get_active_recurring_products_of_student_in_location<'e, E>(
        &self,
        executor: E,
        student_id: StudentId,
        location_id: LocationId,
        ignore: &[StudentProductId],
        now: DateTime<Utc>,
    ) -> Result<Vec<StudentProduct>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let ignore: Vec<Uuid> = ignore.iter().copied().map(Uuid::from).collect();
        let rows: Vec<StudentProductRow> = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product \
             WHERE student_id = $1 AND location_id = $2 \
             AND deleted_at IS NULL \
             AND product_status <> 'CANCELLED' \
             AND student_product_label IS DISTINCT FROM 'PAUSED' \
             AND (end_date IS NULL OR end_date >= $4) \
             AND NOT (student_product_id = ANY($3)) \
             AND product_id IN (SELECT product_id FROM product WHERE billing_schedule_id IS NOT NULL) \
             ORDER BY start_date"
        ))
        .bind(Uuid::from(student_id))
        .bind(Uuid::from(location_id))
        .bind(ignore)
        .bind(now)
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_active_recurring_products_of_student_in_location")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Ids of recurring subscriptions that already point at a replacement
    pub async fn get_ignore_student_product_id_of_recurring_products_of_student_in_location<'e, E>(
        &self,
        executor: E,
        student_id: StudentId,
        location_id: LocationId,
    ) -> Result<Vec<StudentProductId>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT student_product_id FROM student_product \
             WHERE student_id = $1 AND location_id = $2 \
             AND deleted_at IS NULL \
             AND updated_to_student_product_id IS NOT NULL \
             AND product_id IN (SELECT product_id FROM product WHERE billing_schedule_id IS NOT NULL)",
        )
        .bind(Uuid::from(student_id))
        .bind(Uuid::from(location_id))
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_ignore_student_product_id_of_recurring_products_of_student_in_location")?;

        Ok(ids.into_iter().map(Into::into).collect())
    }

    /// Locks every live subscription carrying `label`
    ///
    /// Used by scheduled jobs that process and clear a label exclusively.
    pub async fn get_student_products_by_student_product_label_for_update<'e, E>(
        &self,
        executor: E,
        label: StudentProductLabel,
    ) -> Result<Vec<StudentProduct>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<StudentProductRow> = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product \
             WHERE student_product_label = $1 AND deleted_at IS NULL \
             ORDER BY created_at \
             FOR NO KEY UPDATE"
        ))
        .bind(DbStudentProductLabel::from(label))
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_student_products_by_student_product_label_for_update")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Bundled children grouped under `root_id`
    pub async fn get_student_product_associated_by_root_id<'e, E>(
        &self,
        executor: E,
        root_id: StudentProductId,
    ) -> Result<Vec<StudentProduct>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<StudentProductRow> = sqlx::query_as(concat!(
            "SELECT ",
            student_product_columns!(),
            " FROM student_product \
             WHERE root_student_product_id = $1 AND is_associated AND deleted_at IS NULL \
             ORDER BY created_at"
        ))
        .bind(Uuid::from(root_id))
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_student_product_associated_by_root_id")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// `id` followed by each predecessor it replaced, newest first
    pub async fn get_supersession_chain<'e, E>(
        &self,
        executor: E,
        id: StudentProductId,
    ) -> Result<Vec<StudentProduct>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<StudentProductRow> = sqlx::query_as(concat!(
            "WITH RECURSIVE chain (student_product_id, depth) AS ( \
                 SELECT student_product_id, 0 FROM student_product WHERE student_product_id = $1 \
                 UNION ALL \
                 SELECT p.updated_from_student_product_id, c.depth + 1 \
                 FROM chain c JOIN student_product p ON p.student_product_id = c.student_product_id \
                 WHERE p.updated_from_student_product_id IS NOT NULL AND c.depth < 1000 \
             ) \
             SELECT ",
            student_product_columns!(),
            " FROM student_product JOIN chain USING (student_product_id) \
             ORDER BY chain.depth"
        ))
        .bind(Uuid::from(id))
        .fetch_all(executor)
        .await
        .during("StudentProduct.get_supersession_chain")?;

        if rows.is_empty() {
            return Err(DatabaseError::not_found("StudentProduct", id));
        }
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
