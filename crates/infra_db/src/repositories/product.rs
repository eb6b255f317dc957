//! Product repository
//!
//! Products are reference data owned elsewhere; billing only needs to know
//! which schedule a recurring product follows and whether it is prorated.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{BillingScheduleId, ProductId};

use crate::error::{expect_rows, DatabaseError, OperationContext};

/// Product type
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "product_type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductType {
    RecurringFee,
    OneTimeFee,
    RecurringMaterial,
    OneTimeMaterial,
    Package,
}

/// Database row for `product`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProductRow {
    pub product_id: Uuid,
    pub name: String,
    pub product_type: ProductType,
    pub billing_schedule_id: Option<Uuid>,
    pub disable_pro_rating_flag: bool,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProductRow {
    /// The schedule of a recurring product; one-time products have none
    pub fn billing_schedule_id(&self) -> Option<BillingScheduleId> {
        self.billing_schedule_id.map(Into::into)
    }
}

/// Stateless repository for products
#[derive(Debug, Clone, Copy, Default)]
pub struct ProductRepository;

impl ProductRepository {
    #[instrument(skip(self, executor, product), fields(product_id = %product.product_id))]
    pub async fn create<'e, E>(&self, executor: E, product: &ProductRow) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "Product.create";
        let result = sqlx::query(
            "INSERT INTO product (product_id, name, product_type, billing_schedule_id, \
             disable_pro_rating_flag, is_archived, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(product.product_id)
        .bind(&product.name)
        .bind(product.product_type)
        .bind(product.billing_schedule_id)
        .bind(product.disable_pro_rating_flag)
        .bind(product.is_archived)
        .bind(product.created_at)
        .bind(product.updated_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created product");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(&self, executor: E, id: ProductId) -> Result<ProductRow, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            "SELECT product_id, name, product_type, billing_schedule_id, disable_pro_rating_flag, \
             is_archived, created_at, updated_at \
             FROM product WHERE product_id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("Product.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("Product", id))
    }
}
