//! Order repository
//!
//! Orders are the parent of upcoming and generated charges. Only the fields
//! voiding needs are modelled.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::OrderId;

use crate::error::{expect_rows, DatabaseError, OperationContext};

/// Order status
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    Pending,
    Rejected,
    Voided,
    Invoiced,
}

/// Database row for `orders`
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OrderRow {
    pub order_id: Uuid,
    pub student_id: Uuid,
    pub location_id: Uuid,
    pub order_status: OrderStatus,
    pub order_comment: Option<String>,
    pub is_reviewed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stateless repository for orders
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderRepository;

impl OrderRepository {
    #[instrument(skip(self, executor, order), fields(order_id = %order.order_id))]
    pub async fn create<'e, E>(&self, executor: E, order: &OrderRow) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "Order.create";
        let result = sqlx::query(
            "INSERT INTO orders (order_id, student_id, location_id, order_status, order_comment, \
             is_reviewed, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(order.order_id)
        .bind(order.student_id)
        .bind(order.location_id)
        .bind(order.order_status)
        .bind(&order.order_comment)
        .bind(order.is_reviewed)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created order");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(&self, executor: E, id: OrderId) -> Result<OrderRow, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        sqlx::query_as(
            "SELECT order_id, student_id, location_id, order_status, order_comment, is_reviewed, \
             created_at, updated_at \
             FROM orders WHERE order_id = $1",
        )
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("Order.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("Order", id))
    }

    /// Sets the status of one order; both values are bound parameters
    #[instrument(skip(self, executor))]
    pub async fn update_order_status<'e, E>(
        &self,
        executor: E,
        id: OrderId,
        status: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "Order.update_order_status";
        let result = sqlx::query("UPDATE orders SET order_status = $2, updated_at = $3 WHERE order_id = $1")
            .bind(Uuid::from(id))
            .bind(status)
            .bind(now)
            .execute(executor)
            .await
            .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Updated order status");
        Ok(())
    }
}
