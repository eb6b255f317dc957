//! Billing ratio repository
//!
//! Ratio windows prorate the first or last partial period of a
//! subscription. Proration is always computed right before writing the bill
//! item that depends on it, so both lookups lock the window they return.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{BillingRatioId, BillingSchedulePeriodId};
use domain_billing::BillingRatio;

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! ratio_columns {
    () => {
        "billing_ratio_id, billing_schedule_period_id, start_date, end_date, \
         billing_ratio_numerator, billing_ratio_denominator, is_archived, created_at, updated_at"
    };
}

/// Database row for `billing_ratio`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingRatioRow {
    pub billing_ratio_id: Uuid,
    pub billing_schedule_period_id: Uuid,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub billing_ratio_numerator: i32,
    pub billing_ratio_denominator: i32,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BillingRatioRow> for BillingRatio {
    fn from(row: BillingRatioRow) -> Self {
        Self {
            id: row.billing_ratio_id.into(),
            billing_schedule_period_id: row.billing_schedule_period_id.into(),
            start_date: row.start_date,
            end_date: row.end_date,
            billing_ratio_numerator: row.billing_ratio_numerator,
            billing_ratio_denominator: row.billing_ratio_denominator,
            is_archived: row.is_archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Stateless repository for billing ratio windows
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingRatioRepository;

impl BillingRatioRepository {
    /// Inserts a ratio window
    ///
    /// # Errors
    ///
    /// - `Domain` if the fraction is outside `0 < numerator <= denominator`
    /// - `TemporalOverlap` if it overlaps another window of the period
    #[instrument(skip(self, executor, ratio), fields(billing_ratio_id = %ratio.id))]
    pub async fn create<'e, E>(&self, executor: E, ratio: &BillingRatio) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "BillingRatio.create";
        ratio.validate()?;

        let result = sqlx::query(concat!(
            "INSERT INTO billing_ratio (",
            ratio_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"
        ))
        .bind(Uuid::from(ratio.id))
        .bind(Uuid::from(ratio.billing_schedule_period_id))
        .bind(ratio.start_date)
        .bind(ratio.end_date)
        .bind(ratio.billing_ratio_numerator)
        .bind(ratio.billing_ratio_denominator)
        .bind(ratio.is_archived)
        .bind(ratio.created_at)
        .bind(ratio.updated_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created billing ratio");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(&self, executor: E, id: BillingRatioId) -> Result<BillingRatio, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingRatioRow = sqlx::query_as(concat!(
            "SELECT ",
            ratio_columns!(),
            " FROM billing_ratio WHERE billing_ratio_id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("BillingRatio.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("BillingRatio", id))?;

        Ok(row.into())
    }

    /// Non-archived windows of a period ordered by start date
    pub async fn get_all_by_period_id<'e, E>(
        &self,
        executor: E,
        period_id: BillingSchedulePeriodId,
    ) -> Result<Vec<BillingRatio>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillingRatioRow> = sqlx::query_as(concat!(
            "SELECT ",
            ratio_columns!(),
            " FROM billing_ratio \
             WHERE billing_schedule_period_id = $1 AND NOT is_archived \
             ORDER BY start_date ASC"
        ))
        .bind(Uuid::from(period_id))
        .fetch_all(executor)
        .await
        .during("BillingRatio.get_all_by_period_id")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// The window of `period_id` containing `from`, locked
    ///
    /// # Errors
    ///
    /// `NotFound` when no non-archived window contains the date
    pub async fn get_first_ratio_by_billing_schedule_period_id_and_from_time<'e, E>(
        &self,
        executor: E,
        period_id: BillingSchedulePeriodId,
        from: DateTime<Utc>,
    ) -> Result<BillingRatio, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingRatioRow = sqlx::query_as(concat!(
            "SELECT ",
            ratio_columns!(),
            " FROM billing_ratio \
             WHERE billing_schedule_period_id = $1 AND start_date <= $2 AND end_date >= $2 \
             AND NOT is_archived \
             ORDER BY start_date ASC \
             LIMIT 1 \
             FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(period_id))
        .bind(from)
        .fetch_optional(executor)
        .await
        .during("BillingRatio.get_first_ratio_by_billing_schedule_period_id_and_from_time")?
        .ok_or_else(|| DatabaseError::not_found("BillingRatio", format!("{} at {}", period_id, from)))?;

        Ok(row.into())
    }

    /// The window starting strictly after `previous` ends, locked
    pub async fn get_next_ratio_by_billing_schedule_period_id_and_previous<'e, E>(
        &self,
        executor: E,
        previous: &BillingRatio,
    ) -> Result<BillingRatio, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingRatioRow = sqlx::query_as(concat!(
            "SELECT ",
            ratio_columns!(),
            " FROM billing_ratio \
             WHERE billing_schedule_period_id = $1 AND start_date > $2 AND NOT is_archived \
             ORDER BY start_date ASC \
             LIMIT 1 \
             FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(previous.billing_schedule_period_id))
        .bind(previous.end_date)
        .fetch_optional(executor)
        .await
        .during("BillingRatio.get_next_ratio_by_billing_schedule_period_id_and_previous")?
        .ok_or_else(|| DatabaseError::not_found("BillingRatio", format!("after {}", previous.id)))?;

        Ok(row.into())
    }
}
