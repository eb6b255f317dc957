//! Billing schedule period repository
//!
//! Periods of one schedule are ordered by `start_date` and never overlap
//! (enforced by an exclusion constraint on non-archived rows). Every query
//! here ignores archived periods except `get_by_id`.
//!
//! Reads made right before a dependent write use the `_for_update` variants,
//! which take `FOR NO KEY UPDATE`.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::{BillingScheduleId, BillingSchedulePeriodId};
use domain_billing::BillingSchedulePeriod;

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! period_columns {
    () => {
        "billing_schedule_period_id, billing_schedule_id, name, start_date, end_date, \
         billing_date, remarks, is_archived, created_at, updated_at"
    };
}

/// Database row for `billing_schedule_period`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingSchedulePeriodRow {
    pub billing_schedule_period_id: Uuid,
    pub billing_schedule_id: Uuid,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub billing_date: DateTime<Utc>,
    pub remarks: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BillingSchedulePeriodRow> for BillingSchedulePeriod {
    fn from(row: BillingSchedulePeriodRow) -> Self {
        Self {
            id: row.billing_schedule_period_id.into(),
            billing_schedule_id: row.billing_schedule_id.into(),
            name: row.name,
            start_date: row.start_date,
            end_date: row.end_date,
            billing_date: row.billing_date,
            remarks: row.remarks,
            is_archived: row.is_archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Stateless repository for billing schedule periods
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingSchedulePeriodRepository;

impl BillingSchedulePeriodRepository {
    /// Inserts a period after checking its own range rules
    ///
    /// # Errors
    ///
    /// - `Domain` if the period is inverted or billed after it ends
    /// - `TemporalOverlap` if it overlaps another period of the schedule
    #[instrument(skip(self, executor, period), fields(billing_schedule_period_id = %period.id))]
    pub async fn create<'e, E>(
        &self,
        executor: E,
        period: &BillingSchedulePeriod,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "BillingSchedulePeriod.create";
        period.validate()?;

        let result = sqlx::query(concat!(
            "INSERT INTO billing_schedule_period (",
            period_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(Uuid::from(period.id))
        .bind(Uuid::from(period.billing_schedule_id))
        .bind(&period.name)
        .bind(period.start_date)
        .bind(period.end_date)
        .bind(period.billing_date)
        .bind(&period.remarks)
        .bind(period.is_archived)
        .bind(period.created_at)
        .bind(period.updated_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created billing schedule period");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(
        &self,
        executor: E,
        id: BillingSchedulePeriodId,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period WHERE billing_schedule_period_id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", id))?;

        Ok(row.into())
    }

    /// The period of `schedule_id` whose `[start_date, end_date]` contains `date`
    ///
    /// # Errors
    ///
    /// `NotFound` when no non-archived period contains the date
    pub async fn get_period_by_schedule_id_and_end_time<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
        date: DateTime<Utc>,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND start_date <= $2 AND end_date >= $2 \
             AND NOT is_archived"
        ))
        .bind(Uuid::from(schedule_id))
        .bind(date)
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_period_by_schedule_id_and_end_time")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", format!("{} at {}", schedule_id, date)))?;

        Ok(row.into())
    }

    /// Same lookup as [`Self::get_period_by_schedule_id_and_end_time`], locked
    pub async fn get_period_by_schedule_id_and_start_time_for_update<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
        date: DateTime<Utc>,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND start_date <= $2 AND end_date >= $2 \
             AND NOT is_archived \
             FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(schedule_id))
        .bind(date)
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_period_by_schedule_id_and_start_time_for_update")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", format!("{} at {}", schedule_id, date)))?;

        Ok(row.into())
    }

    /// The first period starting strictly after `after`
    ///
    /// Rolls a subscription forward one period.
    pub async fn get_next_billing_schedule_period<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
        after: DateTime<Utc>,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND start_date > $2 AND NOT is_archived \
             ORDER BY start_date ASC \
             LIMIT 1"
        ))
        .bind(Uuid::from(schedule_id))
        .bind(after)
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_next_billing_schedule_period")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", format!("{} after {}", schedule_id, after)))?;

        Ok(row.into())
    }

    /// The chronologically last period of a schedule
    pub async fn get_latest_billing_schedule_period<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND NOT is_archived \
             ORDER BY end_date DESC \
             LIMIT 1"
        ))
        .bind(Uuid::from(schedule_id))
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_latest_billing_schedule_period")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", schedule_id))?;

        Ok(row.into())
    }

    /// The last period, locked before a dependent write such as appending the next one
    pub async fn get_latest_period_by_schedule_id_for_update<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
    ) -> Result<BillingSchedulePeriod, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingSchedulePeriodRow = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND NOT is_archived \
             ORDER BY end_date DESC \
             LIMIT 1 \
             FOR NO KEY UPDATE"
        ))
        .bind(Uuid::from(schedule_id))
        .fetch_optional(executor)
        .await
        .during("BillingSchedulePeriod.get_latest_period_by_schedule_id_for_update")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedulePeriod", schedule_id))?;

        Ok(row.into())
    }

    /// All periods of a schedule in calendar order
    pub async fn get_all_by_schedule_id<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
    ) -> Result<Vec<BillingSchedulePeriod>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillingSchedulePeriodRow> = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND NOT is_archived \
             ORDER BY start_date ASC"
        ))
        .bind(Uuid::from(schedule_id))
        .fetch_all(executor)
        .await
        .during("BillingSchedulePeriod.get_all_by_schedule_id")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Periods intersecting `[from, to]`, in calendar order
    pub async fn get_all_by_schedule_id_and_range<'e, E>(
        &self,
        executor: E,
        schedule_id: BillingScheduleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<BillingSchedulePeriod>, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let rows: Vec<BillingSchedulePeriodRow> = sqlx::query_as(concat!(
            "SELECT ",
            period_columns!(),
            " FROM billing_schedule_period \
             WHERE billing_schedule_id = $1 AND start_date <= $3 AND end_date >= $2 \
             AND NOT is_archived \
             ORDER BY start_date ASC"
        ))
        .bind(Uuid::from(schedule_id))
        .bind(from)
        .bind(to)
        .fetch_all(executor)
        .await
        .during("BillingSchedulePeriod.get_all_by_schedule_id_and_range")?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}
