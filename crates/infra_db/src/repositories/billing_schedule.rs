//! Billing schedule repository
//!
//! A billing schedule is the named parent of a recurring calendar. Its
//! periods live in [`super::billing_schedule_period`].

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{debug, instrument};
use uuid::Uuid;

use core_kernel::BillingScheduleId;
use domain_billing::BillingSchedule;

use crate::error::{expect_rows, DatabaseError, OperationContext};

macro_rules! billing_schedule_columns {
    () => {
        "billing_schedule_id, name, remarks, is_archived, created_at, updated_at"
    };
}

/// Database row for `billing_schedule`
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct BillingScheduleRow {
    pub billing_schedule_id: Uuid,
    pub name: String,
    pub remarks: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<BillingScheduleRow> for BillingSchedule {
    fn from(row: BillingScheduleRow) -> Self {
        Self {
            id: row.billing_schedule_id.into(),
            name: row.name,
            remarks: row.remarks,
            is_archived: row.is_archived,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Stateless repository for billing schedules
#[derive(Debug, Clone, Copy, Default)]
pub struct BillingScheduleRepository;

impl BillingScheduleRepository {
    /// Inserts a schedule
    ///
    /// # Errors
    ///
    /// - `DuplicateEntry` if the id already exists
    /// - `ConcurrencyConflict` if the insert did not affect exactly one row
    #[instrument(skip(self, executor, schedule), fields(billing_schedule_id = %schedule.id))]
    pub async fn create<'e, E>(&self, executor: E, schedule: &BillingSchedule) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "BillingSchedule.create";
        let result = sqlx::query(concat!(
            "INSERT INTO billing_schedule (",
            billing_schedule_columns!(),
            ") VALUES ($1, $2, $3, $4, $5, $6)"
        ))
        .bind(Uuid::from(schedule.id))
        .bind(&schedule.name)
        .bind(&schedule.remarks)
        .bind(schedule.is_archived)
        .bind(schedule.created_at)
        .bind(schedule.updated_at)
        .execute(executor)
        .await
        .during(OP)?;

        expect_rows(OP, 1, result.rows_affected())?;
        debug!("Created billing schedule");
        Ok(())
    }

    pub async fn get_by_id<'e, E>(
        &self,
        executor: E,
        id: BillingScheduleId,
    ) -> Result<BillingSchedule, DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        let row: BillingScheduleRow = sqlx::query_as(concat!(
            "SELECT ",
            billing_schedule_columns!(),
            " FROM billing_schedule WHERE billing_schedule_id = $1"
        ))
        .bind(Uuid::from(id))
        .fetch_optional(executor)
        .await
        .during("BillingSchedule.get_by_id")?
        .ok_or_else(|| DatabaseError::not_found("BillingSchedule", id))?;

        Ok(row.into())
    }

    /// Archives a schedule; its periods stay readable but the schedule is retired
    #[instrument(skip(self, executor))]
    pub async fn archive<'e, E>(
        &self,
        executor: E,
        id: BillingScheduleId,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError>
    where
        E: PgExecutor<'e>,
    {
        const OP: &str = "BillingSchedule.archive";
        let result = sqlx::query(
            "UPDATE billing_schedule SET is_archived = TRUE, updated_at = $2 \
             WHERE billing_schedule_id = $1",
        )
        .bind(Uuid::from(id))
        .bind(now)
        .execute(executor)
        .await
        .during(OP)?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::not_found("BillingSchedule", id));
        }
        debug!("Archived billing schedule");
        Ok(())
    }
}
