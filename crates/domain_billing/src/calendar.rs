//! Billing calendar
//!
//! A billing schedule owns an ordered list of periods. Each period is a closed
//! range `[start_date, end_date]` with the date on which its charge is billed.
//!
//! # Invariants
//!
//! - non-archived periods of one schedule are ordered by `start_date`
//! - they never overlap and leave no gap larger than one day
//! - a date belongs to at most one non-archived period
//! - a period is billed no later than it ends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{BillingScheduleId, BillingSchedulePeriodId, DateRange};
use crate::error::BillingError;

/// A recurring invoicing calendar (e.g. "Monthly 2024")
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSchedule {
    pub id: BillingScheduleId,
    pub name: String,
    pub remarks: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One invoicing window of a billing schedule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingSchedulePeriod {
    pub id: BillingSchedulePeriodId,
    pub billing_schedule_id: BillingScheduleId,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub billing_date: DateTime<Utc>,
    pub remarks: Option<String>,
    pub is_archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BillingSchedulePeriod {
    /// The closed range covered by this period
    pub fn range(&self) -> DateRange {
        DateRange {
            start: self.start_date,
            end: self.end_date,
        }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.range().contains(instant)
    }

    /// Checks the per-row rules: a non-inverted range, billed no later than it ends
    pub fn validate(&self) -> Result<(), BillingError> {
        DateRange::new(self.start_date, self.end_date)?;
        if self.billing_date > self.end_date {
            return Err(BillingError::validation(format!(
                "period {} is billed on {} after it ends on {}",
                self.id, self.billing_date, self.end_date
            )));
        }
        Ok(())
    }
}

/// The non-archived periods of one schedule, in calendar order
///
/// Mirrors the period queries of the database layer so the batch job and
/// tests can reason about a calendar without a connection.
#[derive(Debug, Clone)]
pub struct BillingCalendar {
    schedule_id: BillingScheduleId,
    periods: Vec<BillingSchedulePeriod>,
}

impl BillingCalendar {
    /// Builds a calendar, dropping archived periods and validating the rest
    ///
    /// # Errors
    ///
    /// - `Validation` if a period belongs to another schedule or is billed after it ends
    /// - `InvalidCalendar` if the periods overlap or leave a gap
    pub fn new(
        schedule_id: BillingScheduleId,
        periods: impl IntoIterator<Item = BillingSchedulePeriod>,
    ) -> Result<Self, BillingError> {
        let mut periods: Vec<_> = periods.into_iter().filter(|p| !p.is_archived).collect();

        for period in &periods {
            if period.billing_schedule_id != schedule_id {
                return Err(BillingError::validation(format!(
                    "period {} belongs to schedule {}, not {}",
                    period.id, period.billing_schedule_id, schedule_id
                )));
            }
            period.validate()?;
        }

        periods.sort_by_key(|p| p.start_date);
        let ranges: Vec<DateRange> = periods.iter().map(BillingSchedulePeriod::range).collect();
        DateRange::validate_sequence(&ranges)?;

        Ok(Self { schedule_id, periods })
    }

    pub fn schedule_id(&self) -> BillingScheduleId {
        self.schedule_id
    }

    pub fn periods(&self) -> &[BillingSchedulePeriod] {
        &self.periods
    }

    /// The period whose `[start_date, end_date]` contains `instant`
    pub fn period_containing(&self, instant: DateTime<Utc>) -> Option<&BillingSchedulePeriod> {
        self.periods.iter().find(|p| p.contains(instant))
    }

    /// Like [`Self::period_containing`] but reports the miss as an error
    pub fn require_period_containing(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<&BillingSchedulePeriod, BillingError> {
        self.period_containing(instant).ok_or_else(|| {
            BillingError::PeriodNotFound(format!(
                "schedule {} has no period containing {}",
                self.schedule_id, instant
            ))
        })
    }

    /// The first period starting strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<&BillingSchedulePeriod> {
        self.periods.iter().find(|p| p.start_date > after)
    }

    /// The chronologically last period
    pub fn latest(&self) -> Option<&BillingSchedulePeriod> {
        self.periods.last()
    }

    /// Periods intersecting `[from, to]`
    pub fn between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> impl Iterator<Item = &BillingSchedulePeriod> {
        self.periods
            .iter()
            .filter(move |p| p.start_date <= to && p.end_date >= from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn period(schedule: BillingScheduleId, start: (u32, u32), end: (u32, u32)) -> BillingSchedulePeriod {
        let start_date = Utc.with_ymd_and_hms(2024, start.0, start.1, 0, 0, 0).unwrap();
        let end_date = Utc.with_ymd_and_hms(2024, end.0, end.1, 23, 59, 59).unwrap();
        BillingSchedulePeriod {
            id: BillingSchedulePeriodId::new(),
            billing_schedule_id: schedule,
            name: format!("{}-{}", start.0, start.1),
            start_date,
            end_date,
            billing_date: start_date,
            remarks: None,
            is_archived: false,
            created_at: start_date,
            updated_at: start_date,
        }
    }

    #[test]
    fn test_archived_periods_are_ignored() {
        let schedule = BillingScheduleId::new();
        let mut archived = period(schedule, (1, 10), (2, 10));
        archived.is_archived = true;

        let calendar = BillingCalendar::new(
            schedule,
            vec![period(schedule, (1, 1), (1, 31)), archived, period(schedule, (2, 1), (2, 29))],
        )
        .unwrap();

        assert_eq!(calendar.periods().len(), 2);
    }

    #[test]
    fn test_foreign_period_rejected() {
        let schedule = BillingScheduleId::new();
        let other = BillingScheduleId::new();
        let result = BillingCalendar::new(schedule, vec![period(other, (1, 1), (1, 31))]);
        assert!(matches!(result, Err(BillingError::Validation(_))));
    }
}
