//! Billing time ranges
//!
//! Billing schedule periods and billing ratio windows are closed timestamp
//! ranges `[start, end]` stored as `timestamptz`. This module provides the
//! range type together with the ordering checks a billing calendar relies on:
//! - ranges of one calendar never overlap
//! - consecutive ranges leave no gap larger than one day
//!
//! Batch sweeps decide what is "due" relative to the end of the current day
//! in the operating timezone, which is what [`Timezone`] provides.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use std::str::FromStr;

/// Timezone wrapper for the billing operator's country
///
/// Wraps chrono_tz::Tz with custom serialization support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timezone(pub Tz);

impl Serialize for Timezone {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.name())
    }
}

impl<'de> Deserialize<'de> for Timezone {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl FromStr for Timezone {
    type Err = TemporalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tz::from_str(s)
            .map(Timezone)
            .map_err(|_| TemporalError::UnknownTimezone(s.to_string()))
    }
}

impl Timezone {
    pub fn new(tz: Tz) -> Self {
        Self(tz)
    }

    /// Returns the calendar date of `instant` in this timezone
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.0).date_naive()
    }

    /// Gets the start of day (00:00:00) in this timezone as UTC
    ///
    /// Returns `None` when the local midnight does not exist (DST gap).
    pub fn start_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_opt(0, 0, 0)?
            .and_local_timezone(self.0)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Gets the end of day (23:59:59.999999999) in this timezone as UTC
    pub fn end_of_day(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        date.and_hms_nano_opt(23, 59, 59, 999_999_999)?
            .and_local_timezone(self.0)
            .latest()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The cutoff a sweep running at `now` uses for "due today":
    /// the last instant of the local calendar day containing `now`.
    pub fn due_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.end_of_day(self.local_date(now)).unwrap_or(now)
    }
}

impl Default for Timezone {
    fn default() -> Self {
        Self(chrono_tz::UTC)
    }
}

/// Errors related to temporal operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Invalid range: start {start} must not be after end {end}")]
    InvalidRange {
        start: String,
        end: String,
    },

    #[error("Ranges overlap: {0}")]
    RangesOverlap(String),

    #[error("Gap in sequence: {0}")]
    GapInSequence(String),

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// A closed timestamp range `[start, end]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TemporalError> {
        if start > end {
            return Err(TemporalError::InvalidRange {
                start: start.to_rfc3339(),
                end: end.to_rfc3339(),
            });
        }
        Ok(Self { start, end })
    }

    /// Both bounds are inclusive
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    /// Returns true when `other` lies entirely within this range
    pub fn encloses(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Number of calendar days touched by the range, counting both ends
    pub fn days(&self) -> i64 {
        (self.end.date_naive() - self.start.date_naive()).num_days() + 1
    }

    /// Returns this range cut off at `end`, or `None` if `end` is before the start
    pub fn clip_end(&self, end: DateTime<Utc>) -> Option<DateRange> {
        if end < self.start {
            return None;
        }
        Some(DateRange {
            start: self.start,
            end: end.min(self.end),
        })
    }

    /// Checks that `ranges`, taken in order, are strictly ascending, pairwise
    /// disjoint and contiguous: the next range starts no later than one day
    /// after the previous one ends.
    pub fn validate_sequence(ranges: &[DateRange]) -> Result<(), TemporalError> {
        for pair in ranges.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if next.start <= prev.end {
                return Err(TemporalError::RangesOverlap(format!(
                    "{} starts before {} ends",
                    next.start.to_rfc3339(),
                    prev.end.to_rfc3339()
                )));
            }
            if next.start - prev.end > Duration::days(1) {
                return Err(TemporalError::GapInSequence(format!(
                    "{} .. {}",
                    prev.end.to_rfc3339(),
                    next.start.to_rfc3339()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_range_contains_both_ends() {
        let range = DateRange::new(at(2024, 1, 1), at(2024, 1, 31)).unwrap();
        assert!(range.contains(at(2024, 1, 1)));
        assert!(range.contains(at(2024, 1, 31)));
        assert!(!range.contains(at(2024, 2, 1)));
    }

    #[test]
    fn test_range_overlap() {
        let jan = DateRange::new(at(2024, 1, 1), at(2024, 1, 31)).unwrap();
        let mid = DateRange::new(at(2024, 1, 15), at(2024, 2, 15)).unwrap();
        let feb = DateRange::new(at(2024, 2, 1), at(2024, 2, 29)).unwrap();

        assert!(jan.overlaps(&mid));
        assert!(!jan.overlaps(&feb));
    }

    #[test]
    fn test_due_cutoff_uses_local_day() {
        let tz: Timezone = "Asia/Tokyo".parse().unwrap();
        // 2024-01-10 16:00 UTC is already 2024-01-11 01:00 in Tokyo
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 16, 0, 0).unwrap();
        let cutoff = tz.due_cutoff(now);
        assert_eq!(tz.local_date(cutoff), NaiveDate::from_ymd_opt(2024, 1, 11).unwrap());
    }
}
