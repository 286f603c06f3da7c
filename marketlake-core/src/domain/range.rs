//! Closed calendar date ranges.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Inclusive `[start, end]` range of calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("range start {start} is after end {end}")]
    Inverted { start: NaiveDate, end: NaiveDate },

    #[error("range {start}..={end} lies entirely in the future (today is {today})")]
    Future {
        start: NaiveDate,
        end: NaiveDate,
        today: NaiveDate,
    },
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RangeError> {
        if start > end {
            return Err(RangeError::Inverted { start, end });
        }
        Ok(Self { start, end })
    }

    /// A one-day range.
    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// The range ending at `end` and reaching `lookback_days` calendar days back.
    ///
    /// Clamps at the earliest representable date instead of overflowing.
    pub fn trailing(end: NaiveDate, lookback_days: u32) -> Self {
        Self {
            start: end
                .checked_sub_signed(Duration::days(i64::from(lookback_days)))
                .unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of calendar days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Reject ranges that are inverted or start after `today`.
    ///
    /// A range that merely ends in the future is allowed; the provider returns
    /// whatever has been published so far.
    pub fn check_fetchable(&self, today: NaiveDate) -> Result<(), RangeError> {
        if self.start > self.end {
            return Err(RangeError::Inverted {
                start: self.start,
                end: self.end,
            });
        }
        if self.start > today {
            return Err(RangeError::Future {
                start: self.start,
                end: self.end,
                today,
            });
        }
        Ok(())
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}..={}", self.start, self.end)
        }
    }
}
