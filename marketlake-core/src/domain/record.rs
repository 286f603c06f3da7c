//! Canonical daily observations and upsert outcomes.

use super::Symbol;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One trading day for one symbol, independent of the provider it came from.
///
/// `(symbol, date)` is the deduplication key in the structured store. Records
/// produced by the normalizer always satisfy `low <= open, close <= high`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub symbol: Symbol,
    pub date: NaiveDate,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: u64,
    pub ingested_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// True when every OHLC relation holds.
    pub fn is_ordered(&self) -> bool {
        self.low <= self.high
            && self.low <= self.open
            && self.open <= self.high
            && self.low <= self.close
            && self.close <= self.high
    }
}

/// What an upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}
