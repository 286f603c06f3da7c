//! Structured store of canonical records keyed by `(symbol, date)`.

pub mod manual;
pub mod sqlite;

pub use manual::{ManualEditor, RecordPatch};
pub use sqlite::SqliteStore;

use crate::domain::{CanonicalRecord, DateRange, Symbol, UpsertOutcome};
use crate::normalize::RejectReason;
use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The store could not be reached or is locked past the busy timeout.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A constraint other than the `(symbol, date)` key rejected the write.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// A stored row could not be read back into a record.
    #[error("corrupt row for {symbol} {date}: {reason}")]
    Corrupt {
        symbol: String,
        date: String,
        reason: String,
    },

    #[error("no record for {symbol} on {date}")]
    NotFound { symbol: Symbol, date: NaiveDate },

    #[error("invalid record: {0}")]
    Invalid(#[from] RejectReason),

    #[error("storage error: {0}")]
    Storage(String),
}

impl SyncError {
    pub fn code(&self) -> &'static str {
        match self {
            SyncError::Unavailable(_) => "unavailable",
            SyncError::Constraint(_) => "constraint",
            SyncError::Corrupt { .. } => "corrupt",
            SyncError::NotFound { .. } => "not_found",
            SyncError::Invalid(_) => "invalid",
            SyncError::Storage(_) => "storage",
        }
    }
}

/// Upsert-by-key store shared by the pipeline and manual edits.
///
/// `upsert` must be atomic per record: concurrent or repeated calls for one
/// key leave exactly one complete row holding the last written values.
pub trait RecordStore: Send + Sync {
    fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, SyncError>;

    fn get(&self, symbol: &Symbol, date: NaiveDate) -> Result<Option<CanonicalRecord>, SyncError>;

    /// Records for one symbol within `range`, ordered by date.
    fn query(&self, symbol: &Symbol, range: &DateRange) -> Result<Vec<CanonicalRecord>, SyncError>;

    /// Remove one record. Returns `false` if nothing was stored under the key.
    fn delete(&self, symbol: &Symbol, date: NaiveDate) -> Result<bool, SyncError>;

    /// Distinct symbols present, sorted.
    fn symbols(&self) -> Result<Vec<Symbol>, SyncError>;

    fn count(&self) -> Result<usize, SyncError>;
}
