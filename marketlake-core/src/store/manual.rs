//! Hand edits to the structured store.
//!
//! Manual records go through the same validation and the same `upsert` as
//! pipeline records, so a later pipeline run simply overwrites a hand fix for
//! the same key (last write wins).

use super::{RecordStore, SyncError};
use crate::domain::{CanonicalRecord, Symbol, UpsertOutcome};
use crate::normalize::check_record;
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;

/// Field-level changes for [`ManualEditor::amend`]. `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPatch {
    pub open: Option<Decimal>,
    pub high: Option<Decimal>,
    pub low: Option<Decimal>,
    pub close: Option<Decimal>,
    pub volume: Option<u64>,
}

impl RecordPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    fn apply(&self, record: &mut CanonicalRecord) {
        if let Some(v) = self.open {
            record.open = v;
        }
        if let Some(v) = self.high {
            record.high = v;
        }
        if let Some(v) = self.low {
            record.low = v;
        }
        if let Some(v) = self.close {
            record.close = v;
        }
        if let Some(v) = self.volume {
            record.volume = v;
        }
    }
}

pub struct ManualEditor {
    store: Arc<dyn RecordStore>,
}

impl ManualEditor {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Write a hand-entered record. Stamps `ingested_at` with the current time.
    pub fn create(&self, mut record: CanonicalRecord) -> Result<UpsertOutcome, SyncError> {
        check_record(&record)?;
        record.ingested_at = Utc::now();
        let outcome = self.store.upsert(&record)?;
        info!(symbol = %record.symbol, date = %record.date, ?outcome, "manual record written");
        Ok(outcome)
    }

    /// Change some fields of an existing record.
    pub fn amend(
        &self,
        symbol: &Symbol,
        date: NaiveDate,
        patch: &RecordPatch,
    ) -> Result<CanonicalRecord, SyncError> {
        let mut record = self
            .store
            .get(symbol, date)?
            .ok_or_else(|| SyncError::NotFound {
                symbol: symbol.clone(),
                date,
            })?;
        patch.apply(&mut record);
        check_record(&record)?;
        record.ingested_at = Utc::now();
        self.store.upsert(&record)?;
        info!(%symbol, %date, "manual record amended");
        Ok(record)
    }

    pub fn delete(&self, symbol: &Symbol, date: NaiveDate) -> Result<(), SyncError> {
        if !self.store.delete(symbol, date)? {
            return Err(SyncError::NotFound {
                symbol: symbol.clone(),
                date,
            });
        }
        info!(%symbol, %date, "manual record deleted");
        Ok(())
    }
}
