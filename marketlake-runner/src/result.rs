//! Per-symbol outcomes and the run summary.

use chrono::{DateTime, NaiveDate, Utc};
use marketlake_core::archive::StorageLocation;
use marketlake_core::DateRange;
use serde::{Deserialize, Serialize};

/// Final status of one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    PartiallyFailed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            RunStatus::Succeeded => "succeeded",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Failed => "failed",
        })
    }
}

/// Pipeline step an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Fetch,
    Archive,
    Normalize,
    Sync,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Stage::Fetch => "fetch",
            Stage::Archive => "archive",
            Stage::Normalize => "normalize",
            Stage::Sync => "sync",
        })
    }
}

/// Counters for one unit, or summed over a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCounts {
    /// Observations in the fetched payload, accepted or not.
    pub fetched: usize,
    /// Payloads written to the raw archive.
    pub archived: usize,
    pub inserted: usize,
    pub updated: usize,
    pub skipped_invalid: usize,
    pub sync_failed: usize,
}

impl UnitCounts {
    pub fn synced(&self) -> usize {
        self.inserted + self.updated
    }

    pub fn add(&mut self, other: &UnitCounts) {
        self.fetched += other.fetched;
        self.archived += other.archived;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped_invalid += other.skipped_invalid;
        self.sync_failed += other.sync_failed;
    }
}

/// One error recorded against a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDescriptor {
    pub stage: Stage,
    /// Machine-readable code, e.g. `permanent`, `ohlc_order`, `unavailable`.
    pub code: String,
    pub message: String,
    /// Observation date, when the error concerns a single record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

impl ErrorDescriptor {
    pub fn new(stage: Stage, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            code: code.into(),
            message: message.into(),
            date: None,
        }
    }

    pub fn on(mut self, date: Option<NaiveDate>) -> Self {
        self.date = date;
        self
    }
}

/// Outcome of one symbol over one run's date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub symbol: String,
    /// `None` when the symbol was rejected before a range was built.
    pub range: Option<DateRange>,
    pub status: RunStatus,
    pub counts: UnitCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_location: Option<StorageLocation>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorDescriptor>,
    pub elapsed_ms: u64,
}

impl RunResult {
    pub fn has_error(&self, stage: Stage) -> bool {
        self.errors.iter().any(|e| e.stage == stage)
    }
}

/// Everything a run produced, one [`RunResult`] per requested symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// BLAKE3 of the run date, symbol list and start time (first 16 hex chars).
    pub run_id: String,
    pub run_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub totals: UnitCounts,
    pub results: Vec<RunResult>,
}

impl RunSummary {
    pub fn new(
        run_date: NaiveDate,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        results: Vec<RunResult>,
    ) -> Self {
        let mut totals = UnitCounts::default();
        for r in &results {
            totals.add(&r.counts);
        }
        let mut hasher = blake3::Hasher::new();
        hasher.update(run_date.to_string().as_bytes());
        for r in &results {
            hasher.update(b"\0");
            hasher.update(r.symbol.as_bytes());
        }
        hasher.update(started_at.to_rfc3339().as_bytes());
        let run_id = hasher.finalize().to_hex()[..16].to_string();

        Self {
            run_id,
            run_date,
            started_at,
            finished_at,
            totals,
            results,
        }
    }

    pub fn count(&self, status: RunStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    pub fn failed_symbols(&self) -> Vec<&str> {
        self.symbols_with(RunStatus::Failed)
    }

    pub fn degraded_symbols(&self) -> Vec<&str> {
        self.symbols_with(RunStatus::PartiallyFailed)
    }

    fn symbols_with(&self, status: RunStatus) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.status == status)
            .map(|r| r.symbol.as_str())
            .collect()
    }

    /// True when every unit succeeded.
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|r| r.status == RunStatus::Succeeded)
    }

    pub fn result(&self, symbol: &str) -> Option<&RunResult> {
        self.results.iter().find(|r| r.symbol == symbol)
    }
}
