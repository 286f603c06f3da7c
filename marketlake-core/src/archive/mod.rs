//! Append-only raw payload archive.

pub mod fs;

pub use fs::FsArchive;

use crate::domain::RawPayload;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive storage unavailable: {0}")]
    Unavailable(String),

    #[error("archive write failed at {path}: {reason}")]
    Write { path: PathBuf, reason: String },

    #[error("archived object not found: {0}")]
    NotFound(String),

    #[error("archived object {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

impl ArchiveError {
    pub fn code(&self) -> &'static str {
        match self {
            ArchiveError::Unavailable(_) => "unavailable",
            ArchiveError::Write { .. } => "write_failed",
            ArchiveError::NotFound(_) => "not_found",
            ArchiveError::Corrupt { .. } => "corrupt",
        }
    }
}

/// Where an archived payload lives, relative to the archive root.
///
/// Keys look like `polygon/v2/symbol=AAPL/date=2024-01-02/20240102T220000123Z.json`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageLocation(pub String);

impl StorageLocation {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sidecar written next to every archived body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveMeta {
    pub symbol: String,
    pub range_start: NaiveDate,
    pub range_end: NaiveDate,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    pub byte_len: usize,
    /// BLAKE3 hex digest of the body.
    pub content_hash: String,
}

/// Long-term storage for untouched provider responses.
///
/// Implementations must never overwrite an existing object and must keep each
/// (source, symbol, date) partition addressable without scanning the others.
pub trait RawArchive: Send + Sync {
    fn archive(&self, payload: &RawPayload) -> Result<StorageLocation, ArchiveError>;

    /// Objects in one partition, oldest first.
    fn list(
        &self,
        source: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<StorageLocation>, ArchiveError>;

    /// Reload a payload and verify its content hash.
    fn read(&self, location: &StorageLocation) -> Result<RawPayload, ArchiveError>;
}
