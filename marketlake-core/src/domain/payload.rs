//! Verbatim provider responses.

use super::{DateRange, Symbol};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// The untouched response body of one fetch, plus where and when it came from.
///
/// Payloads are immutable: a re-fetch produces a new payload with a new
/// `fetched_at`, and the archive keeps both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawPayload {
    pub symbol: Symbol,
    /// Range that was requested from the provider.
    pub range: DateRange,
    pub fetched_at: DateTime<Utc>,
    /// Provider identifier, e.g. `polygon/v2`. Selects the decoder.
    pub source: String,
    pub body: Vec<u8>,
}

impl RawPayload {
    /// The run date this payload belongs to (end of the requested range).
    pub fn date(&self) -> NaiveDate {
        self.range.end
    }

    /// BLAKE3 hex digest of the body.
    pub fn content_hash(&self) -> String {
        blake3::hash(&self.body).to_hex().to_string()
    }
}
