//! Observation validation and rejection reasons.

use super::Observation;
use crate::domain::{CanonicalRecord, DateRange, Symbol};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Why an observation was excluded from sync.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    #[error("required field '{field}' is missing")]
    MissingField { field: &'static str },

    #[error("field '{field}' is not a finite number")]
    NonFinite { field: &'static str },

    #[error("field '{field}' must be positive, got {value}")]
    NonPositivePrice { field: &'static str, value: Decimal },

    #[error("OHLC out of order: open {open}, high {high}, low {low}, close {close}")]
    OhlcOrder {
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
    },

    #[error("volume must be non-negative, got {volume}")]
    NegativeVolume { volume: f64 },

    #[error("date {date} is outside the requested range {range}")]
    OutOfRange { date: NaiveDate, range: DateRange },

    #[error("payload is for '{declared}', not the requested symbol")]
    SymbolMismatch { declared: String },

    #[error("observation repeats a date already present in this payload")]
    DuplicateDate,

    #[error("payload could not be decoded: {detail}")]
    MalformedPayload { detail: String },

    #[error("no decoder registered for source '{source_id}'")]
    UnknownSource { source_id: String },
}

impl RejectReason {
    /// Stable machine-readable code for summaries and logs.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::MissingField { .. } => "missing_field",
            RejectReason::NonFinite { .. } => "non_finite",
            RejectReason::NonPositivePrice { .. } => "non_positive_price",
            RejectReason::OhlcOrder { .. } => "ohlc_order",
            RejectReason::NegativeVolume { .. } => "negative_volume",
            RejectReason::OutOfRange { .. } => "out_of_range",
            RejectReason::SymbolMismatch { .. } => "symbol_mismatch",
            RejectReason::DuplicateDate => "duplicate_date",
            RejectReason::MalformedPayload { .. } => "malformed_payload",
            RejectReason::UnknownSource { .. } => "unknown_source",
        }
    }
}

/// A rejected observation (or a whole rejected payload when `date` is `None`).
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub symbol: Symbol,
    pub date: Option<NaiveDate>,
    pub reason: RejectReason,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.date {
            Some(date) => write!(f, "{} {date}: {}", self.symbol, self.reason),
            None => write!(f, "{}: {}", self.symbol, self.reason),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        self.reason.code()
    }
}

fn price(field: &'static str, value: Option<f64>) -> Result<Decimal, RejectReason> {
    let raw = value.ok_or(RejectReason::MissingField { field })?;
    if !raw.is_finite() {
        return Err(RejectReason::NonFinite { field });
    }
    // Shortest round-trip text keeps 185.9 as 185.9 rather than its binary expansion.
    let dec = Decimal::from_str(&raw.to_string()).map_err(|_| RejectReason::NonFinite { field })?;
    if dec <= Decimal::ZERO {
        return Err(RejectReason::NonPositivePrice { field, value: dec });
    }
    Ok(dec)
}

fn volume(value: Option<f64>) -> Result<u64, RejectReason> {
    let raw = value.ok_or(RejectReason::MissingField { field: "volume" })?;
    if !raw.is_finite() {
        return Err(RejectReason::NonFinite { field: "volume" });
    }
    if raw < 0.0 {
        return Err(RejectReason::NegativeVolume { volume: raw });
    }
    // Providers report share counts as JSON numbers; fractional lots are truncated.
    Ok(raw.trunc() as u64)
}

/// OHLC ordering and positivity for an already-typed record.
///
/// Shared by the normalizer and manual edits so both write paths enforce the
/// same rules.
pub fn check_record(record: &CanonicalRecord) -> Result<(), RejectReason> {
    for (field, value) in [
        ("open", record.open),
        ("high", record.high),
        ("low", record.low),
        ("close", record.close),
    ] {
        if value <= Decimal::ZERO {
            return Err(RejectReason::NonPositivePrice { field, value });
        }
    }
    if !record.is_ordered() {
        return Err(RejectReason::OhlcOrder {
            open: record.open,
            high: record.high,
            low: record.low,
            close: record.close,
        });
    }
    Ok(())
}

/// Turn one decoded observation into a canonical record, or explain why not.
pub fn validate_observation(
    symbol: &Symbol,
    range: &DateRange,
    obs: &Observation,
    ingested_at: DateTime<Utc>,
) -> Result<CanonicalRecord, ValidationError> {
    let reject = |reason: RejectReason| ValidationError {
        symbol: symbol.clone(),
        date: obs.date,
        reason,
    };

    let date = obs
        .date
        .ok_or(RejectReason::MissingField { field: "date" })
        .map_err(reject)?;
    if !range.contains(date) {
        return Err(reject(RejectReason::OutOfRange {
            date,
            range: *range,
        }));
    }

    let record = CanonicalRecord {
        symbol: symbol.clone(),
        date,
        open: price("open", obs.open).map_err(reject)?,
        high: price("high", obs.high).map_err(reject)?,
        low: price("low", obs.low).map_err(reject)?,
        close: price("close", obs.close).map_err(reject)?,
        volume: volume(obs.volume).map_err(reject)?,
        ingested_at,
    };
    check_record(&record).map_err(reject)?;
    Ok(record)
}
