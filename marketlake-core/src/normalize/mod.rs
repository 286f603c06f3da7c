//! Provider JSON → canonical records.
//!
//! Each provider registers a [`PayloadDecoder`] under its source id. Decoders
//! only pull fields out of the provider schema; every validation rule lives in
//! [`validate`] so all providers are held to the same standard.

pub mod validate;

pub use validate::{check_record, validate_observation, RejectReason, ValidationError};

use crate::domain::{CanonicalRecord, RawPayload};
use crate::fetch::{PolygonDecoder, YahooDecoder};
use chrono::NaiveDate;
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// One provider row with every field optional; absence is a validation concern.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Observation {
    pub date: Option<NaiveDate>,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

/// Read one numeric provider field without failing the whole body.
///
/// Absent or `null` is `None` (a missing field). A value of the wrong JSON
/// type becomes NaN, so validation rejects that row alone as non-finite.
pub fn number_field(value: Option<&Value>) -> Option<f64> {
    match value {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_f64().unwrap_or(f64::NAN)),
    }
}

/// What a decoder extracted from a body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decoded {
    /// Ticker the provider says the payload is for, when it says so.
    pub ticker: Option<String>,
    pub observations: Vec<Observation>,
}

/// Provider-specific body parser.
pub trait PayloadDecoder: Send + Sync {
    fn source(&self) -> &str;

    /// Parse a response body. `Err` carries a human-readable reason.
    fn decode(&self, body: &[u8]) -> Result<Decoded, String>;
}

/// Output of normalizing one payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Normalized {
    pub records: Vec<CanonicalRecord>,
    pub rejections: Vec<ValidationError>,
}

impl Normalized {
    /// Number of observations the payload carried (accepted + rejected).
    pub fn observed(&self) -> usize {
        self.records.len() + self.rejections.len()
    }
}

/// Registry of decoders plus the shared validation pass.
pub struct Normalizer {
    decoders: HashMap<String, Box<dyn PayloadDecoder>>,
}

impl Normalizer {
    /// A normalizer with no decoders.
    pub fn empty() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Decoders for every built-in provider.
    pub fn with_default_decoders() -> Self {
        let mut n = Self::empty();
        n.register(Box::new(PolygonDecoder));
        n.register(Box::new(YahooDecoder));
        n
    }

    pub fn register(&mut self, decoder: Box<dyn PayloadDecoder>) {
        self.decoders.insert(decoder.source().to_string(), decoder);
    }

    /// Decode and validate a payload. Pure in the payload: `ingested_at` is
    /// the payload's `fetched_at`, so the same payload always yields the same
    /// result.
    pub fn normalize(&self, payload: &RawPayload) -> Normalized {
        let whole_payload = |reason: RejectReason| Normalized {
            records: Vec::new(),
            rejections: vec![ValidationError {
                symbol: payload.symbol.clone(),
                date: None,
                reason,
            }],
        };

        let Some(decoder) = self.decoders.get(&payload.source) else {
            return whole_payload(RejectReason::UnknownSource {
                source_id: payload.source.clone(),
            });
        };

        let decoded = match decoder.decode(&payload.body) {
            Ok(decoded) => decoded,
            Err(detail) => return whole_payload(RejectReason::MalformedPayload { detail }),
        };

        if let Some(declared) = decoded.ticker.as_deref() {
            if !declared.eq_ignore_ascii_case(payload.symbol.as_str()) {
                let mismatch = || RejectReason::SymbolMismatch {
                    declared: declared.to_string(),
                };
                if decoded.observations.is_empty() {
                    return whole_payload(mismatch());
                }
                return Normalized {
                    records: Vec::new(),
                    rejections: decoded
                        .observations
                        .iter()
                        .map(|obs| ValidationError {
                            symbol: payload.symbol.clone(),
                            date: obs.date,
                            reason: mismatch(),
                        })
                        .collect(),
                };
            }
        }

        let mut out = Normalized::default();
        let mut seen: HashSet<NaiveDate> = HashSet::new();

        for obs in &decoded.observations {
            match validate_observation(&payload.symbol, &payload.range, obs, payload.fetched_at) {
                Ok(record) => {
                    if seen.insert(record.date) {
                        out.records.push(record);
                    } else {
                        out.rejections.push(ValidationError {
                            symbol: payload.symbol.clone(),
                            date: Some(record.date),
                            reason: RejectReason::DuplicateDate,
                        });
                    }
                }
                Err(rejection) => out.rejections.push(rejection),
            }
        }

        out
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::with_default_decoders()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DateRange, Symbol};
    use crate::fetch::POLYGON_SOURCE;
    use chrono::DateTime;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn payload(source: &str, body: &str, range: DateRange) -> RawPayload {
        RawPayload {
            symbol: Symbol::parse("AAPL").unwrap(),
            range,
            fetched_at: DateTime::from_timestamp(1_704_240_000, 0).unwrap(),
            source: source.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    // 2024-01-02 05:00 UTC and 2024-01-03 05:00 UTC
    const TWO_DAYS: &str = r#"{
        "ticker": "AAPL", "status": "OK", "resultsCount": 2,
        "results": [
            {"t": 1704171600000, "o": 185.0, "h": 186.2, "l": 184.1, "c": 185.9, "v": 50000000, "vw": 185.4},
            {"t": 1704258000000, "o": 184.2, "h": 185.9, "l": 183.4, "c": 184.3, "v": 58414460}
        ]
    }"#;

    #[test]
    fn polygon_payload_normalizes() {
        let n = Normalizer::with_default_decoders();
        let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 3)).unwrap();
        let out = n.normalize(&payload(POLYGON_SOURCE, TWO_DAYS, range));
        assert!(out.rejections.is_empty(), "{:?}", out.rejections);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].date, d(2024, 1, 2));
        assert_eq!(out.records[0].volume, 50_000_000);
        assert_eq!(out.records[0].ingested_at.timestamp(), 1_704_240_000);
    }

    #[test]
    fn out_of_range_rows_are_rejected_not_fatal() {
        let n = Normalizer::with_default_decoders();
        let out = n.normalize(&payload(POLYGON_SOURCE, TWO_DAYS, DateRange::single(d(2024, 1, 2))));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.rejections.len(), 1);
        assert_eq!(out.rejections[0].code(), "out_of_range");
        assert_eq!(out.observed(), 2);
    }

    #[test]
    fn unknown_source_rejects_payload() {
        let n = Normalizer::with_default_decoders();
        let out = n.normalize(&payload("alphavantage/v1", "{}", DateRange::single(d(2024, 1, 2))));
        assert!(out.records.is_empty());
        assert_eq!(out.rejections.len(), 1);
        assert_eq!(out.rejections[0].code(), "unknown_source");
        assert_eq!(out.rejections[0].date, None);
    }

    #[test]
    fn garbage_body_is_malformed() {
        let n = Normalizer::with_default_decoders();
        let out = n.normalize(&payload(POLYGON_SOURCE, "<html>", DateRange::single(d(2024, 1, 2))));
        assert_eq!(out.rejections[0].code(), "malformed_payload");
    }

    #[test]
    fn ticker_mismatch_rejects_every_row() {
        let n = Normalizer::with_default_decoders();
        let body = TWO_DAYS.replace("\"AAPL\"", "\"MSFT\"");
        let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 3)).unwrap();
        let out = n.normalize(&payload(POLYGON_SOURCE, &body, range));
        assert!(out.records.is_empty());
        assert_eq!(out.rejections.len(), 2);
        assert!(out.rejections.iter().all(|r| r.code() == "symbol_mismatch"));
    }

    #[test]
    fn mismatched_empty_payload_is_still_rejected() {
        let n = Normalizer::with_default_decoders();
        let body = r#"{"ticker":"MSFT","status":"OK","resultsCount":0}"#;
        let out = n.normalize(&payload(POLYGON_SOURCE, body, DateRange::single(d(2024, 1, 2))));
        assert!(out.records.is_empty());
        assert_eq!(out.rejections.len(), 1);
        assert_eq!(out.rejections[0].code(), "symbol_mismatch");
        assert_eq!(out.rejections[0].date, None);
    }

    #[test]
    fn ill_typed_row_is_rejected_alone() {
        let body = r#"{"ticker":"AAPL","results":[
            {"t": 1704171600000, "o": 185.0, "h": 186.2, "l": 184.1, "c": 185.9, "v": 50000000},
            {"t": 1704258000000, "o": "n/a", "h": 185.9, "l": 183.4, "c": 184.3, "v": 58414460},
            {"t": 1704344400000, "o": 182.1, "h": 183.1, "l": 180.9, "c": 181.9, "v": 71983570}
        ]}"#;
        let n = Normalizer::with_default_decoders();
        let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 4)).unwrap();
        let out = n.normalize(&payload(POLYGON_SOURCE, body, range));
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].date, d(2024, 1, 2));
        assert_eq!(out.records[1].date, d(2024, 1, 4));
        assert_eq!(out.rejections.len(), 1);
        assert_eq!(out.rejections[0].code(), "non_finite");
        assert_eq!(out.rejections[0].date, Some(d(2024, 1, 3)));
    }

    #[test]
    fn number_field_distinguishes_missing_from_ill_typed() {
        use serde_json::json;
        assert_eq!(number_field(None), None);
        assert_eq!(number_field(Some(&Value::Null)), None);
        assert_eq!(number_field(Some(&json!(12))), Some(12.0));
        assert!(number_field(Some(&json!("12"))).unwrap().is_nan());
        assert!(number_field(Some(&json!({"v": 1}))).unwrap().is_nan());
    }

    #[test]
    fn duplicate_dates_keep_first() {
        let body = r#"{"ticker":"AAPL","results":[
            {"t": 1704171600000, "o": 1.0, "h": 2.0, "l": 0.5, "c": 1.5, "v": 10},
            {"t": 1704171600000, "o": 9.0, "h": 9.0, "l": 9.0, "c": 9.0, "v": 10}
        ]}"#;
        let n = Normalizer::with_default_decoders();
        let out = n.normalize(&payload(POLYGON_SOURCE, body, DateRange::single(d(2024, 1, 2))));
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].volume, 10);
        assert_eq!(out.rejections[0].code(), "duplicate_date");
    }

    #[test]
    fn normalization_is_deterministic() {
        let n = Normalizer::with_default_decoders();
        let range = DateRange::new(d(2024, 1, 2), d(2024, 1, 3)).unwrap();
        let p = payload(POLYGON_SOURCE, TWO_DAYS, range);
        assert_eq!(n.normalize(&p), n.normalize(&p));
    }
}
