//! Polygon.io aggregates adapter (the current provider).
//!
//! Endpoint: `/v2/aggs/ticker/{symbol}/range/1/day/{from}/{to}`. The response
//! carries one row per trading day with single-letter keys; `t` is the bar
//! start in epoch milliseconds (midnight US/Eastern, so the UTC date matches).

use super::client::ProviderAdapter;
use crate::domain::{DateRange, Symbol};
use crate::normalize::{number_field, Decoded, Observation, PayloadDecoder};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

pub const POLYGON_SOURCE: &str = "polygon/v2";
pub const POLYGON_BASE_URL: &str = "https://api.polygon.io";

pub struct PolygonAdapter {
    base_url: String,
    api_key: String,
}

impl PolygonAdapter {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: POLYGON_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl ProviderAdapter for PolygonAdapter {
    fn source(&self) -> &str {
        POLYGON_SOURCE
    }

    fn request_url(&self, symbol: &Symbol, range: &DateRange) -> String {
        format!(
            "{}/v2/aggs/ticker/{symbol}/range/1/day/{}/{}\
             ?adjusted=true&sort=asc&limit=5000&apiKey={}",
            self.base_url, range.start, range.end, self.api_key
        )
    }
}

#[derive(Debug, Deserialize)]
struct AggsResponse {
    ticker: Option<String>,
    status: Option<String>,
    error: Option<String>,
    // Rows stay untyped so one bad row cannot sink the rest of the body.
    #[serde(default)]
    results: Option<Vec<Value>>,
}

/// Decoder for [`POLYGON_SOURCE`] payloads.
pub struct PolygonDecoder;

impl PayloadDecoder for PolygonDecoder {
    fn source(&self) -> &str {
        POLYGON_SOURCE
    }

    fn decode(&self, body: &[u8]) -> Result<Decoded, String> {
        let resp: AggsResponse =
            serde_json::from_slice(body).map_err(|e| format!("invalid aggregates JSON: {e}"))?;

        if let Some(status) = resp.status.as_deref() {
            if status.eq_ignore_ascii_case("ERROR") || status.eq_ignore_ascii_case("NOT_AUTHORIZED")
            {
                let detail = resp.error.unwrap_or_else(|| status.to_string());
                return Err(format!("provider reported {status}: {detail}"));
            }
        }

        let observations = resp
            .results
            .unwrap_or_default()
            .iter()
            .map(|row| Observation {
                date: row
                    .get("t")
                    .and_then(Value::as_i64)
                    .and_then(DateTime::from_timestamp_millis)
                    .map(|dt| dt.date_naive()),
                open: number_field(row.get("o")),
                high: number_field(row.get("h")),
                low: number_field(row.get("l")),
                close: number_field(row.get("c")),
                volume: number_field(row.get("v")),
            })
            .collect();

        Ok(Decoded {
            ticker: resp.ticker,
            observations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn url_contains_range_and_key() {
        let adapter = PolygonAdapter::new("k3y").with_base_url("http://localhost:9000/");
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(),
        )
        .unwrap();
        let url = adapter.request_url(&Symbol::parse("aapl").unwrap(), &range);
        assert_eq!(
            url,
            "http://localhost:9000/v2/aggs/ticker/AAPL/range/1/day/2024-01-02/2024-01-05\
             ?adjusted=true&sort=asc&limit=5000&apiKey=k3y"
        );
    }

    #[test]
    fn decodes_rows_and_ignores_extra_fields() {
        let body = br#"{"ticker":"AAPL","queryCount":1,"results":[
            {"t":1704171600000,"o":185.0,"h":186.2,"l":184.1,"c":185.9,"v":50000000,"n":1,"vw":185.3}
        ],"request_id":"abc"}"#;
        let decoded = PolygonDecoder.decode(body).unwrap();
        assert_eq!(decoded.ticker.as_deref(), Some("AAPL"));
        assert_eq!(decoded.observations.len(), 1);
        let obs = &decoded.observations[0];
        assert_eq!(obs.date, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(obs.high, Some(186.2));
        assert_eq!(obs.volume, Some(50_000_000.0));
    }

    #[test]
    fn missing_results_means_no_rows() {
        let decoded = PolygonDecoder
            .decode(br#"{"ticker":"AAPL","status":"OK","resultsCount":0}"#)
            .unwrap();
        assert!(decoded.observations.is_empty());
    }

    #[test]
    fn missing_keys_become_none() {
        let decoded = PolygonDecoder
            .decode(br#"{"results":[{"t":1704171600000,"o":1.0}]}"#)
            .unwrap();
        assert_eq!(decoded.observations[0].low, None);
    }

    #[test]
    fn wrongly_typed_fields_do_not_fail_the_body() {
        let decoded = PolygonDecoder
            .decode(br#"{"results":[
                {"t":1704171600000,"o":1.0,"h":1.0,"l":1.0,"c":1.0,"v":1},
                {"t":"yesterday","o":"n/a","h":null,"l":1.0,"c":1.0,"v":1},
                "not a row"
            ]}"#)
            .unwrap();
        assert_eq!(decoded.observations.len(), 3);
        let bad = &decoded.observations[1];
        assert_eq!(bad.date, None);
        assert!(bad.open.unwrap().is_nan());
        assert_eq!(bad.high, None);
        assert_eq!(decoded.observations[2], Observation::default());
    }

    #[test]
    fn error_status_is_rejected() {
        let err = PolygonDecoder
            .decode(br#"{"status":"ERROR","error":"Unknown API Key"}"#)
            .unwrap_err();
        assert!(err.contains("Unknown API Key"));
    }
}
