//! Yahoo Finance v8 chart adapter (the previous provider).
//!
//! Yahoo has no official API and is subject to unannounced format changes, so
//! the decoder is lenient about optional sections and strict only about the
//! parallel arrays lining up.

use super::client::ProviderAdapter;
use crate::domain::{DateRange, Symbol};
use crate::normalize::{number_field, Decoded, Observation, PayloadDecoder};
use chrono::DateTime;
use serde::Deserialize;
use serde_json::Value;

pub const YAHOO_SOURCE: &str = "yahoo/v8";
pub const YAHOO_BASE_URL: &str = "https://query2.finance.yahoo.com";
/// Yahoo rejects requests without a browser-like user agent.
pub const YAHOO_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

pub struct YahooAdapter {
    base_url: String,
}

impl YahooAdapter {
    pub fn new() -> Self {
        Self {
            base_url: YAHOO_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

impl Default for YahooAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderAdapter for YahooAdapter {
    fn source(&self) -> &str {
        YAHOO_SOURCE
    }

    fn request_url(&self, symbol: &Symbol, range: &DateRange) -> String {
        let start_ts = range.start.and_hms_opt(0, 0, 0).map_or(0, |t| t.and_utc().timestamp());
        let end_ts = range
            .end
            .and_hms_opt(23, 59, 59)
            .map_or(0, |t| t.and_utc().timestamp());
        format!(
            "{}/v8/finance/chart/{symbol}?period1={start_ts}&period2={end_ts}&interval=1d",
            self.base_url
        )
    }
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<Value>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct ChartMeta {
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

/// Parallel per-day arrays, kept untyped so a stray string fails one row only.
#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Value>,
    #[serde(default)]
    high: Vec<Value>,
    #[serde(default)]
    low: Vec<Value>,
    #[serde(default)]
    close: Vec<Value>,
    #[serde(default)]
    volume: Vec<Value>,
}

/// Decoder for [`YAHOO_SOURCE`] payloads.
pub struct YahooDecoder;

impl PayloadDecoder for YahooDecoder {
    fn source(&self) -> &str {
        YAHOO_SOURCE
    }

    fn decode(&self, body: &[u8]) -> Result<Decoded, String> {
        let resp: ChartResponse =
            serde_json::from_slice(body).map_err(|e| format!("invalid chart JSON: {e}"))?;

        let Some(results) = resp.chart.result else {
            return Err(match resp.chart.error {
                Some(err) => format!("{}: {}", err.code, err.description),
                None => "empty result with no error".to_string(),
            });
        };
        let data = results
            .into_iter()
            .next()
            .ok_or_else(|| "result array is empty".to_string())?;

        let ticker = data.meta.and_then(|m| m.symbol);
        let timestamps = data.timestamp.unwrap_or_default();
        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| "no quote data".to_string())?;

        let mut observations = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let open = number_field(quote.open.get(i));
            let high = number_field(quote.high.get(i));
            let low = number_field(quote.low.get(i));
            let close = number_field(quote.close.get(i));
            let volume = number_field(quote.volume.get(i));

            // Holidays come back as all-null rows
            if open.is_none()
                && high.is_none()
                && low.is_none()
                && close.is_none()
                && volume.is_none()
            {
                continue;
            }

            observations.push(Observation {
                date: ts
                    .as_i64()
                    .and_then(|secs| DateTime::from_timestamp(secs, 0))
                    .map(|dt| dt.date_naive()),
                open,
                high,
                low,
                close,
                volume,
            });
        }

        Ok(Decoded {
            ticker,
            observations,
        })
    }
}
