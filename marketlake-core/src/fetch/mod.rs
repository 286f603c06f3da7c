//! Upstream market-data access.
//!
//! [`MarketDataProvider`] is the stable capability the pipeline depends on.
//! [`ApiClient`] implements it for any [`ProviderAdapter`], layering request
//! validation, pacing, retry with backoff and rate-limit cooldowns on top of an
//! [`HttpTransport`]. Provider field names and URL shapes stay inside the
//! adapter modules.

pub mod client;
pub mod polygon;
pub mod retry;
pub mod throttle;
pub mod transport;
pub mod yahoo;

pub use client::{ApiClient, ProviderAdapter};
pub use polygon::{PolygonAdapter, PolygonDecoder, POLYGON_SOURCE};
pub use retry::RetryPolicy;
pub use throttle::RequestThrottle;
pub use transport::{HttpResponse, HttpTransport, ReqwestTransport, TransportError};
pub use yahoo::{YahooAdapter, YahooDecoder, YAHOO_SOURCE};

use crate::domain::{DateRange, RawPayload, Symbol, SymbolError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a fetch gave up.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Retrying cannot help: unknown symbol, bad request, auth failure.
    #[error("{symbol}: permanent fetch failure: {reason}")]
    Permanent { symbol: String, reason: String },

    /// The provider kept failing in a retryable way until attempts ran out.
    #[error("{symbol}: transient fetch failure after {attempts} attempt(s): {reason}")]
    Transient {
        symbol: String,
        attempts: u32,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    Permanent,
    Transient,
}

impl FetchError {
    pub fn kind(&self) -> FetchErrorKind {
        match self {
            FetchError::Permanent { .. } => FetchErrorKind::Permanent,
            FetchError::Transient { .. } => FetchErrorKind::Transient,
        }
    }

    /// A ticker that failed validation never reaches the network.
    pub fn invalid_symbol(raw: &str, err: &SymbolError) -> Self {
        FetchError::Permanent {
            symbol: raw.to_string(),
            reason: format!("malformed symbol: {err}"),
        }
    }
}

/// Fetch daily bars for one symbol over one date range.
///
/// Implementations own every provider-specific concern (URLs, status codes,
/// throttling). Callers only see a [`RawPayload`] or a [`FetchError`].
pub trait MarketDataProvider: Send + Sync {
    /// Source identifier stamped on every payload, e.g. `polygon/v2`.
    fn source(&self) -> &str;

    fn fetch(&self, symbol: &Symbol, range: &DateRange) -> Result<RawPayload, FetchError>;
}
