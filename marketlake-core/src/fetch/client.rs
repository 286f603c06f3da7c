//! Resilient API client shared by every provider adapter.

use super::retry::RetryPolicy;
use super::throttle::RequestThrottle;
use super::transport::{HttpResponse, HttpTransport};
use super::{FetchError, MarketDataProvider};
use crate::domain::{DateRange, RawPayload, Symbol};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// Provider-specific half of a client: where to send the request and how to
/// label what comes back. Decoding the body is the normalizer's job.
pub trait ProviderAdapter: Send + Sync {
    fn source(&self) -> &str;

    /// Full request URL, credentials included.
    fn request_url(&self, symbol: &Symbol, range: &DateRange) -> String;
}

/// How a response status should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Success,
    RateLimited,
    Retryable,
    Permanent,
}

fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        429 => StatusClass::RateLimited,
        408 | 500..=599 => StatusClass::Retryable,
        _ => StatusClass::Permanent,
    }
}

/// Retrying, rate-limit-aware client for one provider.
pub struct ApiClient<A> {
    adapter: A,
    transport: Arc<dyn HttpTransport>,
    policy: RetryPolicy,
    throttle: Arc<RequestThrottle>,
}

impl<A: ProviderAdapter> ApiClient<A> {
    pub fn new(adapter: A, transport: Arc<dyn HttpTransport>, policy: RetryPolicy) -> Self {
        Self {
            adapter,
            transport,
            policy,
            throttle: Arc::new(RequestThrottle::unpaced()),
        }
    }

    /// Share a throttle with other clients hitting the same provider account.
    pub fn with_throttle(mut self, throttle: Arc<RequestThrottle>) -> Self {
        self.throttle = throttle;
        self
    }

    fn payload(&self, symbol: &Symbol, range: &DateRange, resp: HttpResponse) -> RawPayload {
        RawPayload {
            symbol: symbol.clone(),
            range: *range,
            fetched_at: Utc::now(),
            source: self.adapter.source().to_string(),
            body: resp.body,
        }
    }
}

impl<A: ProviderAdapter> MarketDataProvider for ApiClient<A> {
    fn source(&self) -> &str {
        self.adapter.source()
    }

    fn fetch(&self, symbol: &Symbol, range: &DateRange) -> Result<RawPayload, FetchError> {
        range
            .check_fetchable(Utc::now().date_naive())
            .map_err(|e| FetchError::Permanent {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let url = self.adapter.request_url(symbol, range);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_reason = String::from("no attempt made");

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let delay = self.policy.backoff(attempt - 1);
                debug!(%symbol, attempt, ?delay, "backing off before retry");
                std::thread::sleep(delay);
            }
            self.throttle.acquire();

            let resp = match self.transport.get(&url) {
                Ok(resp) => resp,
                Err(e) if e.is_retryable() => {
                    warn!(%symbol, attempt, error = %e, "transient network failure");
                    last_reason = e.to_string();
                    continue;
                }
                Err(e) => {
                    return Err(FetchError::Permanent {
                        symbol: symbol.to_string(),
                        reason: e.to_string(),
                    });
                }
            };

            match classify(resp.status) {
                StatusClass::Success => {
                    debug!(%symbol, attempt, bytes = resp.body.len(), "fetched");
                    return Ok(self.payload(symbol, range, resp));
                }
                StatusClass::RateLimited => {
                    let cooldown = self.policy.cooldown(resp.retry_after);
                    warn!(%symbol, attempt, ?cooldown, "rate limited by provider");
                    self.throttle.impose_cooldown(cooldown);
                    last_reason = "rate limited (HTTP 429)".into();
                }
                StatusClass::Retryable => {
                    warn!(%symbol, attempt, status = resp.status, "retryable HTTP status");
                    last_reason = format!("HTTP {}", resp.status);
                }
                StatusClass::Permanent => {
                    return Err(FetchError::Permanent {
                        symbol: symbol.to_string(),
                        reason: format!("HTTP {}{}", resp.status, body_excerpt(&resp.body)),
                    });
                }
            }
        }

        Err(FetchError::Transient {
            symbol: symbol.to_string(),
            attempts: max_attempts,
            reason: last_reason,
        })
    }
}

/// First line of a provider error body, trimmed for log/summary output.
fn body_excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let line = text.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return String::new();
    }
    let excerpt: String = line.chars().take(160).collect();
    format!(": {excerpt}")
}
