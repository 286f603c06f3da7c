//! Pipeline coordinator: one unit of work per symbol, run on a bounded pool.
//!
//! A unit walks `Pending → Fetching → Archiving → Normalizing → Syncing` and
//! ends `Succeeded`, `PartiallyFailed` or `Failed`. Units share nothing but
//! the provider throttle and the store, so one symbol's failure never
//! reaches another.

use crate::config::{ConfigError, PipelineConfig, ProviderKind};
use crate::history::RunHistory;
use crate::result::{ErrorDescriptor, RunResult, RunStatus, RunSummary, Stage, UnitCounts};
use chrono::{NaiveDate, Utc};
use marketlake_core::archive::{ArchiveError, FsArchive, RawArchive, StorageLocation};
use marketlake_core::fetch::{
    ApiClient, FetchError, FetchErrorKind, MarketDataProvider, PolygonAdapter, RequestThrottle,
    ReqwestTransport, TransportError, YahooAdapter,
};
use marketlake_core::normalize::Normalizer;
use marketlake_core::store::{RecordStore, SqliteStore, SyncError};
use marketlake_core::{DateRange, RawPayload, Symbol, UpsertOutcome};
use rayon::prelude::*;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("http client setup failed: {0}")]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Store(#[from] SyncError),

    #[error("invalid symbol: {0}")]
    Symbol(String),

    #[error("nothing archived for {symbol} on {date}")]
    NotArchived { symbol: Symbol, date: NaiveDate },

    #[error("worker pool: {0}")]
    Pool(String),
}

/// What the scheduler asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub run_date: NaiveDate,
    /// Raw tickers; empty means the configured symbol set.
    pub symbols: Vec<String>,
}

impl RunRequest {
    pub fn new(run_date: NaiveDate) -> Self {
        Self {
            run_date,
            symbols: Vec::new(),
        }
    }

    pub fn with_symbols<I, S>(mut self, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols = symbols.into_iter().map(Into::into).collect();
        self
    }
}

/// Where a unit currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitState {
    Pending,
    Fetching,
    Archiving,
    Normalizing,
    Syncing,
    Done(RunStatus),
}

/// Per-unit progress callbacks (e.g. for a CLI progress line).
pub trait RunProgress: Send + Sync {
    fn on_start(&self, _symbol: &str) {}
    fn on_complete(&self, _result: &RunResult) {}
}

struct NoProgress;
impl RunProgress for NoProgress {}

/// Shared flag that stops units from starting their next step.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag so the pipeline can run again.
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Book-keeping for one unit while it runs.
struct Unit {
    symbol: String,
    range: Option<DateRange>,
    state: UnitState,
    counts: UnitCounts,
    archive_location: Option<StorageLocation>,
    archive_failed: bool,
    records_seen: usize,
    errors: Vec<ErrorDescriptor>,
    started: Instant,
}

impl Unit {
    fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            range: None,
            state: UnitState::Pending,
            counts: UnitCounts::default(),
            archive_location: None,
            archive_failed: false,
            records_seen: 0,
            errors: Vec::new(),
            started: Instant::now(),
        }
    }

    fn enter(&mut self, next: UnitState) {
        debug!(symbol = %self.symbol, from = ?self.state, to = ?next, "unit state");
        self.state = next;
    }

    fn fail(mut self, error: ErrorDescriptor) -> RunResult {
        self.errors.push(error);
        self.finish(RunStatus::Failed)
    }

    /// Status from what happened, once every step has run.
    ///
    /// A unit whose every record failed to sync is `Failed`, whether it had
    /// one record or many; nothing it fetched reached the store. Some sync
    /// failures, an archive failure, or (when strict) any rejection make it
    /// `PartiallyFailed`.
    fn settle(self, strict_validation: bool) -> RunResult {
        let c = &self.counts;
        let status = if self.records_seen > 0 && c.sync_failed == self.records_seen {
            RunStatus::Failed
        } else if c.sync_failed > 0
            || self.archive_failed
            || (strict_validation && c.skipped_invalid > 0)
        {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        };
        self.finish(status)
    }

    fn finish(mut self, status: RunStatus) -> RunResult {
        self.enter(UnitState::Done(status));
        RunResult {
            symbol: self.symbol,
            range: self.range,
            status,
            counts: self.counts,
            archive_location: self.archive_location,
            errors: self.errors,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Cancellation observed just before `next` would have started.
fn cancelled(next: Stage) -> ErrorDescriptor {
    ErrorDescriptor::new(next, "cancelled", format!("run cancelled before {next}"))
}

fn fetch_error(err: &FetchError) -> ErrorDescriptor {
    let code = match err.kind() {
        FetchErrorKind::Permanent => "permanent",
        FetchErrorKind::Transient => "transient",
    };
    ErrorDescriptor::new(Stage::Fetch, code, err.to_string())
}

pub struct Pipeline {
    provider: Arc<dyn MarketDataProvider>,
    archive: Arc<dyn RawArchive>,
    store: Arc<dyn RecordStore>,
    normalizer: Normalizer,
    default_symbols: Vec<String>,
    lookback_days: u32,
    concurrency: usize,
    strict_validation: bool,
    history: Option<RunHistory>,
    progress: Arc<dyn RunProgress>,
    cancel: CancelHandle,
}

impl Pipeline {
    /// Assemble a pipeline from explicit components.
    pub fn new(
        config: &PipelineConfig,
        provider: Arc<dyn MarketDataProvider>,
        archive: Arc<dyn RawArchive>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            provider,
            archive,
            store,
            normalizer: Normalizer::with_default_decoders(),
            default_symbols: config.symbols.clone(),
            lookback_days: config.lookback_days,
            concurrency: config.concurrency.max(1),
            strict_validation: config.strict_validation,
            history: config.history.path.clone().map(RunHistory::new),
            progress: Arc::new(NoProgress),
            cancel: CancelHandle::default(),
        }
    }

    /// Build the production stack: HTTP provider, filesystem archive, SQLite store.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        let provider = build_provider(config)?;
        let archive: Arc<dyn RawArchive> = Arc::new(FsArchive::new(&config.archive.root));
        let store: Arc<dyn RecordStore> =
            Arc::new(SqliteStore::open(&config.store.path, config.busy_timeout())?);
        Ok(Self::new(config, provider, archive, store))
    }

    pub fn with_normalizer(mut self, normalizer: Normalizer) -> Self {
        self.normalizer = normalizer;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn RunProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn archive(&self) -> &Arc<dyn RawArchive> {
        &self.archive
    }

    pub fn history(&self) -> Option<&RunHistory> {
        self.history.as_ref()
    }

    /// Run every requested symbol and summarize.
    ///
    /// Unit failures are reported in the summary; `Err` only means the run
    /// could not start at all.
    pub fn run(&self, request: &RunRequest) -> Result<RunSummary, PipelineError> {
        let started_at = Utc::now();
        let mut symbols: Vec<&str> = if request.symbols.is_empty() {
            self.default_symbols.iter().map(String::as_str).collect()
        } else {
            request.symbols.iter().map(String::as_str).collect()
        };
        let mut seen = std::collections::HashSet::new();
        symbols.retain(|s| seen.insert(s.trim().to_ascii_uppercase()));

        info!(
            run_date = %request.run_date,
            symbols = symbols.len(),
            concurrency = self.concurrency,
            "pipeline run starting"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("marketlake-worker-{i}"))
            .build()
            .map_err(|e| PipelineError::Pool(e.to_string()))?;

        let results: Vec<RunResult> = pool.install(|| {
            symbols
                .par_iter()
                .map(|raw| self.run_isolated(raw, request.run_date))
                .collect()
        });

        let summary = RunSummary::new(request.run_date, started_at, Utc::now(), results);
        info!(
            run_id = %summary.run_id,
            succeeded = summary.count(RunStatus::Succeeded),
            partially_failed = summary.count(RunStatus::PartiallyFailed),
            failed = summary.count(RunStatus::Failed),
            inserted = summary.totals.inserted,
            updated = summary.totals.updated,
            skipped_invalid = summary.totals.skipped_invalid,
            "pipeline run finished"
        );

        if let Some(history) = &self.history {
            if let Err(e) = history.append(&summary) {
                warn!(path = %history.path().display(), error = %e, "could not append run history");
            }
        }
        Ok(summary)
    }

    /// A panicking unit becomes a `Failed` result instead of taking the run down.
    fn run_isolated(&self, raw: &str, run_date: NaiveDate) -> RunResult {
        self.progress.on_start(raw);
        let result = catch_unwind(AssertUnwindSafe(|| self.run_unit(raw, run_date)))
            .unwrap_or_else(|_| {
                warn!(symbol = raw, "unit panicked");
                Unit::new(raw).fail(ErrorDescriptor::new(
                    Stage::Fetch,
                    "panic",
                    "unit panicked; see logs",
                ))
            });
        self.progress.on_complete(&result);
        result
    }

    /// Fetch, archive, normalize and sync one symbol.
    pub fn run_unit(&self, raw: &str, run_date: NaiveDate) -> RunResult {
        let mut unit = Unit::new(raw);
        let symbol = match Symbol::parse(raw) {
            Ok(s) => s,
            Err(e) => {
                let err = FetchError::invalid_symbol(raw, &e);
                warn!(symbol = raw, error = %err, "rejecting malformed symbol");
                return unit.fail(fetch_error(&err));
            }
        };
        unit.symbol = symbol.to_string();
        let range = DateRange::trailing(run_date, self.lookback_days);
        unit.range = Some(range);

        let span = info_span!("unit", symbol = %symbol, range = %range);
        let _guard = span.enter();

        if self.cancel.is_cancelled() {
            return unit.fail(cancelled(Stage::Fetch));
        }
        unit.enter(UnitState::Fetching);
        let payload = match self.provider.fetch(&symbol, &range) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "fetch failed");
                let result = unit.fail(fetch_error(&e));
                info!(status = %result.status, "unit finished");
                return result;
            }
        };

        if self.cancel.is_cancelled() {
            return unit.fail(cancelled(Stage::Archive));
        }
        unit.enter(UnitState::Archiving);
        match self.archive.archive(&payload) {
            Ok(location) => {
                debug!(%location, "payload archived");
                unit.counts.archived = 1;
                unit.archive_location = Some(location);
            }
            Err(e) => {
                warn!(error = %e, "archive failed; continuing to normalize");
                unit.archive_failed = true;
                unit.errors
                    .push(ErrorDescriptor::new(Stage::Archive, e.code(), e.to_string()));
            }
        }

        if self.cancel.is_cancelled() {
            return unit.fail(cancelled(Stage::Normalize));
        }
        let result = self.normalize_and_sync(unit, &payload, true);
        info!(
            status = %result.status,
            inserted = result.counts.inserted,
            updated = result.counts.updated,
            skipped_invalid = result.counts.skipped_invalid,
            sync_failed = result.counts.sync_failed,
            "unit finished"
        );
        result
    }

    fn normalize_and_sync(&self, mut unit: Unit, payload: &RawPayload, check_cancel: bool) -> RunResult {
        unit.enter(UnitState::Normalizing);
        let normalized = self.normalizer.normalize(payload);
        unit.counts.fetched = normalized.observed();
        unit.counts.skipped_invalid = normalized.rejections.len();
        for rejection in &normalized.rejections {
            warn!(code = rejection.code(), date = ?rejection.date, "{rejection}");
            unit.errors.push(
                ErrorDescriptor::new(Stage::Normalize, rejection.code(), rejection.reason.to_string())
                    .on(rejection.date),
            );
        }

        if check_cancel && self.cancel.is_cancelled() {
            return unit.fail(cancelled(Stage::Sync));
        }
        unit.enter(UnitState::Syncing);
        unit.records_seen = normalized.records.len();
        for record in &normalized.records {
            match self.store.upsert(record) {
                Ok(UpsertOutcome::Inserted) => unit.counts.inserted += 1,
                Ok(UpsertOutcome::Updated) => unit.counts.updated += 1,
                Err(e) => {
                    warn!(date = %record.date, error = %e, "sync failed");
                    unit.counts.sync_failed += 1;
                    unit.errors.push(
                        ErrorDescriptor::new(Stage::Sync, e.code(), e.to_string())
                            .on(Some(record.date)),
                    );
                }
            }
        }
        unit.settle(self.strict_validation)
    }

    /// Re-normalize and re-sync the newest archived payload for one partition
    /// without touching the provider.
    pub fn replay(&self, symbol: &str, date: NaiveDate) -> Result<RunResult, PipelineError> {
        let symbol = Symbol::parse(symbol).map_err(|e| PipelineError::Symbol(e.to_string()))?;
        let locations = self
            .archive
            .list(self.provider.source(), symbol.as_str(), date)?;
        let Some(location) = locations.last().cloned() else {
            return Err(PipelineError::NotArchived { symbol, date });
        };
        let payload = self.archive.read(&location)?;
        info!(%symbol, %date, %location, "replaying archived payload");

        let mut unit = Unit::new(symbol.as_str());
        unit.range = Some(payload.range);
        unit.archive_location = Some(location);
        Ok(self.normalize_and_sync(unit, &payload, false))
    }
}

fn build_provider(config: &PipelineConfig) -> Result<Arc<dyn MarketDataProvider>, PipelineError> {
    let throttle = Arc::new(RequestThrottle::new(config.min_request_interval()));
    let policy = config.retry.policy();
    let provider: Arc<dyn MarketDataProvider> = match config.provider.kind {
        ProviderKind::Polygon => {
            let key = config.provider.api_key.clone().ok_or_else(|| {
                ConfigError::Invalid("provider 'polygon' requires an api_key".into())
            })?;
            let mut adapter = PolygonAdapter::new(key);
            if let Some(url) = &config.provider.base_url {
                adapter = adapter.with_base_url(url.as_str());
            }
            let transport = Arc::new(ReqwestTransport::new(
                config.request_timeout(),
                concat!("marketlake/", env!("CARGO_PKG_VERSION")),
            )?);
            Arc::new(ApiClient::new(adapter, transport, policy).with_throttle(throttle))
        }
        ProviderKind::Yahoo => {
            let mut adapter = YahooAdapter::new();
            if let Some(url) = &config.provider.base_url {
                adapter = adapter.with_base_url(url.as_str());
            }
            let transport = Arc::new(ReqwestTransport::new(
                config.request_timeout(),
                marketlake_core::fetch::yahoo::YAHOO_USER_AGENT,
            )?);
            Arc::new(ApiClient::new(adapter, transport, policy).with_throttle(throttle))
        }
    };
    Ok(provider)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_handle_is_shared() {
        let a = CancelHandle::default();
        let b = a.clone();
        b.cancel();
        assert!(a.is_cancelled());
        a.reset();
        assert!(!b.is_cancelled());
    }

    #[test]
    fn request_builder_collects_symbols() {
        let req = RunRequest::new(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap())
            .with_symbols(["AAPL", "MSFT"]);
        assert_eq!(req.symbols, vec!["AAPL".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn all_records_failing_sync_fails_the_unit() {
        let mut unit = Unit::new("AAPL");
        unit.records_seen = 1;
        unit.counts.sync_failed = 1;
        assert_eq!(unit.settle(false).status, RunStatus::Failed);
    }

    #[test]
    fn some_records_failing_sync_degrades_the_unit() {
        let mut unit = Unit::new("AAPL");
        unit.records_seen = 3;
        unit.counts.sync_failed = 1;
        unit.counts.inserted = 2;
        assert_eq!(unit.settle(false).status, RunStatus::PartiallyFailed);
    }

    #[test]
    fn rejections_only_degrade_under_strict_validation() {
        let mut unit = Unit::new("AAPL");
        unit.counts.skipped_invalid = 1;
        let lenient = Unit {
            counts: unit.counts,
            ..Unit::new("AAPL")
        };
        assert_eq!(lenient.settle(false).status, RunStatus::Succeeded);
        assert_eq!(unit.settle(true).status, RunStatus::PartiallyFailed);
    }

    #[test]
    fn archive_failure_caps_status() {
        let mut unit = Unit::new("AAPL");
        unit.archive_failed = true;
        unit.records_seen = 1;
        unit.counts.inserted = 1;
        assert_eq!(unit.settle(false).status, RunStatus::PartiallyFailed);
    }
}
