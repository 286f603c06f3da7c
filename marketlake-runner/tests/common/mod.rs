//! Fakes shared by the pipeline tests: a scripted HTTP market, and archive
//! and store wrappers that fail on demand.

#![allow(dead_code)]

use chrono::NaiveDate;
use marketlake_core::archive::{ArchiveError, FsArchive, RawArchive, StorageLocation};
use marketlake_core::domain::{CanonicalRecord, DateRange, RawPayload, Symbol, UpsertOutcome};
use marketlake_core::fetch::transport::TransportErrorKind;
use marketlake_core::fetch::{
    ApiClient, HttpResponse, HttpTransport, MarketDataProvider, PolygonAdapter, RetryPolicy,
    TransportError,
};
use marketlake_core::store::{RecordStore, SqliteStore, SyncError};
use marketlake_runner::{CancelHandle, PipelineConfig};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const JAN_2_MS: i64 = 1_704_171_600_000; // 2024-01-02 05:00 UTC

pub fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

/// One Polygon aggregates row for 2024-01-`day`.
pub fn bar(day: u32, o: f64, h: f64, l: f64, c: f64, v: u64) -> String {
    format!(
        r#"{{"t":{},"o":{o},"h":{h},"l":{l},"c":{c},"v":{v}}}"#,
        JAN_2_MS + i64::from(day - 2) * 86_400_000
    )
}

pub fn polygon_body(ticker: &str, rows: &[String]) -> Vec<u8> {
    format!(
        r#"{{"ticker":"{ticker}","status":"OK","resultsCount":{},"results":[{}]}}"#,
        rows.len(),
        rows.join(",")
    )
    .into_bytes()
}

/// Scenario 1 bar: AAPL 2024-01-02 {185.0, 186.2, 184.1, 185.9, 50_000_000}.
pub fn aapl_jan_2() -> Vec<u8> {
    polygon_body("AAPL", &[bar(2, 185.0, 186.2, 184.1, 185.9, 50_000_000)])
}

/// Responses keyed by ticker; anything unscripted is a 404.
#[derive(Default)]
pub struct FakeMarket {
    routes: Mutex<HashMap<String, Vec<Result<HttpResponse, TransportError>>>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl FakeMarket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Always answer `ticker` with 200 and `body`.
    pub fn ok(&self, ticker: &str, body: Vec<u8>) {
        self.script(ticker, vec![Ok(response(200, body))]);
    }

    /// Answer in order; the last response repeats.
    pub fn script(&self, ticker: &str, responses: Vec<Result<HttpResponse, TransportError>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(ticker.to_string(), responses);
    }

    pub fn calls(&self, ticker: &str) -> usize {
        self.calls.lock().unwrap().get(ticker).copied().unwrap_or(0)
    }
}

pub fn response(status: u16, body: Vec<u8>) -> HttpResponse {
    HttpResponse {
        status,
        retry_after: None,
        body,
    }
}

pub fn timeout() -> TransportError {
    TransportError::new(TransportErrorKind::Timeout, "operation timed out")
}

impl HttpTransport for FakeMarket {
    fn get(&self, url: &str) -> Result<HttpResponse, TransportError> {
        let ticker = url
            .split("/ticker/")
            .nth(1)
            .and_then(|rest| rest.split('/').next())
            .unwrap_or_default()
            .to_string();
        let n = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(ticker.clone()).or_insert(0);
            *n += 1;
            *n
        };
        let routes = self.routes.lock().unwrap();
        match routes.get(&ticker) {
            Some(script) if !script.is_empty() => script[(n - 1).min(script.len() - 1)].clone(),
            _ => Ok(response(404, br#"{"status":"NOT_FOUND"}"#.to_vec())),
        }
    }
}

pub fn provider(market: Arc<FakeMarket>) -> Arc<dyn MarketDataProvider> {
    Arc::new(ApiClient::new(
        PolygonAdapter::new("test-key").with_base_url("http://fake.invalid"),
        market,
        RetryPolicy::immediate(3),
    ))
}

/// Archive that can be switched to fail every write, or to cancel the run
/// right after a write lands.
pub struct FlakyArchive {
    inner: FsArchive,
    pub failing: std::sync::atomic::AtomicBool,
    cancel_after_write: Mutex<Option<CancelHandle>>,
}

impl FlakyArchive {
    pub fn new(root: &std::path::Path) -> Self {
        Self {
            inner: FsArchive::new(root),
            failing: Default::default(),
            cancel_after_write: Mutex::new(None),
        }
    }

    pub fn cancel_after_write(&self, handle: CancelHandle) {
        *self.cancel_after_write.lock().unwrap() = Some(handle);
    }
}

impl RawArchive for FlakyArchive {
    fn archive(&self, payload: &RawPayload) -> Result<StorageLocation, ArchiveError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ArchiveError::Unavailable("bucket offline".into()));
        }
        let location = self.inner.archive(payload)?;
        if let Some(handle) = self.cancel_after_write.lock().unwrap().as_ref() {
            handle.cancel();
        }
        Ok(location)
    }

    fn list(
        &self,
        source: &str,
        symbol: &str,
        date: NaiveDate,
    ) -> Result<Vec<StorageLocation>, ArchiveError> {
        self.inner.list(source, symbol, date)
    }

    fn read(&self, location: &StorageLocation) -> Result<RawPayload, ArchiveError> {
        self.inner.read(location)
    }
}

/// Store that refuses upserts for chosen dates and counts writes.
pub struct FlakyStore {
    inner: SqliteStore,
    failing_dates: Mutex<HashSet<NaiveDate>>,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            failing_dates: Mutex::new(HashSet::new()),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn fail_on(&self, date: NaiveDate) {
        self.failing_dates.lock().unwrap().insert(date);
    }
}

impl RecordStore for FlakyStore {
    fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, SyncError> {
        if self.failing_dates.lock().unwrap().contains(&record.date) {
            return Err(SyncError::Unavailable("database is locked".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert(record)
    }

    fn get(&self, symbol: &Symbol, date: NaiveDate) -> Result<Option<CanonicalRecord>, SyncError> {
        self.inner.get(symbol, date)
    }

    fn query(&self, symbol: &Symbol, range: &DateRange) -> Result<Vec<CanonicalRecord>, SyncError> {
        self.inner.query(symbol, range)
    }

    fn delete(&self, symbol: &Symbol, date: NaiveDate) -> Result<bool, SyncError> {
        self.inner.delete(symbol, date)
    }

    fn symbols(&self) -> Result<Vec<Symbol>, SyncError> {
        self.inner.symbols()
    }

    fn count(&self) -> Result<usize, SyncError> {
        self.inner.count()
    }
}

/// Everything a test needs, wired the way `Pipeline::from_config` would.
pub struct Harness {
    pub dir: TempDir,
    pub market: Arc<FakeMarket>,
    pub archive: Arc<FlakyArchive>,
    pub store: Arc<FlakyStore>,
    pub config: PipelineConfig,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.symbols = vec!["AAPL".into()];
        config.concurrency = 4;
        config.provider.api_key = Some("test-key".into());
        config.archive.root = dir.path().join("raw");
        Self {
            archive: Arc::new(FlakyArchive::new(&dir.path().join("raw"))),
            store: Arc::new(FlakyStore::new()),
            market: FakeMarket::new(),
            config,
            dir,
        }
    }

    pub fn pipeline(&self) -> marketlake_runner::Pipeline {
        marketlake_runner::Pipeline::new(
            &self.config,
            provider(Arc::clone(&self.market)),
            self.archive.clone(),
            self.store.clone(),
        )
    }
}
