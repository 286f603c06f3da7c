//! SQLite-backed [`RecordStore`].
//!
//! One table, `daily_prices`, with `UNIQUE(symbol, date)`. Prices are stored
//! as decimal text so values read back exactly as written.

use super::{RecordStore, SyncError};
use crate::domain::{CanonicalRecord, DateRange, Symbol, UpsertOutcome};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS daily_prices (
    id          INTEGER PRIMARY KEY,
    symbol      TEXT    NOT NULL,
    date        TEXT    NOT NULL,
    open        TEXT    NOT NULL,
    high        TEXT    NOT NULL,
    low         TEXT    NOT NULL,
    close       TEXT    NOT NULL,
    volume      INTEGER NOT NULL CHECK (volume >= 0),
    ingested_at TEXT    NOT NULL,
    UNIQUE (symbol, date)
);
"#;

const UPSERT: &str = r#"
INSERT INTO daily_prices (symbol, date, open, high, low, close, volume, ingested_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
ON CONFLICT (symbol, date) DO UPDATE SET
    open = excluded.open,
    high = excluded.high,
    low = excluded.low,
    close = excluded.close,
    volume = excluded.volume,
    ingested_at = excluded.ingested_at
"#;

const SELECT_COLUMNS: &str =
    "SELECT symbol, date, open, high, low, close, volume, ingested_at FROM daily_prices";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn map_err(err: rusqlite::Error) -> SyncError {
    match err.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
            SyncError::Unavailable(err.to_string())
        }
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::SystemIoFailure
            | ErrorCode::ReadOnly
            | ErrorCode::DiskFull
            | ErrorCode::NotADatabase,
        ) => SyncError::Unavailable(err.to_string()),
        Some(ErrorCode::ConstraintViolation) => SyncError::Constraint(err.to_string()),
        _ => SyncError::Storage(err.to_string()),
    }
}

impl SqliteStore {
    /// Open (or create) a database file.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, SyncError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                SyncError::Unavailable(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(path).map_err(map_err)?;
        conn.busy_timeout(busy_timeout).map_err(map_err)?;
        conn.pragma_update(None, "journal_mode", "WAL").map_err(map_err)?;
        Self::init(conn)
    }

    /// Private in-memory database.
    pub fn open_in_memory() -> Result<Self, SyncError> {
        Self::init(Connection::open_in_memory().map_err(map_err)?)
    }

    fn init(conn: Connection) -> Result<Self, SyncError> {
        conn.execute_batch(SCHEMA).map_err(map_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn with_conn<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, SyncError>,
    ) -> Result<T, SyncError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| SyncError::Unavailable("connection mutex poisoned".into()))?;
        f(&mut conn)
    }
}

struct RawRow {
    symbol: String,
    date: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: i64,
    ingested_at: String,
}

impl RawRow {
    fn corrupt(&self, reason: String) -> SyncError {
        SyncError::Corrupt {
            symbol: self.symbol.clone(),
            date: self.date.clone(),
            reason,
        }
    }

    fn decimal(&self, field: &str, raw: &str) -> Result<Decimal, SyncError> {
        Decimal::from_str(raw).map_err(|e| self.corrupt(format!("{field} '{raw}': {e}")))
    }

    fn into_record(self) -> Result<CanonicalRecord, SyncError> {
        Ok(CanonicalRecord {
            symbol: Symbol::parse(&self.symbol).map_err(|e| self.corrupt(e.to_string()))?,
            date: NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
                .map_err(|e| self.corrupt(format!("date: {e}")))?,
            open: self.decimal("open", &self.open)?,
            high: self.decimal("high", &self.high)?,
            low: self.decimal("low", &self.low)?,
            close: self.decimal("close", &self.close)?,
            volume: u64::try_from(self.volume)
                .map_err(|e| self.corrupt(format!("volume: {e}")))?,
            ingested_at: DateTime::parse_from_rfc3339(&self.ingested_at)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| self.corrupt(format!("ingested_at: {e}")))?,
        })
    }
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<Result<CanonicalRecord, SyncError>> {
    let raw = RawRow {
        symbol: row.get(0)?,
        date: row.get(1)?,
        open: row.get(2)?,
        high: row.get(3)?,
        low: row.get(4)?,
        close: row.get(5)?,
        volume: row.get(6)?,
        ingested_at: row.get(7)?,
    };
    Ok(raw.into_record())
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<Result<CanonicalRecord, SyncError>>>,
) -> Result<Vec<CanonicalRecord>, SyncError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(map_err)??);
    }
    Ok(out)
}

impl RecordStore for SqliteStore {
    fn upsert(&self, record: &CanonicalRecord) -> Result<UpsertOutcome, SyncError> {
        let volume = i64::try_from(record.volume)
            .map_err(|_| SyncError::Constraint(format!("volume {} overflows", record.volume)))?;

        self.with_conn(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(map_err)?;
            let existed = tx
                .query_row(
                    "SELECT 1 FROM daily_prices WHERE symbol = ?1 AND date = ?2",
                    params![record.symbol.as_str(), record.date.to_string()],
                    |_| Ok(()),
                )
                .optional()
                .map_err(map_err)?
                .is_some();
            tx.execute(
                UPSERT,
                params![
                    record.symbol.as_str(),
                    record.date.to_string(),
                    record.open.to_string(),
                    record.high.to_string(),
                    record.low.to_string(),
                    record.close.to_string(),
                    volume,
                    record.ingested_at.to_rfc3339(),
                ],
            )
            .map_err(map_err)?;
            tx.commit().map_err(map_err)?;
            Ok(if existed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Inserted
            })
        })
    }

    fn get(&self, symbol: &Symbol, date: NaiveDate) -> Result<Option<CanonicalRecord>, SyncError> {
        self.with_conn(|conn| {
            let found = conn
                .query_row(
                    &format!("{SELECT_COLUMNS} WHERE symbol = ?1 AND date = ?2"),
                    params![symbol.as_str(), date.to_string()],
                    read_record,
                )
                .optional()
                .map_err(map_err)?;
            found.transpose()
        })
    }

    fn query(&self, symbol: &Symbol, range: &DateRange) -> Result<Vec<CanonicalRecord>, SyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "{SELECT_COLUMNS} WHERE symbol = ?1 AND date >= ?2 AND date <= ?3 ORDER BY date"
                ))
                .map_err(map_err)?;
            let rows = stmt
                .query_map(
                    params![symbol.as_str(), range.start.to_string(), range.end.to_string()],
                    read_record,
                )
                .map_err(map_err)?;
            collect_rows(rows)
        })
    }

    fn delete(&self, symbol: &Symbol, date: NaiveDate) -> Result<bool, SyncError> {
        self.with_conn(|conn| {
            let n = conn
                .execute(
                    "DELETE FROM daily_prices WHERE symbol = ?1 AND date = ?2",
                    params![symbol.as_str(), date.to_string()],
                )
                .map_err(map_err)?;
            Ok(n > 0)
        })
    }

    fn symbols(&self) -> Result<Vec<Symbol>, SyncError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT DISTINCT symbol FROM daily_prices ORDER BY symbol")
                .map_err(map_err)?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(map_err)?;
            let mut out = Vec::new();
            for raw in rows {
                let raw = raw.map_err(map_err)?;
                let symbol = Symbol::parse(&raw).map_err(|e| SyncError::Corrupt {
                    symbol: raw.clone(),
                    date: String::new(),
                    reason: e.to_string(),
                })?;
                out.push(symbol);
            }
            Ok(out)
        })
    }

    fn count(&self) -> Result<usize, SyncError> {
        self.with_conn(|conn| {
            let n: i64 = conn
                .query_row("SELECT COUNT(*) FROM daily_prices", [], |row| row.get(0))
                .map_err(map_err)?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
    }
}
