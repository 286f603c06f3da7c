//! Snapshot exports of the structured store for downstream tools.
//!
//! Prices are written as decimal strings so that exported values match the
//! store exactly; dates are native Parquet dates.

use crate::domain::CanonicalRecord;
use chrono::NaiveDate;
use polars::prelude::*;
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("parquet error: {0}")]
    Parquet(String),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ExportError + '_ {
    move |source| ExportError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn ensure_parent(path: &Path) -> Result<(), ExportError> {
    match path.parent().filter(|p| !p.as_os_str().is_empty()) {
        Some(parent) => fs::create_dir_all(parent).map_err(io_err(parent)),
        None => Ok(()),
    }
}

/// Build a DataFrame with one row per record.
pub fn records_to_dataframe(records: &[CanonicalRecord]) -> Result<DataFrame, ExportError> {
    let epoch = NaiveDate::default();
    let symbols: Vec<&str> = records.iter().map(|r| r.symbol.as_str()).collect();
    let dates: Vec<i32> = records
        .iter()
        .map(|r| (r.date - epoch).num_days() as i32)
        .collect();
    let text = |f: fn(&CanonicalRecord) -> String| records.iter().map(f).collect::<Vec<_>>();
    let opens = text(|r| r.open.to_string());
    let highs = text(|r| r.high.to_string());
    let lows = text(|r| r.low.to_string());
    let closes = text(|r| r.close.to_string());
    let volumes: Vec<u64> = records.iter().map(|r| r.volume).collect();
    let ingested = text(|r| r.ingested_at.to_rfc3339());

    DataFrame::new(vec![
        Column::new("symbol".into(), symbols),
        Column::new("date".into(), dates)
            .cast(&DataType::Date)
            .map_err(|e| ExportError::Parquet(format!("date cast: {e}")))?,
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
        Column::new("ingested_at".into(), ingested),
    ])
    .map_err(|e| ExportError::Parquet(format!("dataframe creation: {e}")))
}

/// Write records to a Parquet file, replacing any previous export.
pub fn write_parquet(records: &[CanonicalRecord], path: &Path) -> Result<usize, ExportError> {
    let mut df = records_to_dataframe(records)?;
    ensure_parent(path)?;
    let file = fs::File::create(path).map_err(io_err(path))?;
    ParquetWriter::new(file)
        .finish(&mut df)
        .map_err(|e| ExportError::Parquet(format!("write parquet: {e}")))?;
    Ok(df.height())
}

/// Write records as CSV with a header row.
pub fn write_csv(records: &[CanonicalRecord], path: &Path) -> Result<usize, ExportError> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "symbol",
        "date",
        "open",
        "high",
        "low",
        "close",
        "volume",
        "ingested_at",
    ])?;
    for r in records {
        writer.write_record([
            r.symbol.to_string(),
            r.date.to_string(),
            r.open.to_string(),
            r.high.to_string(),
            r.low.to_string(),
            r.close.to_string(),
            r.volume.to_string(),
            r.ingested_at.to_rfc3339(),
        ])?;
    }
    writer.flush().map_err(io_err(path))?;
    Ok(records.len())
}
