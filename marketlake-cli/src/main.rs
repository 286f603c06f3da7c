//! marketlake CLI: run the ingestion pipeline and maintain its stores.
//!
//! Commands:
//! - `run`: fetch, archive, normalize and sync a set of symbols for a date
//! - `replay`: re-sync one archived partition without refetching
//! - `records list|get|put|amend|delete`: inspect and hand-edit stored records
//! - `archive ls`: list archived payloads in one partition
//! - `export`: snapshot stored records to Parquet or CSV
//! - `history`: show recent run summaries

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use marketlake_core::archive::{FsArchive, RawArchive};
use marketlake_core::export::{write_csv, write_parquet};
use marketlake_core::fetch::{POLYGON_SOURCE, YAHOO_SOURCE};
use marketlake_core::store::{ManualEditor, RecordPatch, RecordStore, SqliteStore};
use marketlake_core::{CanonicalRecord, DateRange, Symbol};
use marketlake_runner::{
    logging, Pipeline, PipelineConfig, ProviderKind, RunHistory, RunProgress, RunRequest,
    RunResult, RunStatus, RunSummary,
};
use rust_decimal::Decimal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(
    name = "marketlake",
    version,
    about = "marketlake: daily market-data ingestion into a raw archive and a structured store"
)]
struct Cli {
    /// Pipeline configuration file.
    #[arg(long, global = true, default_value = "marketlake.toml")]
    config: PathBuf,

    /// Provider API key. Overrides the config file.
    #[arg(long, global = true, env = "POLYGON_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one date.
    Run {
        /// Run date (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Symbols to process. Defaults to the configured set.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        /// Override the configured lookback (days before the run date).
        #[arg(long)]
        backfill_days: Option<u32>,

        /// Print the summary as JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Re-normalize and re-sync the newest archived payload for one symbol and date.
    Replay {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        date: NaiveDate,
    },
    /// Inspect and hand-edit stored records.
    Records {
        #[command(subcommand)]
        action: RecordsAction,
    },
    /// Raw archive inspection.
    Archive {
        #[command(subcommand)]
        action: ArchiveAction,
    },
    /// Write stored records to a Parquet or CSV file.
    Export {
        #[arg(long)]
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = ExportFormat::Parquet)]
        format: ExportFormat,

        /// Limit to these symbols. Defaults to every stored symbol.
        #[arg(long, num_args = 1..)]
        symbols: Vec<String>,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Show recent run summaries.
    History {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum RecordsAction {
    /// List records for a symbol.
    List {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        start: Option<NaiveDate>,

        #[arg(long)]
        end: Option<NaiveDate>,
    },
    /// Show one record.
    Get {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        date: NaiveDate,
    },
    /// Create or replace a record by hand.
    Put {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        open: Decimal,
        #[arg(long)]
        high: Decimal,
        #[arg(long)]
        low: Decimal,
        #[arg(long)]
        close: Decimal,
        #[arg(long)]
        volume: u64,
    },
    /// Change selected fields of a stored record.
    Amend {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        open: Option<Decimal>,
        #[arg(long)]
        high: Option<Decimal>,
        #[arg(long)]
        low: Option<Decimal>,
        #[arg(long)]
        close: Option<Decimal>,
        #[arg(long)]
        volume: Option<u64>,
    },
    /// Delete one record.
    Delete {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Subcommand)]
enum ArchiveAction {
    /// List archived payloads for one symbol and date.
    Ls {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        date: NaiveDate,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ExportFormat {
    Parquet,
    Csv,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;
    apply_api_key(&mut config, cli.api_key);
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Run {
            date,
            symbols,
            backfill_days,
            json,
        } => run_pipeline(config, date, symbols, backfill_days, json),
        Commands::Replay { symbol, date } => run_replay(config, &symbol, date),
        Commands::Records { action } => run_records(&config, action),
        Commands::Archive {
            action: ArchiveAction::Ls { symbol, date },
        } => run_archive_ls(&config, &symbol, date),
        Commands::Export {
            output,
            format,
            symbols,
            start,
            end,
        } => run_export(&config, &output, format, &symbols, start, end),
        Commands::History { limit } => run_history(&config, limit),
    }
}

/// Read the config file, or fall back to defaults when the default path is absent.
fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() && path == Path::new("marketlake.toml") {
        return Ok(PipelineConfig::default());
    }
    PipelineConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// A key from the command line or environment beats the config file.
fn apply_api_key(config: &mut PipelineConfig, api_key: Option<String>) {
    if let Some(key) = api_key.filter(|k| !k.trim().is_empty()) {
        config.provider.api_key = Some(key);
    }
}

fn open_store(config: &PipelineConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.store.path, config.busy_timeout())
        .with_context(|| format!("opening store {}", config.store.path.display()))?;
    Ok(Arc::new(store))
}

fn parse_symbol(raw: &str) -> Result<Symbol> {
    Symbol::parse(raw).with_context(|| format!("invalid symbol '{raw}'"))
}

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

// ── run / replay ─────────────────────────────────────────────────────

/// Prints one line per finished unit.
struct StdoutProgress {
    total: usize,
    done: AtomicUsize,
}

impl RunProgress for StdoutProgress {
    fn on_complete(&self, result: &RunResult) {
        let n = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        println!(
            "[{n}/{}] {:<8} {:<16} +{} ~{} skipped {}",
            self.total,
            result.symbol,
            result.status,
            result.counts.inserted,
            result.counts.updated,
            result.counts.skipped_invalid
        );
    }
}

fn run_pipeline(
    mut config: PipelineConfig,
    date: Option<NaiveDate>,
    symbols: Vec<String>,
    backfill_days: Option<u32>,
    json: bool,
) -> Result<()> {
    if let Some(days) = backfill_days {
        config.lookback_days = days;
    }
    let request = RunRequest::new(date.unwrap_or_else(today)).with_symbols(symbols);
    let total = if request.symbols.is_empty() {
        config.symbols.len()
    } else {
        request.symbols.len()
    };

    let mut pipeline = Pipeline::from_config(&config)?;
    if !json {
        pipeline = pipeline.with_progress(Arc::new(StdoutProgress {
            total,
            done: AtomicUsize::new(0),
        }));
    }
    let summary = pipeline.run(&request)?;
    info!(
        run_id = %summary.run_id,
        succeeded = summary.count(RunStatus::Succeeded),
        partially_failed = summary.count(RunStatus::PartiallyFailed),
        failed = summary.count(RunStatus::Failed),
        "run finished"
    );

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    if !summary.is_success() {
        warn!(failed = ?summary.failed_symbols(), "run did not fully succeed");
        std::process::exit(1);
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!();
    println!("=== Run {} ({}) ===", summary.run_id, summary.run_date);
    println!(
        "{:<8} {:<16} {:>7} {:>8} {:>8} {:>8} {:>8}",
        "Symbol", "Status", "Fetched", "Inserted", "Updated", "Skipped", "Failed"
    );
    for r in &summary.results {
        println!(
            "{:<8} {:<16} {:>7} {:>8} {:>8} {:>8} {:>8}",
            r.symbol,
            r.status,
            r.counts.fetched,
            r.counts.inserted,
            r.counts.updated,
            r.counts.skipped_invalid,
            r.counts.sync_failed
        );
        for e in &r.errors {
            match e.date {
                Some(d) => println!("    {}/{} {d}: {}", e.stage, e.code, e.message),
                None => println!("    {}/{}: {}", e.stage, e.code, e.message),
            }
        }
    }
    let t = &summary.totals;
    println!(
        "Totals: fetched {}, archived {}, inserted {}, updated {}, skipped {}, sync failures {}",
        t.fetched, t.archived, t.inserted, t.updated, t.skipped_invalid, t.sync_failed
    );
    println!(
        "Succeeded {}, partially failed {}, failed {}",
        summary.count(RunStatus::Succeeded),
        summary.count(RunStatus::PartiallyFailed),
        summary.count(RunStatus::Failed)
    );
}

fn run_replay(config: PipelineConfig, symbol: &str, date: NaiveDate) -> Result<()> {
    let pipeline = Pipeline::from_config(&config)?;
    let result = pipeline.replay(symbol, date)?;
    info!(symbol = %result.symbol, %date, status = %result.status, "replay finished");
    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.status != RunStatus::Succeeded {
        std::process::exit(1);
    }
    Ok(())
}

// ── records ──────────────────────────────────────────────────────────

fn print_record(r: &CanonicalRecord) {
    println!(
        "{:<8} {} O {:>10} H {:>10} L {:>10} C {:>10} V {:>12}  ({})",
        r.symbol,
        r.date,
        r.open,
        r.high,
        r.low,
        r.close,
        r.volume,
        r.ingested_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
}

fn run_records(config: &PipelineConfig, action: RecordsAction) -> Result<()> {
    let store = open_store(config)?;
    let editor = ManualEditor::new(store.clone());

    match action {
        RecordsAction::List { symbol, start, end } => {
            let symbol = parse_symbol(&symbol)?;
            let range = DateRange::new(start.unwrap_or_default(), end.unwrap_or_else(today))?;
            let records = store.query(&symbol, &range)?;
            for r in &records {
                print_record(r);
            }
            println!("{} record(s)", records.len());
        }
        RecordsAction::Get { symbol, date } => {
            let symbol = parse_symbol(&symbol)?;
            match store.get(&symbol, date)? {
                Some(r) => print_record(&r),
                None => bail!("no record for {symbol} on {date}"),
            }
        }
        RecordsAction::Put {
            symbol,
            date,
            open,
            high,
            low,
            close,
            volume,
        } => {
            let record = CanonicalRecord {
                symbol: parse_symbol(&symbol)?,
                date,
                open,
                high,
                low,
                close,
                volume,
                ingested_at: chrono::Utc::now(),
            };
            let outcome = editor.create(record)?;
            println!("{outcome:?}");
        }
        RecordsAction::Amend {
            symbol,
            date,
            open,
            high,
            low,
            close,
            volume,
        } => {
            let patch = RecordPatch {
                open,
                high,
                low,
                close,
                volume,
            };
            if patch.is_empty() {
                bail!("nothing to amend: pass at least one of --open/--high/--low/--close/--volume");
            }
            let record = editor.amend(&parse_symbol(&symbol)?, date, &patch)?;
            print_record(&record);
        }
        RecordsAction::Delete { symbol, date } => {
            editor.delete(&parse_symbol(&symbol)?, date)?;
            println!("deleted");
        }
    }
    Ok(())
}

// ── archive / export / history ───────────────────────────────────────

fn run_archive_ls(config: &PipelineConfig, symbol: &str, date: NaiveDate) -> Result<()> {
    let symbol = parse_symbol(symbol)?;
    let source = match config.provider.kind {
        ProviderKind::Polygon => POLYGON_SOURCE,
        ProviderKind::Yahoo => YAHOO_SOURCE,
    };
    let archive = FsArchive::new(&config.archive.root);
    let locations = archive.list(source, symbol.as_str(), date)?;
    if locations.is_empty() {
        println!("No archived payloads for {symbol} on {date} under {}", archive.root().display());
    }
    for loc in &locations {
        println!("{loc}");
    }
    Ok(())
}

fn run_export(
    config: &PipelineConfig,
    output: &Path,
    format: ExportFormat,
    symbols: &[String],
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Result<()> {
    let store = open_store(config)?;
    let range = DateRange::new(start.unwrap_or_default(), end.unwrap_or_else(today))?;
    let symbols = if symbols.is_empty() {
        store.symbols()?
    } else {
        symbols
            .iter()
            .map(|s| parse_symbol(s))
            .collect::<Result<Vec<_>>>()?
    };

    let mut records = Vec::new();
    for symbol in &symbols {
        records.extend(store.query(symbol, &range)?);
    }
    let written = match format {
        ExportFormat::Parquet => write_parquet(&records, output)?,
        ExportFormat::Csv => write_csv(&records, output)?,
    };
    println!("Wrote {written} record(s) to {}", output.display());
    Ok(())
}

fn run_history(config: &PipelineConfig, limit: usize) -> Result<()> {
    let Some(path) = config.history.path.clone() else {
        bail!("no [history] path configured");
    };
    let entries = RunHistory::new(path).recent(limit)?;
    if entries.is_empty() {
        println!("No runs recorded yet.");
    }
    for s in &entries {
        println!(
            "{}  {}  {} ok / {} partial / {} failed  +{} ~{}",
            s.run_id,
            s.run_date,
            s.count(RunStatus::Succeeded),
            s.count(RunStatus::PartiallyFailed),
            s.count(RunStatus::Failed),
            s.totals.inserted,
            s.totals.updated
        );
    }
    Ok(())
}
