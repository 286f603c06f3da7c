//! marketlake runner: configuration and coordination of daily ingestion runs.
//!
//! This crate builds on `marketlake-core` to provide:
//! - TOML pipeline configuration with validation
//! - Per-symbol units of work on a bounded worker pool
//! - Run results, summaries and a JSONL run history
//! - Archive replay without refetching
//! - Logging setup

pub mod config;
pub mod coordinator;
pub mod history;
pub mod logging;
pub mod result;

pub use config::{ConfigError, PipelineConfig, ProviderKind};
pub use coordinator::{CancelHandle, Pipeline, PipelineError, RunProgress, RunRequest};
pub use history::RunHistory;
pub use result::{ErrorDescriptor, RunResult, RunStatus, RunSummary, Stage, UnitCounts};
