//! marketlake core: the building blocks of the daily ingestion pipeline.
//!
//! - Domain types (symbols, date ranges, raw payloads, canonical records)
//! - Provider client with retry, backoff and rate-limit cooldown
//! - Append-only raw archive with Hive-style partitions
//! - Normalizer that turns provider payloads into validated records
//! - Structured store with upsert-by-key and manual edits
//! - Parquet/CSV snapshot export

pub mod archive;
pub mod domain;
pub mod export;
pub mod fetch;
pub mod normalize;
pub mod store;

pub use domain::{CanonicalRecord, DateRange, RawPayload, Symbol, UpsertOutcome};
