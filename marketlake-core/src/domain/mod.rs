//! Domain types shared by every stage of the ingestion pipeline.

pub mod payload;
pub mod range;
pub mod record;
pub mod symbol;

pub use payload::RawPayload;
pub use range::{DateRange, RangeError};
pub use record::{CanonicalRecord, UpsertOutcome};
pub use symbol::{Symbol, SymbolError};
