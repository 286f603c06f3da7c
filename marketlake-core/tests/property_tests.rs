//! Property tests for normalizer and store invariants.
//!
//! 1. Validation soundness: every emitted record is ordered, positive and in range
//! 2. Purity: normalizing the same payload twice gives the same output
//! 3. Upsert idempotence: repeating a sequence of upserts never changes row count

use chrono::{DateTime, NaiveDate};
use marketlake_core::domain::{CanonicalRecord, DateRange, RawPayload, Symbol, UpsertOutcome};
use marketlake_core::fetch::POLYGON_SOURCE;
use marketlake_core::normalize::Normalizer;
use marketlake_core::store::{RecordStore, SqliteStore};
use proptest::prelude::*;
use rust_decimal::Decimal;

const DAY_MS: i64 = 86_400_000;
const JAN_2_MS: i64 = 1_704_171_600_000; // 2024-01-02 05:00 UTC

fn jan(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

// ── Strategies (proptest) ────────────────────────────────────────────

/// A field that may be absent, non-numeric, or any float including garbage.
fn arb_field() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => (-50.0..500.0_f64).prop_map(|v| format!("{v:.2}")),
        1 => Just("null".to_string()),
        1 => Just("0".to_string()),
        1 => Just("\"n/a\"".to_string()),
    ]
}

fn arb_row() -> impl Strategy<Value = String> {
    (
        0..12_i64,
        arb_field(),
        arb_field(),
        arb_field(),
        arb_field(),
        prop_oneof![
            (0..10_000_000_u64).prop_map(|v| v.to_string()),
            Just("-5".to_string()),
            Just("null".to_string())
        ],
    )
        .prop_map(|(day, o, h, l, c, v)| {
            format!(
                r#"{{"t":{},"o":{o},"h":{h},"l":{l},"c":{c},"v":{v}}}"#,
                JAN_2_MS + day * DAY_MS
            )
        })
}

fn arb_payload() -> impl Strategy<Value = RawPayload> {
    proptest::collection::vec(arb_row(), 0..15).prop_map(|rows| RawPayload {
        symbol: Symbol::parse("AAPL").unwrap(),
        range: DateRange::new(jan(2), jan(8)).unwrap(),
        fetched_at: DateTime::from_timestamp(1_704_240_000, 0).unwrap(),
        source: POLYGON_SOURCE.to_string(),
        body: format!(r#"{{"ticker":"AAPL","results":[{}]}}"#, rows.join(",")).into_bytes(),
    })
}

fn arb_record() -> impl Strategy<Value = CanonicalRecord> {
    (
        prop::sample::select(vec!["AAPL", "MSFT", "NVDA"]),
        2..6_u32,
        1_000..20_000_i64,
        0..500_i64,
        0..500_i64,
        0..1_000_000_u64,
    )
        .prop_map(|(sym, day, low_cents, spread, close_off, volume)| {
            let low = Decimal::new(low_cents, 2);
            let high = Decimal::new(low_cents + spread, 2);
            let close = Decimal::new(low_cents + close_off.min(spread), 2);
            CanonicalRecord {
                symbol: Symbol::parse(sym).unwrap(),
                date: jan(day),
                open: low,
                high,
                low,
                close,
                volume,
                ingested_at: DateTime::from_timestamp(1_704_240_000, 0).unwrap(),
            }
        })
}

// ── 1. Validation soundness ──────────────────────────────────────────

proptest! {
    /// Whatever the payload, accepted records satisfy every record invariant
    /// and each observation is either accepted or rejected, never both.
    #[test]
    fn emitted_records_are_sound(payload in arb_payload()) {
        let out = Normalizer::with_default_decoders().normalize(&payload);
        for r in &out.records {
            prop_assert!(r.is_ordered(), "{r:?}");
            prop_assert!(r.low > Decimal::ZERO);
            prop_assert!(payload.range.contains(r.date));
            prop_assert_eq!(&r.symbol, &payload.symbol);
        }
        let mut dates: Vec<_> = out.records.iter().map(|r| r.date).collect();
        dates.sort();
        dates.dedup();
        prop_assert_eq!(dates.len(), out.records.len());
    }

    // ── 2. Purity ────────────────────────────────────────────────────

    #[test]
    fn normalize_is_pure(payload in arb_payload()) {
        let n = Normalizer::with_default_decoders();
        prop_assert_eq!(n.normalize(&payload), n.normalize(&payload));
    }

    // ── 3. Upsert idempotence ────────────────────────────────────────

    /// Applying a batch twice leaves the same rows, and the second pass
    /// only ever updates.
    #[test]
    fn upsert_batch_twice_is_idempotent(records in proptest::collection::vec(arb_record(), 1..30)) {
        let store = SqliteStore::open_in_memory().unwrap();
        for r in &records {
            store.upsert(r).unwrap();
        }
        let rows_after_first = store.count().unwrap();

        for r in &records {
            prop_assert_eq!(store.upsert(r).unwrap(), UpsertOutcome::Updated);
        }
        prop_assert_eq!(store.count().unwrap(), rows_after_first);

        let mut keys: Vec<_> = records.iter().map(|r| (r.symbol.clone(), r.date)).collect();
        keys.sort();
        keys.dedup();
        prop_assert_eq!(rows_after_first, keys.len());

        // Last write wins for each key.
        for (symbol, date) in keys {
            let last = records.iter().rev().find(|r| r.symbol == symbol && r.date == date).unwrap();
            let stored = store.get(&symbol, date).unwrap();
            prop_assert_eq!(stored.as_ref(), Some(last));
        }
    }
}
