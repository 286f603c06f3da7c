//! Property: running the same request repeatedly converges to one row per
//! (symbol, date) holding the latest fetched values.

mod common;

use common::*;
use marketlake_core::store::RecordStore;
use marketlake_core::Symbol;
use marketlake_runner::{RunRequest, RunStatus};
use proptest::prelude::*;

fn arb_bar() -> impl Strategy<Value = (f64, f64, f64, u64)> {
    (10.0..500.0_f64, 0.0..5.0_f64, 0.0..1.0_f64, 0..10_000_000_u64).prop_map(
        |(low, spread, frac, volume)| {
            let low = (low * 100.0).round() / 100.0;
            let high = ((low + spread) * 100.0).round() / 100.0;
            let close = ((low + (high - low) * frac) * 100.0).round() / 100.0;
            (low, high, close, volume)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn repeated_runs_are_idempotent(
        bars in proptest::collection::vec(arb_bar(), 1..4),
        runs in 1..4_usize,
    ) {
        let mut h = Harness::new();
        h.config.lookback_days = 6;
        let pipeline = h.pipeline();
        let run_date = jan(8);

        for (low, high, close, volume) in bars.iter().take(runs) {
            let rows: Vec<String> = (2..=5)
                .map(|day| bar(day, *low, *high, *low, *close, *volume))
                .collect();
            h.market.ok("AAPL", polygon_body("AAPL", &rows));

            let summary = pipeline
                .run(&RunRequest::new(run_date).with_symbols(["AAPL"]))
                .unwrap();
            let r = summary.result("AAPL").unwrap();
            prop_assert_eq!(r.status, RunStatus::Succeeded);
            prop_assert_eq!(r.counts.synced(), 4);
            prop_assert_eq!(h.store.count().unwrap(), 4);
        }

        let last = bars.iter().take(runs).last().unwrap();
        let aapl = Symbol::parse("AAPL").unwrap();
        for day in 2..=5 {
            let stored = h.store.get(&aapl, jan(day)).unwrap().unwrap();
            prop_assert_eq!(stored.volume, last.3);
        }
    }
}
