//! Property-based tests using proptest for invariant testing.
//!
//! These tests verify that:
//! 1. Emitted rows never depend on later input
//! 2. Rolling windows grow to their width and stay there
//! 3. Ranking is an ordered permutation of the z-scores
//! 4. Positions are hedged and the strategy return is weight-normalized
//! 5. Entry and exit never trigger on the same row when exit < entry
//! 6. Aggregation is a pure function of its inputs

use proptest::prelude::*;

use trispread::engine::{run_backtest, BacktestConfig};
use trispread::rank::rank_row;
use trispread::returns::{aggregate_returns, strategy_return, PositionTiming};
use trispread::rolling::{RollingZScore, StdConvention, StreamingIndicator};
use trispread::signal::{generate_positions, PersistentPolicy, PolicyKind};
use trispread::types::{AlignedRow, Position, PositionState, ZScoreRow};

// ============================================================================
// Generators
// ============================================================================

fn price_feed(max_len: usize) -> impl Strategy<Value = Vec<AlignedRow>> {
    prop::collection::vec((90.0..110.0f64, 90.0..110.0f64, 90.0..110.0f64), 2..max_len).prop_map(
        |prices| {
            prices
                .into_iter()
                .enumerate()
                .map(|(i, (a, b, c))| AlignedRow::new(i as i64 * 60, [a, b, c]))
                .collect()
        },
    )
}

fn position() -> impl Strategy<Value = Position> {
    prop_oneof![Just(Position::Short), Just(Position::Flat), Just(Position::Long)]
}

fn position_state() -> impl Strategy<Value = PositionState> {
    [position(), position(), position()].prop_map(PositionState::new)
}

fn backtest_config() -> impl Strategy<Value = BacktestConfig> {
    (
        2usize..20,
        0.0..0.5f64,
        0.1..2.5f64,
        0.0..1.0f64,
        prop_oneof![Just(PolicyKind::Persistent), Just(PolicyKind::Stateless)],
    )
        .prop_map(|(window, warmup, entry, exit_frac, policy)| BacktestConfig {
            window_width: window,
            warmup_fraction: warmup,
            entry_threshold: entry,
            exit_threshold: entry * exit_frac,
            policy,
            ..Default::default()
        })
}

// ============================================================================
// Engine Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_causality(rows in price_feed(80), config in backtest_config(), cut in 0.0..1.0f64) {
        let full = run_backtest(config.clone(), &rows).unwrap();
        let cutoff = ((rows.len() as f64) * cut) as usize;
        let prefix = run_backtest(config, &rows[..cutoff]).unwrap();

        let expected: Vec<_> = full
            .rows
            .iter()
            .filter(|r| r.timestamp < rows.get(cutoff).map_or(i64::MAX, |x| x.timestamp))
            .copied()
            .collect();
        prop_assert_eq!(prefix.rows, expected);
    }

    #[test]
    fn prop_row_accounting(rows in price_feed(80), config in backtest_config()) {
        let result = run_backtest(config, &rows).unwrap();
        let s = result.stats;
        prop_assert_eq!(s.input_rows, rows.len());
        prop_assert_eq!(
            s.undefined_rows + s.warmup_rows + s.flagged_rows + s.emitted_rows,
            s.input_rows
        );
        prop_assert_eq!(result.rows.len(), s.emitted_rows);
        if let Some(first) = result.rows.first() {
            prop_assert_eq!(first.strategy_return, 0.0);
            prop_assert_eq!(first.baseline_return, 0.0);
        }
    }

    #[test]
    fn prop_persistent_positions_are_hedged(rows in price_feed(80), config in backtest_config()) {
        let config = BacktestConfig { policy: PolicyKind::Persistent, ..config };
        let result = run_backtest(config, &rows).unwrap();
        for row in &result.rows {
            let legs = row.positions.legs;
            if !row.positions.is_flat() {
                prop_assert!(legs.contains(&Position::Short));
                prop_assert!(legs.contains(&Position::Long));
            }
        }
    }
}

// ============================================================================
// Component Properties
// ============================================================================

proptest! {
    #[test]
    fn prop_window_growth(prices in prop::collection::vec(1.0..1000.0f64, 1..200), window in 1usize..50) {
        let mut z = RollingZScore::new(window, StdConvention::Sample);
        for (i, &p) in prices.iter().enumerate() {
            z.update(p);
            prop_assert_eq!(z.len(), (i + 1).min(window));
            let stat = z.stat().unwrap();
            prop_assert_eq!(stat.samples, (i + 1).min(window));
            prop_assert!(stat.std_dev.is_nan() || stat.std_dev >= 0.0);
        }
    }

    #[test]
    fn prop_rank_ordering(a in -10.0..10.0f64, b in -10.0..10.0f64, c in -10.0..10.0f64) {
        let row = rank_row(&ZScoreRow { timestamp: 0, z: [a, b, c] });
        prop_assert!(row.smallest <= row.middle);
        prop_assert!(row.middle <= row.largest);

        let mut sorted = [a, b, c];
        sorted.sort_by(f64::total_cmp);
        prop_assert_eq!([row.smallest, row.middle, row.largest], sorted);
        prop_assert!(row.spread() >= 0.0);
    }

    #[test]
    fn prop_entry_exit_exclusive(
        a in -5.0..5.0f64,
        b in -5.0..5.0f64,
        c in -5.0..5.0f64,
        entry in 0.0..3.0f64,
        exit_frac in 0.0..1.0f64,
    ) {
        let policy = PersistentPolicy::new(entry, entry * exit_frac);
        let row = rank_row(&ZScoreRow { timestamp: 0, z: [a, b, c] });
        let (enter, exit) = policy.triggers(&row);
        prop_assert!(!(enter && exit));
    }

    #[test]
    fn prop_weight_normalization(
        state in position_state(),
        returns in [-0.5..0.5f64, -0.5..0.5f64, -0.5..0.5f64],
    ) {
        let r = strategy_return(&state, &returns);
        if state.is_flat() {
            prop_assert_eq!(r, 0.0);
        } else {
            let bound = returns.iter().fold(0.0f64, |m, x| m.max(x.abs()));
            prop_assert!(r.abs() <= bound + 1e-12);

            let weighted: f64 = state
                .weights()
                .iter()
                .zip(&returns)
                .map(|(&w, &x)| f64::from(w) * x)
                .sum();
            prop_assert!((r * f64::from(state.total_weight()) - weighted).abs() < 1e-12);
        }
    }

    #[test]
    fn prop_aggregation_idempotent(rows in price_feed(50), z in prop::collection::vec(
        (-3.0..3.0f64, -3.0..3.0f64, -3.0..3.0f64), 50)
    ) {
        let ranked: Vec<_> = rows
            .iter()
            .zip(&z)
            .map(|(r, &(a, b, c))| rank_row(&ZScoreRow { timestamp: r.timestamp, z: [a, b, c] }))
            .collect();
        let policy = PersistentPolicy::new(1.0, 0.2);
        let positions = generate_positions(&ranked, &policy);
        let rows = &rows[..positions.len()];

        for timing in [PositionTiming::SameRow, PositionTiming::Lagged] {
            let first = aggregate_returns(rows, &positions, timing).unwrap();
            let second = aggregate_returns(rows, &positions, timing).unwrap();
            prop_assert_eq!(&first, &second);

            let sum: f64 = first.iter().map(|r| r.strategy_log_return).sum();
            let last = first.last().map_or(0.0, |r| r.cumulative_strategy);
            prop_assert!((sum - last).abs() < 1e-9);
        }
    }
}
