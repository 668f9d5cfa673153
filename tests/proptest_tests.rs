//! Property-based tests using proptest.
//!
//! These tests verify that:
//! 1. Weight vectors produced by the solver and the simulator always sum to
//!    one and respect the per-asset bounds
//! 2. Quarter triggers fire exactly once per calendar quarter
//! 3. Metrics and VaR stay finite on arbitrary return paths

use chrono::{Duration, NaiveDate};
use proptest::prelude::*;

use cryptofolio::analytics::{quantile, value_at_risk, PerformanceMetrics};
use cryptofolio::optimizer::{
    estimate_statistics, ClarabelSolver, MeanVarianceSolver, PortfolioOptimizer,
};
use cryptofolio::simulator::{rebalance_days, RebalancingSimulator, SimulationParams};
use cryptofolio::types::{
    quarter_of, ReturnsTable, ValueSeries, WeightBounds, WeightVector, WEIGHT_TOLERANCE,
};

fn dates_from(start: NaiveDate, days: usize) -> Vec<NaiveDate> {
    (0..days).map(|i| start + Duration::days(i as i64)).collect()
}

/// Daily returns for `n` assets, bounded to plausible crypto moves.
fn returns_matrix(n: usize, days: usize) -> impl Strategy<Value = Vec<Vec<f64>>> {
    prop::collection::vec(prop::collection::vec(-0.15..0.15f64, n), days)
}

/// Feasible (min, max) pairs for `n` assets.
fn feasible_bounds(n: usize) -> impl Strategy<Value = WeightBounds> {
    let cap = 1.0 / n as f64;
    (0.0..cap, cap..1.0f64).prop_map(|(min, max)| WeightBounds::new(min, max))
}

// ============================================================================
// Weight invariants
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn clamped_weights_are_normalized_and_bounded(
        (raw, bounds) in (2usize..8).prop_flat_map(|n| {
            (prop::collection::vec(-0.2..1.2f64, n), feasible_bounds(n))
        }),
    ) {
        let w = WeightVector::new(raw).normalized_within(&bounds).unwrap();
        prop_assert!(w.is_normalized(WEIGHT_TOLERANCE));
        prop_assert!(w.is_within(&bounds, WEIGHT_TOLERANCE));
    }

    #[test]
    fn max_sharpe_weights_respect_bounds(
        (window, bounds) in (2usize..5).prop_flat_map(|n| (returns_matrix(n, 40), feasible_bounds(n))),
    ) {
        let n = window[0].len();
        let tickers: Vec<String> = (0..n).map(|i| format!("A{}", i)).collect();
        let stats = estimate_statistics(&tickers, &window).unwrap();

        if let Some(w) = ClarabelSolver::default().solve_max_sharpe(&stats, &bounds, 0.02) {
            prop_assert_eq!(w.len(), n);
            prop_assert!(w.is_normalized(WEIGHT_TOLERANCE));
            prop_assert!(w.is_within(&bounds, WEIGHT_TOLERANCE));
        }
    }

    #[test]
    fn simulated_weights_always_valid(
        (rows, bounds) in (2usize..4).prop_flat_map(|n| (returns_matrix(n, 200), feasible_bounds(n))),
    ) {
        let n = rows[0].len();
        let tickers: Vec<String> = (0..n).map(|i| format!("A{}", i)).collect();
        let dates = dates_from(NaiveDate::from_ymd_opt(2022, 2, 10).unwrap(), rows.len());
        let returns = ReturnsTable::new(tickers, dates, rows).unwrap();

        let optimizer = PortfolioOptimizer::default();
        let params = SimulationParams { bounds, ..Default::default() };
        let out = RebalancingSimulator::new(&optimizer, params).run(&returns, 1_000.0).unwrap();

        prop_assert_eq!(out.weights.len(), returns.len());
        for w in out.weights.rows() {
            prop_assert!(w.is_normalized(WEIGHT_TOLERANCE));
            prop_assert!(w.is_within(&bounds, WEIGHT_TOLERANCE));
        }
        for v in out.values.values() {
            prop_assert!(v.is_finite() && *v > 0.0);
        }
    }
}

// ============================================================================
// Rebalance schedule
// ============================================================================

proptest! {
    #[test]
    fn one_trigger_per_quarter(start_offset in 0i64..2000, days in 1usize..800) {
        let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap() + Duration::days(start_offset);
        let dates = dates_from(start, days);
        let triggers = rebalance_days(&dates);

        let mut quarters: Vec<(i32, u32)> = dates.iter().map(|d| quarter_of(*d)).collect();
        quarters.dedup();
        prop_assert_eq!(triggers.len(), quarters.len());
        prop_assert_eq!(triggers[0], 0);
        for &i in &triggers[1..] {
            prop_assert_ne!(quarter_of(dates[i]), quarter_of(dates[i - 1]));
        }
    }

    #[test]
    fn sparse_dates_still_trigger_on_quarter_change(gaps in prop::collection::vec(1i64..200, 1..30)) {
        let mut dates = vec![NaiveDate::from_ymd_opt(2020, 1, 1).unwrap()];
        for g in gaps {
            let next = *dates.last().unwrap() + Duration::days(g);
            dates.push(next);
        }
        let triggers = rebalance_days(&dates);
        for i in 1..dates.len() {
            let changed = quarter_of(dates[i]) != quarter_of(dates[i - 1]);
            prop_assert_eq!(triggers.contains(&i), changed);
        }
    }
}

// ============================================================================
// Metrics
// ============================================================================

proptest! {
    #[test]
    fn quantile_stays_within_sample_range(values in prop::collection::vec(-1.0..1.0f64, 1..200), q in 0.0..=1.0f64) {
        let v = quantile(&values, q).unwrap();
        let lo = values.iter().cloned().fold(f64::INFINITY, f64::min);
        let hi = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(v >= lo - 1e-12 && v <= hi + 1e-12);
    }

    #[test]
    fn var_value_scales_with_last_value(
        returns in prop::collection::vec(-0.2..0.2f64, 2..300),
        last_value in 1.0..1e6f64,
    ) {
        let var = value_at_risk(&returns, 0.95, last_value);
        prop_assert!(var.var_percent.is_finite());
        prop_assert!(var.var_value >= 0.0);
        prop_assert!((var.var_value - var.var_percent.abs() * last_value).abs() < 1e-6 * last_value);
    }

    #[test]
    fn metrics_finite_on_any_path(returns in prop::collection::vec(-0.5..0.5f64, 1..400)) {
        let dates = dates_from(NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(), returns.len());
        let series = ValueSeries::compound(dates, &returns, 10_000.0).unwrap();
        let m = PerformanceMetrics::from_values(&series, 0.02);

        prop_assert!(m.total_return.is_finite());
        prop_assert!(m.total_return > -1.0);
        prop_assert!(m.annualized_volatility >= 0.0);
        prop_assert!(m.sharpe_ratio.is_finite());
    }
}
