//! Performance benchmarks for the portfolio backtester.
//!
//! Run with: cargo bench

use chrono::{Duration, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cryptofolio::data::compute_returns;
use cryptofolio::engine::{BacktestConfig, Backtester};
use cryptofolio::optimizer::{estimate_statistics, PortfolioOptimizer};
use cryptofolio::types::{PriceTable, WeightBounds};

const TICKERS: [&str; 5] = ["BTC-USD", "ETH-USD", "ADA-USD", "SOL-USD", "XRP-USD"];

/// Generate an aligned price table of deterministic, trending closes.
fn generate_prices(days: usize) -> PriceTable {
    let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let dates = (0..days).map(|i| start + Duration::days(i as i64)).collect();
    let rows = (0..days)
        .map(|i| {
            let t = i as f64;
            TICKERS
                .iter()
                .enumerate()
                .map(|(k, _)| {
                    let k = k as f64;
                    let drift = 0.001 + 0.0004 * k;
                    let wave = 0.05 * (t / (7.0 + 5.0 * k)).sin();
                    100.0 * (drift * t + wave).exp()
                })
                .collect()
        })
        .collect();
    PriceTable::new(TICKERS.iter().map(|t| t.to_string()).collect(), dates, rows).unwrap()
}

fn tickers() -> Vec<String> {
    TICKERS.iter().map(|t| t.to_string()).collect()
}

/// Benchmark the estimation and solve of one rebalance.
fn bench_optimizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("optimizer");

    for days in [90, 365, 1095].iter() {
        let returns = compute_returns(&generate_prices(*days + 1)).unwrap();

        group.bench_with_input(
            BenchmarkId::new("estimate_statistics", days),
            returns.rows(),
            |b, window| b.iter(|| estimate_statistics(&tickers(), black_box(window))),
        );

        let optimizer = PortfolioOptimizer::default();
        let bounds = WeightBounds::new(0.05, 0.5);
        group.bench_with_input(
            BenchmarkId::new("max_sharpe", days),
            returns.rows(),
            |b, window| b.iter(|| optimizer.optimize(&tickers(), black_box(window), &bounds, 0.02)),
        );
    }

    group.finish();
}

/// Benchmark full simulations over aligned prices.
fn bench_backtest(c: &mut Criterion) {
    let mut group = c.benchmark_group("backtest");
    group.sample_size(20);

    for days in [365, 1095].iter() {
        let prices = generate_prices(*days);
        let config = BacktestConfig {
            tickers: tickers(),
            start_date: prices.dates()[0],
            end_date: prices.dates()[prices.len() - 1],
            ..Default::default()
        };
        let backtester = Backtester::new(config).unwrap();

        group.bench_with_input(BenchmarkId::new("run_prices", days), &prices, |b, prices| {
            b.iter(|| backtester.run_prices(black_box(prices), &tickers()))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_optimizer, bench_backtest);

criterion_main!(benches);
