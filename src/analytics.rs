//! Performance analytics and reporting.

use crate::report::ReportBundle;
use crate::simulator::RebalanceEvent;
use crate::types::{ValueSeries, TRADING_DAYS_PER_YEAR};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tabled::{builder::Builder, settings::Style};

/// Days per year used to turn a calendar span into years.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Mean of a slice; 0 when empty.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator); 0 with fewer than two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let var = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    var.sqrt()
}

/// Empirical quantile with linear interpolation between order statistics.
///
/// Position `q * (n - 1)` in the sorted sample; `None` for an empty sample.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Headline metrics of a value series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// last / first - 1.
    pub total_return: f64,
    /// Geometric annualization over the calendar span.
    pub annualized_return: f64,
    /// Sample std of daily changes x sqrt(252).
    pub annualized_volatility: f64,
    /// (annualized return - risk-free) / volatility, 0 at zero volatility.
    pub sharpe_ratio: f64,
}

impl PerformanceMetrics {
    /// Metrics of a value series. Series too short to have a daily change,
    /// or starting at zero, yield all zeros.
    pub fn from_values(series: &ValueSeries, risk_free_rate: f64) -> Self {
        let changes = series.pct_change();
        let (first, last) = match (series.first(), series.last()) {
            (Some((_, first)), Some((_, last))) => (first, last),
            _ => return Self::default(),
        };
        if changes.is_empty() || first == 0.0 {
            return Self::default();
        }

        let total_return = last / first - 1.0;
        let years = (series.span_days() as f64 / DAYS_PER_YEAR).max(1.0 / DAYS_PER_YEAR);
        let annualized_return = (1.0 + total_return).powf(1.0 / years) - 1.0;
        let annualized_volatility = sample_std(&changes) * TRADING_DAYS_PER_YEAR.sqrt();
        let sharpe_ratio = if annualized_volatility != 0.0 {
            (annualized_return - risk_free_rate) / annualized_volatility
        } else {
            0.0
        };

        Self {
            total_return,
            annualized_return,
            annualized_volatility,
            sharpe_ratio,
        }
    }
}

/// Historical Value-at-Risk of daily returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VarResult {
    pub confidence: f64,
    /// The (1 - confidence) quantile of daily returns, usually negative.
    pub var_percent: f64,
    /// Loss amount at the final portfolio value.
    pub var_value: f64,
}

/// Historical VaR of `daily_returns` at `confidence`, scaled by `last_value`.
pub fn value_at_risk(daily_returns: &[f64], confidence: f64, last_value: f64) -> VarResult {
    match quantile(daily_returns, 1.0 - confidence) {
        Some(var_percent) => VarResult {
            confidence,
            var_percent,
            var_value: last_value * var_percent.abs(),
        },
        None => VarResult {
            confidence,
            ..VarResult::default()
        },
    }
}

/// Portfolio measured against the buy-and-hold benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelativeMetrics {
    pub benchmark: String,
    /// Annualized Jensen's alpha.
    pub alpha: f64,
    pub beta: f64,
    pub correlation: f64,
    /// Annualized std of daily excess returns.
    pub tracking_error: f64,
    pub information_ratio: f64,
    /// Share of benchmark up-day gains captured (1.0 = all).
    pub up_capture: f64,
    /// Share of benchmark down-day losses taken (1.0 = all).
    pub down_capture: f64,
    /// Compounded portfolio return minus compounded benchmark return.
    pub excess_return: f64,
}

impl RelativeMetrics {
    /// Relative metrics of two aligned daily return series.
    pub fn calculate(
        benchmark: impl Into<String>,
        portfolio_returns: &[f64],
        benchmark_returns: &[f64],
        risk_free_rate: f64,
    ) -> Option<Self> {
        if portfolio_returns.is_empty() || portfolio_returns.len() != benchmark_returns.len() {
            return None;
        }

        let n = portfolio_returns.len() as f64;
        let port_mean = mean(portfolio_returns);
        let bench_mean = mean(benchmark_returns);

        let covariance = portfolio_returns
            .iter()
            .zip(benchmark_returns)
            .map(|(p, b)| (p - port_mean) * (b - bench_mean))
            .sum::<f64>()
            / n;
        let bench_variance = benchmark_returns
            .iter()
            .map(|b| (b - bench_mean).powi(2))
            .sum::<f64>()
            / n;
        let port_variance = portfolio_returns
            .iter()
            .map(|p| (p - port_mean).powi(2))
            .sum::<f64>()
            / n;

        let beta = if bench_variance > 0.0 {
            covariance / bench_variance
        } else {
            0.0
        };

        let annualize = |daily: f64| (1.0 + daily).powf(TRADING_DAYS_PER_YEAR) - 1.0;
        let alpha = (annualize(port_mean) - risk_free_rate)
            - beta * (annualize(bench_mean) - risk_free_rate);

        let denom = port_variance.sqrt() * bench_variance.sqrt();
        let correlation = if denom > 0.0 { covariance / denom } else { 0.0 };

        let excess: Vec<f64> = portfolio_returns
            .iter()
            .zip(benchmark_returns)
            .map(|(p, b)| p - b)
            .collect();
        let excess_mean = mean(&excess);
        let tracking_error = (excess
            .iter()
            .map(|e| (e - excess_mean).powi(2))
            .sum::<f64>()
            / n)
            .sqrt()
            * TRADING_DAYS_PER_YEAR.sqrt();
        let information_ratio = if tracking_error > 0.0 {
            excess_mean * TRADING_DAYS_PER_YEAR / tracking_error
        } else {
            0.0
        };

        let (up_capture, down_capture) = Self::capture_ratios(portfolio_returns, benchmark_returns);

        let compound = |r: &[f64]| r.iter().fold(1.0, |acc, x| acc * (1.0 + x)) - 1.0;

        Some(Self {
            benchmark: benchmark.into(),
            alpha,
            beta,
            correlation,
            tracking_error,
            information_ratio,
            up_capture,
            down_capture,
            excess_return: compound(portfolio_returns) - compound(benchmark_returns),
        })
    }

    fn capture_ratios(portfolio_returns: &[f64], benchmark_returns: &[f64]) -> (f64, f64) {
        let ratio = |keep: fn(f64) -> bool| {
            let (port, bench) = portfolio_returns
                .iter()
                .zip(benchmark_returns)
                .filter(|(_, b)| keep(**b))
                .fold((0.0, 0.0), |(p_acc, b_acc), (p, b)| (p_acc + p, b_acc + b));
            if bench != 0.0 {
                port / bench
            } else {
                1.0
            }
        };
        (ratio(|b| b > 0.0), ratio(|b| b < 0.0))
    }
}

/// Format results for terminal display.
pub struct ResultFormatter;

impl ResultFormatter {
    /// Print the full report to stdout.
    pub fn print_report(bundle: &ReportBundle) {
        let config = &bundle.config;

        println!();
        println!("{}", "═".repeat(60).blue());
        println!("{}", " PORTFOLIO BACKTEST ".bold().blue());
        println!("{}", "═".repeat(60).blue());
        println!();

        println!("{}", "Overview".bold().underline());
        println!("  Assets:          {}", config.tickers.join(", "));
        println!("  Benchmark:       {}", config.benchmark);
        println!(
            "  Period:          {} to {}",
            config.start_date, config.end_date
        );
        println!("  Trading Days:    {}", bundle.portfolio_values.len());
        println!(
            "  Bounds:          {:.1}% .. {:.1}% per asset",
            config.min_weight * 100.0,
            config.max_weight * 100.0
        );
        println!("  Run:             {}", bundle.metadata.run_id);
        println!();

        let final_value = bundle
            .portfolio_values
            .last()
            .map(|(_, v)| v)
            .unwrap_or(config.initial_capital);
        let bench_final = bundle
            .benchmark_values
            .last()
            .map(|(_, v)| v)
            .unwrap_or(config.initial_capital);

        println!("{}", "Performance".bold().underline());
        println!("  Initial Capital: ${:>12.2}", config.initial_capital);
        println!(
            "  Final Value:     ${:>12.2}  {}",
            final_value,
            Self::format_pct_change(bundle.portfolio_metrics.total_return * 100.0)
        );
        println!(
            "  Benchmark Value: ${:>12.2}  {}",
            bench_final,
            Self::format_pct_change(bundle.benchmark_metrics.total_return * 100.0)
        );
        println!();

        let mut builder = Builder::new();
        builder.push_record(["Metric", "Portfolio", "Benchmark"]);
        let rows: [(&str, f64, f64, bool); 4] = [
            (
                "Total Return",
                bundle.portfolio_metrics.total_return,
                bundle.benchmark_metrics.total_return,
                true,
            ),
            (
                "Annual Return",
                bundle.portfolio_metrics.annualized_return,
                bundle.benchmark_metrics.annualized_return,
                true,
            ),
            (
                "Volatility",
                bundle.portfolio_metrics.annualized_volatility,
                bundle.benchmark_metrics.annualized_volatility,
                true,
            ),
            (
                "Sharpe Ratio",
                bundle.portfolio_metrics.sharpe_ratio,
                bundle.benchmark_metrics.sharpe_ratio,
                false,
            ),
        ];
        for (name, port, bench, pct) in rows {
            let fmt = |v: f64| {
                if pct {
                    format!("{:.2}%", v * 100.0)
                } else {
                    format!("{:.2}", v)
                }
            };
            builder.push_record([name.to_string(), fmt(port), fmt(bench)]);
        }
        println!("{}", builder.build().with(Style::rounded()).to_string());
        println!();

        println!("{}", "Risk".bold().underline());
        println!(
            "  VaR ({:.0}%, 1d):   {:>10.2}%  (${:.2})",
            bundle.var.confidence * 100.0,
            bundle.var.var_percent * 100.0,
            bundle.var.var_value
        );
        println!();

        if let Some(rel) = &bundle.relative {
            Self::print_relative(rel);
        }

        Self::print_rebalances(&bundle.events, &bundle.config.tickers);

        let diag = &bundle.diagnostics;
        if diag.is_clean() {
            println!("  {}", "All rebalances solved".green());
        } else {
            println!(
                "  {}",
                format!(
                    "{} infeasible, {} min-variance fallbacks{}",
                    diag.infeasible,
                    diag.fallback_min_variance,
                    if diag.equal_weight_fallback {
                        ", equal weights held"
                    } else {
                        ""
                    }
                )
                .yellow()
            );
        }
        if diag.backfilled_days > 0 {
            println!(
                "  {}",
                format!(
                    "{} leading days use the first computed weights",
                    diag.backfilled_days
                )
                .yellow()
            );
        }
        println!();
        println!("{}", "═".repeat(60).blue());
    }

    /// Format percentage change with color.
    fn format_pct_change(pct: f64) -> String {
        if pct >= 0.0 {
            format!("(+{:.2}%)", pct).green().to_string()
        } else {
            format!("({:.2}%)", pct).red().to_string()
        }
    }

    /// Print portfolio-vs-benchmark metrics.
    pub fn print_relative(metrics: &RelativeMetrics) {
        println!(
            "{}",
            format!("Versus {}", metrics.benchmark).bold().underline()
        );
        println!(
            "  Excess Return:    {:>10.2}%  {}",
            metrics.excess_return * 100.0,
            Self::format_pct_change(metrics.excess_return * 100.0)
        );
        println!("  Alpha:            {:>10.2}%", metrics.alpha * 100.0);
        println!("  Beta:             {:>10.2}", metrics.beta);
        println!("  Correlation:      {:>10.2}", metrics.correlation);
        println!("  Tracking Error:   {:>10.2}%", metrics.tracking_error * 100.0);
        println!("  Information Ratio:{:>10.2}", metrics.information_ratio);
        println!("  Up Capture:       {:>10.2}%", metrics.up_capture * 100.0);
        println!("  Down Capture:     {:>10.2}%", metrics.down_capture * 100.0);
        println!();
    }

    /// Table of trigger days and the weights adopted on each.
    pub fn rebalance_table(events: &[RebalanceEvent], tickers: &[String]) -> String {
        let mut builder = Builder::new();
        let mut header = vec!["Date".to_string(), "Obs".to_string(), "Outcome".to_string()];
        header.extend(tickers.iter().cloned());
        builder.push_record(header);

        for event in events {
            let mut record = vec![
                event.date.to_string(),
                event.observations.to_string(),
                event.outcome.label().to_string(),
            ];
            match &event.weights {
                Some(w) => record.extend(w.as_slice().iter().map(|x| format!("{:.1}%", x * 100.0))),
                None => record.extend(tickers.iter().map(|_| "-".to_string())),
            }
            builder.push_record(record);
        }

        builder.build().with(Style::rounded()).to_string()
    }

    pub fn print_rebalances(events: &[RebalanceEvent], tickers: &[String]) {
        println!("{}", "Rebalances".bold().underline());
        println!("{}", Self::rebalance_table(events, tickers));
        println!();
    }

    /// Export the report to JSON.
    pub fn to_json(bundle: &ReportBundle) -> String {
        serde_json::to_string_pretty(bundle).unwrap_or_else(|_| "{}".to_string())
    }
}
