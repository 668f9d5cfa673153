//! Export utilities for backtest results.
//!
//! | Output | Function |
//! |--------|----------|
//! | Portfolio and benchmark values (CSV) | [`export_values_csv`] |
//! | Daily weights (CSV) | [`export_weights_csv`] |
//! | Full report (JSON) | [`export_report_json`] |
//! | Markdown summary | [`export_report_md`] |
//! | Raw closes in loader format | [`write_closes_csv`] |
//!
//! [`export_all`] writes the report files into a directory.

use crate::error::Result;
use crate::report::ReportBundle;
use crate::types::PricePoint;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Date, portfolio value, benchmark value and portfolio daily return.
pub fn export_values_csv(bundle: &ReportBundle, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "date,portfolio_value,benchmark_value,portfolio_return")?;
    for (i, date) in bundle.portfolio_values.dates().iter().enumerate() {
        writeln!(
            writer,
            "{},{:.6},{:.6},{:.8}",
            date.format("%Y-%m-%d"),
            bundle.portfolio_values.values()[i],
            bundle.benchmark_values.values().get(i).copied().unwrap_or(f64::NAN),
            bundle.portfolio_returns.get(i).copied().unwrap_or(f64::NAN)
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// One row per day, one column per ticker.
pub fn export_weights_csv(bundle: &ReportBundle, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "date,{}", bundle.weights.tickers().join(","))?;
    for (date, row) in bundle.weights.dates().iter().zip(bundle.weights.rows()) {
        let cells: Vec<String> = row.as_slice().iter().map(|w| format!("{:.6}", w)).collect();
        writeln!(writer, "{},{}", date.format("%Y-%m-%d"), cells.join(","))?;
    }

    writer.flush()?;
    Ok(())
}

/// The complete bundle as pretty-printed JSON.
pub fn export_report_json(bundle: &ReportBundle, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, bundle)?;
    Ok(())
}

/// Human-readable summary with the rebalance log.
pub fn export_report_md(bundle: &ReportBundle, path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);
    let config = &bundle.config;
    let p = &bundle.portfolio_metrics;
    let b = &bundle.benchmark_metrics;

    writeln!(writer, "# Portfolio Backtest: {}", config.tickers.join(", "))?;
    writeln!(writer)?;
    writeln!(
        writer,
        "**Period:** {} to {}  ",
        config.start_date, config.end_date
    )?;
    writeln!(writer, "**Benchmark:** {}  ", config.benchmark)?;
    writeln!(writer, "**Run:** {}", bundle.metadata.run_id)?;
    writeln!(writer)?;

    writeln!(writer, "| Metric | Portfolio | Benchmark |")?;
    writeln!(writer, "|--------|-----------|-----------|")?;
    writeln!(
        writer,
        "| Total Return | {:.2}% | {:.2}% |",
        p.total_return * 100.0,
        b.total_return * 100.0
    )?;
    writeln!(
        writer,
        "| Annual Return | {:.2}% | {:.2}% |",
        p.annualized_return * 100.0,
        b.annualized_return * 100.0
    )?;
    writeln!(
        writer,
        "| Volatility | {:.2}% | {:.2}% |",
        p.annualized_volatility * 100.0,
        b.annualized_volatility * 100.0
    )?;
    writeln!(
        writer,
        "| Sharpe Ratio | {:.2} | {:.2} |",
        p.sharpe_ratio, b.sharpe_ratio
    )?;
    writeln!(writer)?;
    writeln!(
        writer,
        "1-day VaR at {:.0}%: {:.2}% (${:.2})",
        bundle.var.confidence * 100.0,
        bundle.var.var_percent * 100.0,
        bundle.var.var_value
    )?;
    writeln!(writer)?;

    writeln!(writer, "## Rebalances")?;
    writeln!(writer)?;
    writeln!(writer, "| Date | Outcome | Weights |")?;
    writeln!(writer, "|------|---------|---------|")?;
    for event in &bundle.events {
        let weights = event
            .weights
            .as_ref()
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        writeln!(
            writer,
            "| {} | {} | {} |",
            event.date,
            event.outcome.label(),
            weights
        )?;
    }

    if bundle.diagnostics.backfilled_days > 0 {
        writeln!(writer)?;
        writeln!(
            writer,
            "The first {} days hold the first computed weights (start-up back-fill).",
            bundle.diagnostics.backfilled_days
        )?;
    }

    writer.flush()?;
    Ok(())
}

/// Write closes in the `date,close` format [`crate::data::load_closes`] reads.
pub fn write_closes_csv(series: &[PricePoint], path: impl AsRef<Path>) -> Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    writeln!(writer, "date,close")?;
    for point in series {
        writeln!(writer, "{},{}", point.date.format("%Y-%m-%d"), point.close)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write values, weights, JSON and Markdown reports into `dir`.
pub fn export_all(bundle: &ReportBundle, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;

    let values = dir.join("values.csv");
    let weights = dir.join("weights.csv");
    let json = dir.join("report.json");
    let md = dir.join("report.md");

    export_values_csv(bundle, &values)?;
    export_weights_csv(bundle, &weights)?;
    export_report_json(bundle, &json)?;
    export_report_md(bundle, &md)?;

    info!("Exported report to {}", dir.display());
    Ok(vec![values, weights, json, md])
}
