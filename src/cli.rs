//! Command-line interface for the portfolio backtester.

use cryptofolio::analytics::ResultFormatter;
use cryptofolio::config::BacktestFileConfig;
use cryptofolio::data::{parse_date, DataConfig};
use cryptofolio::engine::{BacktestConfig, Backtester};
use cryptofolio::error::{BacktestError, Result};
use cryptofolio::export::export_all;
use cryptofolio::optimizer::InfeasibleFallback;
use cryptofolio::report::BacktestOutcome;
use cryptofolio::source::{CsvDirSource, PriceSource};
use cryptofolio::symbols::{SymbolMap, DEFAULT_BENCHMARK, DEFAULT_SELECTION};
use cryptofolio::viz;

use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Cryptofolio - quarterly max-Sharpe crypto portfolio backtester.
#[derive(Parser)]
#[command(name = "cryptofolio")]
#[command(version)]
#[command(about = "Backtest a quarterly-rebalanced max-Sharpe crypto portfolio against buy-and-hold")]
#[command(long_about = None)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a backtest from command-line parameters
    Run {
        /// Tickers to optimize over (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// Buy-and-hold benchmark ticker
        #[arg(short, long, default_value = DEFAULT_BENCHMARK)]
        benchmark: String,

        /// First day of the backtest (YYYY-MM-DD)
        #[arg(long, default_value = "2021-01-01")]
        start: String,

        /// Last day of the backtest (defaults to today)
        #[arg(long)]
        end: Option<String>,

        /// Initial capital
        #[arg(short, long, default_value = "10000")]
        capital: f64,

        /// Annual risk-free rate (percentage)
        #[arg(long, default_value = "2.0")]
        risk_free: f64,

        /// Minimum weight per asset (percentage)
        #[arg(long, default_value = "5.0")]
        min_weight: f64,

        /// Maximum weight per asset (percentage)
        #[arg(long, default_value = "50.0")]
        max_weight: f64,

        /// What to hold when a quarter has no max-Sharpe solution
        #[arg(long, value_enum, default_value = "carry-forward")]
        fallback: FallbackArg,

        /// Where prices come from
        #[arg(short, long, value_enum, default_value = "csv")]
        source: SourceArg,

        /// Directory of <TICKER>.csv close files (csv source)
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Continue without tickers that return no data
        #[arg(long)]
        drop_missing: bool,

        /// Write values, weights and reports into this directory
        #[arg(short, long)]
        export_dir: Option<PathBuf>,
    },

    /// Run a backtest from a TOML configuration file
    RunConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,

        /// Write values, weights and reports into this directory
        #[arg(short, long)]
        export_dir: Option<PathBuf>,
    },

    /// Create an example configuration file
    Init {
        /// Output path for config file
        #[arg(short, long, default_value = "backtest.toml")]
        output: PathBuf,
    },

    /// List supported tickers and their exchange pairs
    Tickers,

    /// Download daily closes into a directory of CSV files
    #[cfg(feature = "exchange")]
    Fetch {
        /// Tickers to download (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tickers: Vec<String>,

        /// First day to download (YYYY-MM-DD)
        #[arg(long, default_value = "2021-01-01")]
        start: String,

        /// Last day to download (defaults to today)
        #[arg(long)]
        end: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "data")]
        out_dir: PathBuf,
    },
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum FallbackArg {
    /// Keep the previous weights
    CarryForward,
    /// Try the minimum-variance portfolio first
    MinVariance,
}

impl From<FallbackArg> for InfeasibleFallback {
    fn from(arg: FallbackArg) -> Self {
        match arg {
            FallbackArg::CarryForward => InfeasibleFallback::CarryForward,
            FallbackArg::MinVariance => InfeasibleFallback::MinimumVariance,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    /// Local CSV files
    Csv,
    /// Binance daily klines, downloaded before the run
    #[cfg(feature = "exchange")]
    Binance,
}

impl Cli {
    /// Initialize logging based on verbosity level.
    pub fn init_logging(&self) {
        let level = match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        };

        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_target(false)
            .finish();

        if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
            eprintln!("Failed to set tracing subscriber: {}", e);
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            tickers,
            benchmark,
            start,
            end,
            capital,
            risk_free,
            min_weight,
            max_weight,
            fallback,
            source,
            data_dir,
            drop_missing,
            export_dir,
        } => {
            let config = BacktestConfig {
                tickers: if tickers.is_empty() {
                    DEFAULT_SELECTION.iter().map(|t| t.to_string()).collect()
                } else {
                    tickers.clone()
                },
                benchmark: benchmark.clone(),
                start_date: parse_day(start)?,
                end_date: end_day(end.as_deref())?,
                initial_capital: *capital,
                risk_free_rate: risk_free / 100.0,
                min_weight: min_weight / 100.0,
                max_weight: max_weight / 100.0,
                fallback: (*fallback).into(),
                drop_missing_tickers: *drop_missing,
                show_progress: cli.output == OutputFormat::Text,
                ..Default::default()
            };
            let prices = open_source(*source, data_dir, &DataConfig::default(), &config)?;
            run_backtest(config, prices.as_ref(), export_dir.as_deref(), cli.output)
        }

        Commands::RunConfig { config, export_dir } => {
            run_from_config(config, export_dir.as_deref(), cli.output)
        }

        Commands::Init { output } => init_config(output),

        Commands::Tickers => {
            print_tickers();
            Ok(())
        }

        #[cfg(feature = "exchange")]
        Commands::Fetch {
            tickers,
            start,
            end,
            out_dir,
        } => {
            let tickers: Vec<String> = if tickers.is_empty() {
                DEFAULT_SELECTION.iter().map(|t| t.to_string()).collect()
            } else {
                tickers.clone()
            };
            fetch_to_dir(&tickers, parse_day(start)?, end_day(end.as_deref())?, out_dir)
        }
    }
}

fn parse_day(s: &str) -> Result<NaiveDate> {
    parse_date(s, Some("%Y-%m-%d"))
}

fn end_day(s: Option<&str>) -> Result<NaiveDate> {
    match s {
        Some(s) => parse_day(s),
        None => Ok(Utc::now().date_naive()),
    }
}

/// Build the price source for a run. Exchange data is downloaded in full
/// here, before the backtest starts.
fn open_source(
    source: SourceArg,
    data_dir: &Path,
    data_config: &DataConfig,
    config: &BacktestConfig,
) -> Result<Box<dyn PriceSource>> {
    // Fail on bad parameters before touching any data.
    config.validate()?;

    match source {
        SourceArg::Csv => {
            if !data_dir.is_dir() {
                return Err(BacktestError::ConfigError(format!(
                    "data directory not found: {}",
                    data_dir.display()
                )));
            }
            info!("Reading closes from {}", data_dir.display());
            Ok(Box::new(CsvDirSource::with_config(
                data_dir,
                data_config.clone(),
            )))
        }
        #[cfg(feature = "exchange")]
        SourceArg::Binance => {
            let client = cryptofolio::exchange::BinanceClient::new(
                cryptofolio::exchange::DEFAULT_BASE_URL,
            )?;
            let runtime = tokio::runtime::Runtime::new()?;
            let (prices, failures) = runtime.block_on(client.prefetch(
                &config.requested_tickers(),
                config.start_date,
                config.end_date,
            ));
            for (ticker, reason) in &failures {
                tracing::warn!("No exchange data for {}: {}", ticker, reason);
            }
            Ok(Box::new(prices))
        }
    }
}

fn run_backtest(
    config: BacktestConfig,
    source: &dyn PriceSource,
    export_dir: Option<&Path>,
    output: OutputFormat,
) -> Result<()> {
    info!(
        "Backtesting {} against {} from {} to {}",
        config.tickers.join(","),
        config.benchmark,
        config.start_date,
        config.end_date
    );

    let backtester = Backtester::new(config)?;
    let outcome = backtester.run(source)?;

    match (&outcome, output) {
        (BacktestOutcome::Completed(bundle), OutputFormat::Text) => {
            ResultFormatter::print_report(bundle);
            println!();
            println!("{}", viz::result_summary(bundle, 60));
        }
        (BacktestOutcome::Completed(bundle), OutputFormat::Json) => {
            println!("{}", ResultFormatter::to_json(bundle));
        }
        (BacktestOutcome::DataUnavailable { reason }, OutputFormat::Text) => {
            println!("{} {}", "No result:".red().bold(), reason);
            println!("Try different tickers or a different date range.");
        }
        (BacktestOutcome::DataUnavailable { .. }, OutputFormat::Json) => {
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
    }

    if let (Some(dir), Some(bundle)) = (export_dir, outcome.bundle()) {
        let written = export_all(bundle, dir)?;
        if output == OutputFormat::Text {
            for path in written {
                println!("Wrote {}", path.display());
            }
        }
    }

    Ok(())
}

fn run_from_config(config_path: &Path, export_dir: Option<&Path>, output: OutputFormat) -> Result<()> {
    info!("Loading configuration from: {}", config_path.display());

    let file_config = BacktestFileConfig::load(config_path)?;
    let mut backtest_config = file_config.to_backtest_config()?;
    backtest_config.show_progress &= output == OutputFormat::Text;

    let source = match file_config.data.source.to_lowercase().as_str() {
        "csv" => SourceArg::Csv,
        #[cfg(feature = "exchange")]
        "binance" => SourceArg::Binance,
        other => {
            return Err(BacktestError::ConfigError(format!(
                "unknown data source: {}",
                other
            )))
        }
    };
    let data_dir = PathBuf::from(file_config.data.dir.as_deref().unwrap_or("data"));
    let prices = open_source(
        source,
        &data_dir,
        &file_config.data.data_config(),
        &backtest_config,
    )?;

    run_backtest(backtest_config, prices.as_ref(), export_dir, output)
}

fn init_config(output: &Path) -> Result<()> {
    let example = BacktestFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your backtest, then run:");
    println!("  cryptofolio run-config -c {}", output.display());
    Ok(())
}

fn print_tickers() {
    let symbols = SymbolMap::with_defaults();
    println!("\nSupported tickers:\n");
    for ticker in symbols.display_tickers() {
        let pair = symbols.to_pair(ticker).unwrap_or("-");
        let marker = if DEFAULT_SELECTION.contains(&ticker) {
            " (default)"
        } else {
            ""
        };
        println!("  {:<10} {}{}", ticker, pair, marker);
    }
    println!();
    println!("Benchmark defaults to {}.", DEFAULT_BENCHMARK);
}

#[cfg(feature = "exchange")]
fn fetch_to_dir(tickers: &[String], start: NaiveDate, end: NaiveDate, out_dir: &Path) -> Result<()> {
    use cryptofolio::exchange::{BinanceClient, DEFAULT_BASE_URL};
    use cryptofolio::export::write_closes_csv;

    fs::create_dir_all(out_dir)?;
    let client = BinanceClient::new(DEFAULT_BASE_URL)?;
    let runtime = tokio::runtime::Runtime::new()?;
    let (prices, failures) = runtime.block_on(client.prefetch(tickers, start, end));

    for ticker in tickers {
        if !prices.contains(ticker) {
            continue;
        }
        let series = prices.fetch(ticker, start, end)?;
        let path = out_dir.join(format!("{}.csv", ticker));
        write_closes_csv(&series, &path)?;
        println!("{} {} ({} days)", "Saved".green(), path.display(), series.len());
    }
    for (ticker, reason) in &failures {
        println!("{} {}: {}", "Failed".red(), ticker, reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> BacktestConfig {
        BacktestConfig {
            tickers: vec!["BTC-USD".to_string(), "ETH-USD".to_string()],
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
            ..Default::default()
        }
    }

    #[test]
    fn test_open_source_rejects_bad_config_first() {
        let dir = TempDir::new().unwrap();
        let bad = BacktestConfig {
            min_weight: 0.6,
            max_weight: 0.8,
            ..config()
        };
        let result = open_source(SourceArg::Csv, dir.path(), &DataConfig::default(), &bad);
        assert!(matches!(result, Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_open_source_csv_needs_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = open_source(SourceArg::Csv, &missing, &DataConfig::default(), &config());
        match result {
            Err(BacktestError::ConfigError(msg)) => assert!(msg.contains("data directory")),
            _ => panic!("expected a missing-directory error"),
        }

        let ok = open_source(SourceArg::Csv, dir.path(), &DataConfig::default(), &config());
        assert!(ok.is_ok());
    }
}
