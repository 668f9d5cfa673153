//! Quarterly rebalancing simulation.
//!
//! The simulator walks the returns table day by day. The first day and
//! every day whose calendar quarter differs from the previous day's trigger
//! a re-optimization over all returns observed so far (expanding window).
//! Between triggers the last successful weight vector is held.
//!
//! Days before the first successful optimization have no weights of their
//! own. After the loop they are back-filled from the first computed vector.
//! This is a deliberate look-ahead limited to the startup gap; the number of
//! affected days is reported in [`RunDiagnostics::backfilled_days`].

use crate::error::{BacktestError, Result};
use crate::optimizer::{estimate_statistics, InfeasibleFallback, PortfolioOptimizer};
use crate::types::{
    quarter_of, MarketStatistics, ReturnsTable, ValueSeries, WeightBounds, WeightVector,
    WeightsHistory,
};
use chrono::NaiveDate;
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Parameters of one simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationParams {
    pub bounds: WeightBounds,
    /// Annualized risk-free rate as a decimal.
    pub risk_free_rate: f64,
    pub fallback: InfeasibleFallback,
    pub show_progress: bool,
}

impl Default for SimulationParams {
    fn default() -> Self {
        Self {
            bounds: WeightBounds::default(),
            risk_free_rate: 0.02,
            fallback: InfeasibleFallback::CarryForward,
            show_progress: false,
        }
    }
}

/// Rebalancing state carried across days.
#[derive(Debug, Clone, PartialEq)]
pub enum RebalanceState {
    AwaitingFirstRebalance,
    Holding(WeightVector),
}

impl RebalanceState {
    pub fn current(&self) -> Option<&WeightVector> {
        match self {
            RebalanceState::AwaitingFirstRebalance => None,
            RebalanceState::Holding(w) => Some(w),
        }
    }
}

/// Result of one trigger day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceOutcome {
    /// New max-Sharpe weights adopted.
    Rebalanced,
    /// Max-Sharpe failed; minimum-variance weights adopted.
    FallbackMinVariance,
    /// Fewer than two observations; previous weights kept.
    SkippedInsufficientHistory,
    /// No solution; previous weights kept.
    Infeasible,
}

impl RebalanceOutcome {
    pub fn adopted_new_weights(&self) -> bool {
        matches!(
            self,
            RebalanceOutcome::Rebalanced | RebalanceOutcome::FallbackMinVariance
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RebalanceOutcome::Rebalanced => "rebalanced",
            RebalanceOutcome::FallbackMinVariance => "min-variance",
            RebalanceOutcome::SkippedInsufficientHistory => "skipped",
            RebalanceOutcome::Infeasible => "infeasible",
        }
    }
}

/// One trigger day in the rebalancing log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
    pub date: NaiveDate,
    /// Row index into the returns table.
    pub index: usize,
    /// Observations in the expanding window.
    pub observations: usize,
    pub outcome: RebalanceOutcome,
    /// Weights adopted on this day, if any.
    pub weights: Option<WeightVector>,
}

/// Summary of how cleanly a run went.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunDiagnostics {
    pub trigger_days: usize,
    pub rebalanced: usize,
    pub fallback_min_variance: usize,
    pub skipped_insufficient_history: usize,
    pub infeasible: usize,
    /// Leading days filled from the first computed vector.
    pub backfilled_days: usize,
    /// No optimization succeeded; every day holds 1/n.
    pub equal_weight_fallback: bool,
}

impl RunDiagnostics {
    fn from_events(events: &[RebalanceEvent]) -> Self {
        let count = |o: RebalanceOutcome| events.iter().filter(|e| e.outcome == o).count();
        Self {
            trigger_days: events.len(),
            rebalanced: count(RebalanceOutcome::Rebalanced),
            fallback_min_variance: count(RebalanceOutcome::FallbackMinVariance),
            skipped_insufficient_history: count(RebalanceOutcome::SkippedInsufficientHistory),
            infeasible: count(RebalanceOutcome::Infeasible),
            backfilled_days: 0,
            equal_weight_fallback: false,
        }
    }

    /// Every non-startup trigger produced max-Sharpe weights.
    ///
    /// The first day always has a single observation, so startup skips and
    /// the resulting back-fill do not count against a run.
    pub fn is_clean(&self) -> bool {
        self.infeasible == 0 && self.fallback_min_variance == 0 && !self.equal_weight_fallback
    }
}

/// Everything the simulation produces.
#[derive(Debug, Clone)]
pub struct SimulationOutput {
    pub weights: WeightsHistory,
    pub portfolio_returns: Vec<f64>,
    pub values: ValueSeries,
    /// Last statistics estimated during the run.
    pub last_statistics: Option<MarketStatistics>,
    pub events: Vec<RebalanceEvent>,
    pub diagnostics: RunDiagnostics,
}

struct Attempt {
    outcome: RebalanceOutcome,
    weights: Option<WeightVector>,
    statistics: Option<MarketStatistics>,
}

impl Attempt {
    fn adopted(outcome: RebalanceOutcome, weights: WeightVector, stats: MarketStatistics) -> Self {
        Self {
            outcome,
            weights: Some(weights),
            statistics: Some(stats),
        }
    }

    fn failed(outcome: RebalanceOutcome, statistics: Option<MarketStatistics>) -> Self {
        Self {
            outcome,
            weights: None,
            statistics,
        }
    }
}

/// Whether day `i` starts a new rebalancing period.
pub fn is_rebalance_day(dates: &[NaiveDate], i: usize) -> bool {
    i == 0 || (i < dates.len() && quarter_of(dates[i]) != quarter_of(dates[i - 1]))
}

/// Indices of every trigger day.
pub fn rebalance_days(dates: &[NaiveDate]) -> Vec<usize> {
    (0..dates.len())
        .filter(|&i| is_rebalance_day(dates, i))
        .collect()
}

/// Day-by-day rebalancing driver.
pub struct RebalancingSimulator<'a> {
    optimizer: &'a PortfolioOptimizer,
    params: SimulationParams,
}

impl<'a> RebalancingSimulator<'a> {
    pub fn new(optimizer: &'a PortfolioOptimizer, params: SimulationParams) -> Self {
        Self { optimizer, params }
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    /// Simulate the portfolio over `returns` starting from `initial_capital`.
    pub fn run(&self, returns: &ReturnsTable, initial_capital: f64) -> Result<SimulationOutput> {
        if returns.is_empty() {
            return Err(BacktestError::InsufficientHistory {
                required: 1,
                available: 0,
            });
        }

        let tickers = returns.tickers();
        let dates = returns.dates();
        let n_days = returns.len();

        info!(
            "Simulating {} assets over {} days ({} to {})",
            tickers.len(),
            n_days,
            dates[0],
            dates[n_days - 1]
        );

        let progress = if self.params.show_progress {
            let pb = ProgressBar::new(n_days as u64);
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})")
            {
                pb.set_style(style.progress_chars("#>-"));
            }
            Some(pb)
        } else {
            None
        };

        let mut state = RebalanceState::AwaitingFirstRebalance;
        let mut held: Vec<Option<WeightVector>> = Vec::with_capacity(n_days);
        let mut events = Vec::new();
        let mut last_statistics = None;

        for i in 0..n_days {
            if is_rebalance_day(dates, i) {
                let window = returns.expanding_window(i);
                let attempt = self.rebalance(tickers, window, dates[i]);
                if attempt.statistics.is_some() {
                    last_statistics = attempt.statistics;
                }
                if let Some(ref w) = attempt.weights {
                    state = RebalanceState::Holding(w.clone());
                }

                events.push(RebalanceEvent {
                    date: dates[i],
                    index: i,
                    observations: window.len(),
                    outcome: attempt.outcome,
                    weights: attempt.weights,
                });
            }

            held.push(state.current().cloned());

            if let Some(ref pb) = progress {
                pb.inc(1);
            }
        }

        if let Some(pb) = progress {
            pb.finish_with_message("Simulation complete");
        }

        let mut diagnostics = RunDiagnostics::from_events(&events);
        let rows = self.fill_leading(held, tickers.len(), &mut diagnostics);

        let portfolio_returns: Vec<f64> = rows
            .iter()
            .zip(returns.rows())
            .map(|(w, r)| w.dot(r))
            .collect();

        let values = ValueSeries::compound(dates.to_vec(), &portfolio_returns, initial_capital)?;
        let weights = WeightsHistory::new(tickers.to_vec(), dates.to_vec(), rows)?;

        info!(
            "Simulation finished: {} of {} trigger days rebalanced, {} back-filled days",
            diagnostics.rebalanced + diagnostics.fallback_min_variance,
            diagnostics.trigger_days,
            diagnostics.backfilled_days
        );

        Ok(SimulationOutput {
            weights,
            portfolio_returns,
            values,
            last_statistics,
            events,
            diagnostics,
        })
    }

    /// Estimate and solve for one trigger day.
    ///
    /// Statistics are kept whenever they could be estimated, even if no
    /// weights came out of them.
    fn rebalance(&self, tickers: &[String], window: &[Vec<f64>], date: NaiveDate) -> Attempt {
        let mut stats = match estimate_statistics(tickers, window) {
            Ok(s) => s,
            Err(e) => {
                debug!("Skipping rebalance on {}: {}", date, e);
                return Attempt::failed(RebalanceOutcome::SkippedInsufficientHistory, None);
            }
        };
        stats.as_of = Some(date);

        let bounds = &self.params.bounds;
        let err = match self
            .optimizer
            .optimize_statistics(&stats, bounds, self.params.risk_free_rate)
        {
            Ok(w) => {
                debug!("Rebalanced on {} to {}", date, w);
                return Attempt::adopted(RebalanceOutcome::Rebalanced, w, stats);
            }
            Err(e) => e,
        };
        warn!("Rebalance on {} failed: {}", date, err);

        if self.params.fallback == InfeasibleFallback::MinimumVariance {
            match self.optimizer.minimum_variance(&stats, bounds) {
                Ok(w) => {
                    info!("Using minimum-variance weights on {}: {}", date, w);
                    return Attempt::adopted(RebalanceOutcome::FallbackMinVariance, w, stats);
                }
                Err(e) => warn!("Minimum-variance fallback on {} failed: {}", date, e),
            }
        }

        Attempt::failed(RebalanceOutcome::Infeasible, Some(stats))
    }

    /// Back-fill leading undefined days from the first computed vector, or
    /// hold equal weights throughout if nothing was ever computed.
    fn fill_leading(
        &self,
        held: Vec<Option<WeightVector>>,
        n_assets: usize,
        diagnostics: &mut RunDiagnostics,
    ) -> Vec<WeightVector> {
        let leading = held.iter().take_while(|w| w.is_none()).count();
        let first = held.iter().flatten().next().cloned();

        let first = match first {
            Some(w) => w,
            None => {
                warn!("No rebalance succeeded; holding equal weights for the whole run");
                diagnostics.equal_weight_fallback = true;
                WeightVector::equal(n_assets)
            }
        };

        if leading > 0 && !diagnostics.equal_weight_fallback {
            warn!(
                "Back-filling {} leading days from the first computed weights",
                leading
            );
        }
        diagnostics.backfilled_days = if diagnostics.equal_weight_fallback {
            0
        } else {
            leading
        };

        held.into_iter()
            .map(|w| w.unwrap_or_else(|| first.clone()))
            .collect()
    }
}
