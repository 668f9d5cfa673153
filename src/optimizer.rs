//! Maximum-Sharpe portfolio optimization under uniform box constraints.
//!
//! Statistics are estimated from an expanding window of daily returns and
//! annualized with a 252-day convention. The ratio objective
//!
//! ```text
//! maximize (w·μ − r_f) / sqrt(wᵀΣw)   s.t.  Σw = 1,  lo ≤ w_k ≤ hi
//! ```
//!
//! is solved through its homogenised quadratic program: with `w = y / κ`,
//!
//! ```text
//! minimize yᵀΣy   s.t.  μᵀy − r_f κ = 1,  Σy = κ,  lo·κ ≤ y_k ≤ hi·κ,  κ ≥ 0
//! ```
//!
//! which is convex and handed to Clarabel. The solver sits behind the
//! [`MeanVarianceSolver`] trait so the simulator does not depend on it.

use crate::error::{BacktestError, Result};
use crate::types::{MarketStatistics, WeightBounds, WeightVector, TRADING_DAYS_PER_YEAR};
use clarabel::algebra::CscMatrix;
use clarabel::solver::SupportedConeT;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Covariance entries at or below this are treated as zero.
const ZERO_VARIANCE_EPSILON: f64 = 1e-12;

/// Scale variable values at or below this mean the QP collapsed.
const MIN_SCALE: f64 = 1e-12;

/// Estimate annualized mean returns and sample covariance from a window of
/// daily return rows (one column per ticker).
pub fn estimate_statistics(tickers: &[String], window: &[Vec<f64>]) -> Result<MarketStatistics> {
    let t = window.len();
    if t < 2 {
        return Err(BacktestError::InsufficientHistory {
            required: 2,
            available: t,
        });
    }
    let n = tickers.len();
    if window.iter().any(|row| row.len() != n) {
        return Err(BacktestError::InvalidInput(
            "Returns window width must match ticker count".to_string(),
        ));
    }

    let mut means = vec![0.0; n];
    for row in window {
        for (m, r) in means.iter_mut().zip(row) {
            *m += r;
        }
    }
    for m in &mut means {
        *m /= t as f64;
    }

    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let c = window
                .iter()
                .map(|row| (row[i] - means[i]) * (row[j] - means[j]))
                .sum::<f64>()
                / (t - 1) as f64
                * TRADING_DAYS_PER_YEAR;
            cov[i][j] = c;
            cov[j][i] = c;
        }
    }

    Ok(MarketStatistics {
        tickers: tickers.to_vec(),
        mu: means.iter().map(|m| m * TRADING_DAYS_PER_YEAR).collect(),
        cov,
        observations: t,
        as_of: None,
    })
}

/// Capability to turn market statistics into portfolio weights.
///
/// `None` means no solution this period; callers keep their previous weights.
pub trait MeanVarianceSolver: Send + Sync {
    /// Tangency portfolio under the box constraints.
    fn solve_max_sharpe(
        &self,
        stats: &MarketStatistics,
        bounds: &WeightBounds,
        risk_free_rate: f64,
    ) -> Option<WeightVector>;

    /// Minimum-variance portfolio under the box constraints.
    fn solve_min_variance(
        &self,
        _stats: &MarketStatistics,
        _bounds: &WeightBounds,
    ) -> Option<WeightVector> {
        None
    }

    fn name(&self) -> &str;
}

/// Settings for the Clarabel interior-point solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverSettings {
    /// Iteration cap per solve.
    pub max_iter: u32,
    /// Print solver progress.
    pub verbose: bool,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            max_iter: 200,
            verbose: false,
        }
    }
}

/// Column-by-column builder for compressed sparse column matrices.
struct CscBuilder {
    m: usize,
    colptr: Vec<usize>,
    rowval: Vec<usize>,
    nzval: Vec<f64>,
}

impl CscBuilder {
    fn new(m: usize) -> Self {
        Self {
            m,
            colptr: vec![0],
            rowval: Vec::new(),
            nzval: Vec::new(),
        }
    }

    /// Append a column; entries must be in increasing row order.
    fn push_column(&mut self, entries: &[(usize, f64)]) {
        for &(row, val) in entries {
            if val != 0.0 {
                self.rowval.push(row);
                self.nzval.push(val);
            }
        }
        self.colptr.push(self.nzval.len());
    }

    fn build(self) -> CscMatrix<f64> {
        let n = self.colptr.len() - 1;
        CscMatrix::new(self.m, n, self.colptr, self.rowval, self.nzval)
    }
}

/// Upper triangle of the covariance, padded with `extra` empty columns.
fn covariance_triu(cov: &[Vec<f64>], extra: usize) -> CscMatrix<f64> {
    let n = cov.len();
    let mut p = CscBuilder::new(n + extra);
    for j in 0..n {
        let column: Vec<(usize, f64)> = (0..=j)
            .map(|i| (i, cov[i][j]))
            .filter(|(_, v)| v.abs() > ZERO_VARIANCE_EPSILON)
            .collect();
        p.push_column(&column);
    }
    for _ in 0..extra {
        p.push_column(&[]);
    }
    p.build()
}

/// Interior-point QP solver for the mean-variance problems.
#[derive(Debug, Clone, Default)]
pub struct ClarabelSolver {
    settings: SolverSettings,
}

impl ClarabelSolver {
    pub fn new(settings: SolverSettings) -> Self {
        Self { settings }
    }

    fn run(
        &self,
        p: &CscMatrix<f64>,
        q: &[f64],
        a: &CscMatrix<f64>,
        b: &[f64],
        cones: &[SupportedConeT<f64>],
    ) -> Option<Vec<f64>> {
        use clarabel::solver::*;

        let settings = match DefaultSettingsBuilder::default()
            .max_iter(self.settings.max_iter)
            .verbose(self.settings.verbose)
            .build()
        {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to build solver settings: {}", e);
                return None;
            }
        };

        let mut solver = match DefaultSolver::new(p, q, a, b, cones, settings) {
            Ok(s) => s,
            Err(e) => {
                warn!("Failed to create solver: {:?}", e);
                return None;
            }
        };

        solver.solve();

        match solver.solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => Some(solver.solution.x.clone()),
            status => {
                debug!("Solver finished with status {:?}", status);
                None
            }
        }
    }

    /// Linear-programme answer for windows with no measurable variance:
    /// every asset at the lower bound, remaining mass to the highest
    /// expected returns first.
    fn max_return_allocation(mu: &[f64], bounds: &WeightBounds) -> WeightVector {
        let n = mu.len();
        let mut weights = vec![bounds.min_weight; n];
        let mut remaining = 1.0 - bounds.min_weight * n as f64;

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| mu[b].total_cmp(&mu[a]).then(a.cmp(&b)));

        for i in order {
            if remaining <= 0.0 {
                break;
            }
            let add = (bounds.max_weight - bounds.min_weight).min(remaining);
            weights[i] += add;
            remaining -= add;
        }

        WeightVector::new(weights)
    }
}

impl MeanVarianceSolver for ClarabelSolver {
    fn solve_max_sharpe(
        &self,
        stats: &MarketStatistics,
        bounds: &WeightBounds,
        risk_free_rate: f64,
    ) -> Option<WeightVector> {
        let n = stats.n_assets();
        if n == 0 || !bounds.is_feasible_for(n) {
            return None;
        }

        if stats.is_degenerate(ZERO_VARIANCE_EPSILON) {
            debug!("Zero covariance window, allocating by expected return");
            return Self::max_return_allocation(&stats.mu, bounds).normalized_within(bounds);
        }

        // The Sharpe numerator must be positive somewhere for μᵀy − r_f κ = 1.
        if stats.mu.iter().all(|&m| m <= risk_free_rate) {
            debug!("No asset beats the risk-free rate");
            return None;
        }

        // Variables: y_0..y_{n-1}, κ (index n).
        let p = covariance_triu(&stats.cov, 1);
        let q = vec![0.0; n + 1];

        // Rows: 0 Sharpe normalisation, 1 budget, 2..2+n lower, 2+n..2+2n upper, 2+2n κ ≥ 0.
        let m = 2 * n + 3;
        let mut a = CscBuilder::new(m);
        for k in 0..n {
            a.push_column(&[
                (0, stats.mu[k]),
                (1, 1.0),
                (2 + k, -1.0),
                (2 + n + k, 1.0),
            ]);
        }
        let mut kappa: Vec<(usize, f64)> = vec![(0, -risk_free_rate), (1, -1.0)];
        kappa.extend((0..n).map(|k| (2 + k, bounds.min_weight)));
        kappa.extend((0..n).map(|k| (2 + n + k, -bounds.max_weight)));
        kappa.push((2 + 2 * n, -1.0));
        a.push_column(&kappa);
        let a = a.build();

        let mut b = vec![0.0; m];
        b[0] = 1.0;

        let cones = [
            SupportedConeT::ZeroConeT(2),
            SupportedConeT::NonnegativeConeT(2 * n + 1),
        ];

        let x = self.run(&p, &q, &a, &b, &cones)?;
        let scale = x[n];
        if !scale.is_finite() || scale <= MIN_SCALE {
            debug!("Degenerate scale variable {}", scale);
            return None;
        }

        WeightVector::new(x[..n].iter().map(|y| y / scale).collect()).normalized_within(bounds)
    }

    fn solve_min_variance(
        &self,
        stats: &MarketStatistics,
        bounds: &WeightBounds,
    ) -> Option<WeightVector> {
        let n = stats.n_assets();
        if n == 0 || !bounds.is_feasible_for(n) {
            return None;
        }

        let p = covariance_triu(&stats.cov, 0);
        let q = vec![0.0; n];

        // Rows: 0 budget, 1..1+n lower, 1+n..1+2n upper.
        let m = 2 * n + 1;
        let mut a = CscBuilder::new(m);
        for k in 0..n {
            a.push_column(&[(0, 1.0), (1 + k, -1.0), (1 + n + k, 1.0)]);
        }
        let a = a.build();

        let mut b = vec![0.0; m];
        b[0] = 1.0;
        for k in 0..n {
            b[1 + k] = -bounds.min_weight;
            b[1 + n + k] = bounds.max_weight;
        }

        let cones = [
            SupportedConeT::ZeroConeT(1),
            SupportedConeT::NonnegativeConeT(2 * n),
        ];

        let x = self.run(&p, &q, &a, &b, &cones)?;
        WeightVector::new(x).normalized_within(bounds)
    }

    fn name(&self) -> &str {
        "clarabel"
    }
}

/// What the simulator does when a rebalance window has no max-Sharpe solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfeasibleFallback {
    /// Keep the previous period's weights.
    #[default]
    CarryForward,
    /// Try the minimum-variance portfolio under the same box first.
    MinimumVariance,
}

impl std::str::FromStr for InfeasibleFallback {
    type Err = BacktestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "carry_forward" | "carry" | "hold" => Ok(Self::CarryForward),
            "minimum_variance" | "min_variance" | "minvar" => Ok(Self::MinimumVariance),
            other => Err(BacktestError::ConfigError(format!(
                "Unknown infeasible fallback '{}'",
                other
            ))),
        }
    }
}

/// Estimation plus solving for one returns window.
pub struct PortfolioOptimizer {
    solver: Box<dyn MeanVarianceSolver>,
}

impl Default for PortfolioOptimizer {
    fn default() -> Self {
        Self::new(Box::new(ClarabelSolver::default()))
    }
}

impl PortfolioOptimizer {
    pub fn new(solver: Box<dyn MeanVarianceSolver>) -> Self {
        Self { solver }
    }

    pub fn solver(&self) -> &dyn MeanVarianceSolver {
        self.solver.as_ref()
    }

    /// Maximum-Sharpe weights for a window of daily returns.
    pub fn optimize(
        &self,
        tickers: &[String],
        window: &[Vec<f64>],
        bounds: &WeightBounds,
        risk_free_rate: f64,
    ) -> Result<WeightVector> {
        let stats = estimate_statistics(tickers, window)?;
        self.optimize_statistics(&stats, bounds, risk_free_rate)
    }

    /// Maximum-Sharpe weights for already estimated statistics.
    pub fn optimize_statistics(
        &self,
        stats: &MarketStatistics,
        bounds: &WeightBounds,
        risk_free_rate: f64,
    ) -> Result<WeightVector> {
        self.solver
            .solve_max_sharpe(stats, bounds, risk_free_rate)
            .ok_or_else(|| {
                BacktestError::OptimizationInfeasible(format!(
                    "{} found no max-Sharpe portfolio over {} observations",
                    self.solver.name(),
                    stats.observations
                ))
            })
    }

    /// Minimum-variance weights for already estimated statistics.
    pub fn minimum_variance(
        &self,
        stats: &MarketStatistics,
        bounds: &WeightBounds,
    ) -> Result<WeightVector> {
        self.solver.solve_min_variance(stats, bounds).ok_or_else(|| {
            BacktestError::OptimizationInfeasible(format!(
                "{} found no minimum-variance portfolio",
                self.solver.name()
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WEIGHT_TOLERANCE;

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{}", i)).collect()
    }

    /// Deterministic, mildly correlated daily returns.
    fn synthetic_window(days: usize, drifts: &[f64]) -> Vec<Vec<f64>> {
        (0..days)
            .map(|t| {
                drifts
                    .iter()
                    .enumerate()
                    .map(|(k, drift)| {
                        let phase = t as f64 * (0.7 + 0.31 * k as f64);
                        drift + 0.02 * phase.sin() + 0.01 * (t as f64 * 1.3).cos()
                    })
                    .collect()
            })
            .collect()
    }

    fn assert_valid(w: &WeightVector, bounds: &WeightBounds) {
        assert!(w.is_normalized(WEIGHT_TOLERANCE), "sum = {}", w.sum());
        assert!(w.is_within(bounds, WEIGHT_TOLERANCE), "weights = {}", w);
    }

    #[test]
    fn test_estimate_statistics() {
        let window = vec![vec![0.01, 0.02], vec![0.03, 0.00]];
        let stats = estimate_statistics(&tickers(2), &window).unwrap();

        assert!((stats.mu[0] - 0.02 * 252.0).abs() < 1e-12);
        assert!((stats.mu[1] - 0.01 * 252.0).abs() < 1e-12);
        // Sample variance of [0.01, 0.03] is 0.0002
        assert!((stats.cov[0][0] - 0.0002 * 252.0).abs() < 1e-12);
        assert!((stats.cov[0][1] - (-0.0002 * 252.0)).abs() < 1e-12);
        assert_eq!(stats.cov[0][1], stats.cov[1][0]);
        assert_eq!(stats.observations, 2);
    }

    #[test]
    fn test_estimate_statistics_needs_two_rows() {
        let err = estimate_statistics(&tickers(2), &[vec![0.01, 0.02]]).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InsufficientHistory {
                required: 2,
                available: 1
            }
        ));
    }

    #[test]
    fn test_zero_variance_picks_higher_return() {
        let window = vec![vec![0.01, 0.0]; 10];
        let optimizer = PortfolioOptimizer::default();
        let w = optimizer
            .optimize(&tickers(2), &window, &WeightBounds::new(0.0, 1.0), 0.0)
            .unwrap();

        assert!((w.as_slice()[0] - 1.0).abs() < 1e-9);
        assert!(w.as_slice()[1].abs() < 1e-9);
    }

    #[test]
    fn test_zero_variance_respects_caps() {
        let window = vec![vec![0.01, 0.005, 0.0]; 5];
        let bounds = WeightBounds::new(0.1, 0.6);
        let w = PortfolioOptimizer::default()
            .optimize(&tickers(3), &window, &bounds, 0.0)
            .unwrap();

        assert_valid(&w, &bounds);
        assert!((w.as_slice()[0] - 0.6).abs() < 1e-9);
        assert!((w.as_slice()[1] - 0.3).abs() < 1e-9);
        assert!((w.as_slice()[2] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_max_sharpe_within_bounds() {
        let window = synthetic_window(120, &[0.002, 0.001, 0.0005, 0.0015]);
        let bounds = WeightBounds::new(0.05, 0.5);
        let w = PortfolioOptimizer::default()
            .optimize(&tickers(4), &window, &bounds, 0.02)
            .unwrap();
        assert_valid(&w, &bounds);
    }

    #[test]
    fn test_max_sharpe_beats_equal_weight() {
        let window = synthetic_window(200, &[0.003, 0.0005, 0.001]);
        let stats = estimate_statistics(&tickers(3), &window).unwrap();
        let bounds = WeightBounds::new(0.0, 1.0);
        let w = ClarabelSolver::default()
            .solve_max_sharpe(&stats, &bounds, 0.0)
            .unwrap();

        let equal = WeightVector::equal(3);
        assert!(stats.sharpe_ratio(&w, 0.0) >= stats.sharpe_ratio(&equal, 0.0) - 1e-6);
    }

    #[test]
    fn test_no_positive_excess_return_is_infeasible() {
        let window = synthetic_window(60, &[-0.004, -0.003]);
        let optimizer = PortfolioOptimizer::default();
        let err = optimizer
            .optimize(&tickers(2), &window, &WeightBounds::new(0.0, 1.0), 0.02)
            .unwrap_err();
        assert!(matches!(err, BacktestError::OptimizationInfeasible(_)));
    }

    #[test]
    fn test_infeasible_bounds_return_none() {
        let window = synthetic_window(60, &[0.002, 0.001, 0.003]);
        let stats = estimate_statistics(&tickers(3), &window).unwrap();
        assert!(ClarabelSolver::default()
            .solve_max_sharpe(&stats, &WeightBounds::new(0.5, 1.0), 0.0)
            .is_none());
    }

    #[test]
    fn test_min_variance_within_bounds() {
        let window = synthetic_window(150, &[0.001, 0.002, 0.0]);
        let stats = estimate_statistics(&tickers(3), &window).unwrap();
        let bounds = WeightBounds::new(0.1, 0.7);
        let w = ClarabelSolver::default()
            .solve_min_variance(&stats, &bounds)
            .unwrap();
        assert_valid(&w, &bounds);

        let equal = WeightVector::equal(3);
        assert!(stats.portfolio_variance(&w) <= stats.portfolio_variance(&equal) + 1e-9);
    }

    #[test]
    fn test_fallback_from_str() {
        assert_eq!(
            "min-variance".parse::<InfeasibleFallback>().unwrap(),
            InfeasibleFallback::MinimumVariance
        );
        assert_eq!(
            "carry_forward".parse::<InfeasibleFallback>().unwrap(),
            InfeasibleFallback::CarryForward
        );
        assert!("random".parse::<InfeasibleFallback>().is_err());
    }

    #[test]
    fn test_default_min_variance_is_unsupported() {
        struct NeverSolves;
        impl MeanVarianceSolver for NeverSolves {
            fn solve_max_sharpe(
                &self,
                _: &MarketStatistics,
                _: &WeightBounds,
                _: f64,
            ) -> Option<WeightVector> {
                None
            }
            fn name(&self) -> &str {
                "never"
            }
        }

        let optimizer = PortfolioOptimizer::new(Box::new(NeverSolves));
        let stats = estimate_statistics(&tickers(2), &synthetic_window(10, &[0.0, 0.0])).unwrap();
        assert!(optimizer
            .minimum_variance(&stats, &WeightBounds::unconstrained())
            .is_err());
        assert!(optimizer
            .optimize_statistics(&stats, &WeightBounds::unconstrained(), 0.0)
            .is_err());
    }
}
