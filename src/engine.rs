//! Backtest execution engine.
//!
//! The engine consumes aligned rows one at a time and runs each through the
//! rolling standardizer, the ranker, the warm-up cutoff, the position policy
//! and the return aggregator. Only rows whose three z-scores are defined and
//! that fall past the warm-up reach the policy.

use crate::error::{BacktestError, Result};
use crate::rank::rank_row;
use crate::returns::{PositionTiming, ReturnAggregator};
use crate::rolling::{RowStandardizer, StdConvention};
use crate::signal::{PolicyKind, SignalEvent, SignalMachine};
use crate::types::{AlignedRow, PositionState, ReturnRow, Timestamp};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// What to do with a row whose return cannot be put in log space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DegeneratePolicy {
    /// Fail the run with [`BacktestError::DegenerateReturn`].
    #[default]
    Abort,
    /// Drop the row and carry on as if it never arrived.
    Skip,
}

/// Configuration for the backtest engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Number of trailing observations in each rolling window.
    pub window_width: usize,
    /// Fraction of the window discarded as warm-up (0.0 to 1.0).
    pub warmup_fraction: f64,
    /// Spread above which a position is opened.
    pub entry_threshold: f64,
    /// Spread below which the persistent policy closes its position.
    pub exit_threshold: f64,
    /// Position policy.
    #[serde(default)]
    pub policy: PolicyKind,
    /// Standard deviation denominator.
    #[serde(default)]
    pub std_convention: StdConvention,
    /// Handling of rows with `1 + r <= 0`.
    #[serde(default)]
    pub degenerate_returns: DegeneratePolicy,
    /// Which positions weight each row's return.
    #[serde(default)]
    pub position_timing: PositionTiming,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            window_width: 100_000,
            warmup_fraction: 0.01,
            entry_threshold: 0.6,
            exit_threshold: 0.0,
            policy: PolicyKind::default(),
            std_convention: StdConvention::default(),
            degenerate_returns: DegeneratePolicy::default(),
            position_timing: PositionTiming::default(),
        }
    }
}

impl BacktestConfig {
    /// Check the configuration before any row is processed.
    pub fn validate(&self) -> Result<()> {
        if self.window_width == 0 {
            return Err(BacktestError::ConfigError(
                "window_width must be positive".to_string(),
            ));
        }
        if !self.warmup_fraction.is_finite() || !(0.0..=1.0).contains(&self.warmup_fraction) {
            return Err(BacktestError::ConfigError(format!(
                "warmup_fraction must be in [0, 1], got {}",
                self.warmup_fraction
            )));
        }
        if !self.entry_threshold.is_finite() || !self.exit_threshold.is_finite() {
            return Err(BacktestError::ConfigError(
                "thresholds must be finite".to_string(),
            ));
        }
        if self.exit_threshold > self.entry_threshold {
            return Err(BacktestError::ConfigError(format!(
                "exit_threshold ({}) must not exceed entry_threshold ({})",
                self.exit_threshold, self.entry_threshold
            )));
        }
        Ok(())
    }

    /// Number of fully defined rows discarded before trading starts.
    pub fn warmup_rows(&self) -> usize {
        (self.window_width as f64 * self.warmup_fraction).floor() as usize
    }
}

/// Row accounting for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStats {
    /// Rows pushed into the engine.
    pub input_rows: usize,
    /// Rows dropped because a z-score was undefined.
    pub undefined_rows: usize,
    /// Rows discarded as warm-up.
    pub warmup_rows: usize,
    /// Rows dropped for a degenerate return.
    pub flagged_rows: usize,
    /// Rows that produced a [`ReturnRow`].
    pub emitted_rows: usize,
    /// Position entries (including replacements).
    pub entries: usize,
    /// Position exits.
    pub exits: usize,
}

/// Results from a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Configuration used.
    pub config: BacktestConfig,
    /// Emitted rows in timestamp order.
    pub rows: Vec<ReturnRow>,
    /// Sum of strategy log returns.
    pub final_cumulative_strategy: f64,
    /// Sum of baseline log returns.
    pub final_cumulative_baseline: f64,
    pub stats: RunStats,
}

impl BacktestResult {
    /// Compounded simple return of the strategy.
    pub fn total_strategy_return(&self) -> f64 {
        self.final_cumulative_strategy.exp() - 1.0
    }

    /// Compounded simple return of the equal-weight baseline.
    pub fn total_baseline_return(&self) -> f64 {
        self.final_cumulative_baseline.exp() - 1.0
    }

    /// Fraction of emitted rows holding at least one leg.
    pub fn exposure(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        let active = self.rows.iter().filter(|r| !r.positions.is_flat()).count();
        active as f64 / self.rows.len() as f64
    }
}

/// Row-at-a-time backtest engine.
pub struct Engine {
    config: BacktestConfig,
    standardizer: RowStandardizer,
    signal: SignalMachine,
    aggregator: ReturnAggregator,
    last_timestamp: Option<Timestamp>,
    warmup_remaining: usize,
    stats: RunStats,
}

impl Engine {
    /// Create a new engine, validating the configuration.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        let policy = config
            .policy
            .build(config.entry_threshold, config.exit_threshold);
        Ok(Self {
            standardizer: RowStandardizer::new(config.window_width, config.std_convention),
            signal: SignalMachine::new(policy),
            aggregator: ReturnAggregator::new(config.position_timing),
            last_timestamp: None,
            warmup_remaining: config.warmup_rows(),
            stats: RunStats::default(),
            config,
        })
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(BacktestConfig::default())
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    /// Positions currently held.
    pub fn positions(&self) -> PositionState {
        self.signal.state()
    }

    pub fn cumulative_strategy(&self) -> f64 {
        self.aggregator.cumulative_strategy()
    }

    pub fn cumulative_baseline(&self) -> f64 {
        self.aggregator.cumulative_baseline()
    }

    /// Process the next aligned row.
    ///
    /// Returns `Ok(None)` for rows that are consumed without output: undefined
    /// z-scores, warm-up rows and, under [`DegeneratePolicy::Skip`], rows with
    /// a degenerate return or an unusable price.
    ///
    /// Out-of-order rows and unusable prices are rejected before any state
    /// changes. A degenerate return found later fails after the rolling
    /// windows have absorbed the row; call [`reset`](Engine::reset) before
    /// reusing the engine after that error.
    pub fn push(&mut self, row: &AlignedRow) -> Result<Option<ReturnRow>> {
        if let Some(last) = self.last_timestamp {
            if row.timestamp <= last {
                return Err(BacktestError::InvalidInput(format!(
                    "row at {} does not follow {}",
                    row.timestamp, last
                )));
            }
        }

        if let Err(e) = check_prices(row) {
            if self.config.degenerate_returns == DegeneratePolicy::Skip {
                warn!("Skipping row {}: {}", row.timestamp, e);
                self.stats.input_rows += 1;
                self.stats.flagged_rows += 1;
                return Ok(None);
            }
            return Err(e);
        }

        self.last_timestamp = Some(row.timestamp);
        self.stats.input_rows += 1;

        let Some(z_row) = self.standardizer.update(row) else {
            self.stats.undefined_rows += 1;
            return Ok(None);
        };

        if self.warmup_remaining > 0 {
            self.warmup_remaining -= 1;
            self.stats.warmup_rows += 1;
            return Ok(None);
        }

        let ranked = rank_row(&z_row);
        let decision = self.signal.peek(&ranked);

        let out = match self.aggregator.step(row, decision.state) {
            Ok(out) => out,
            Err(BacktestError::DegenerateReturn {
                timestamp,
                instrument,
                value,
            }) if self.config.degenerate_returns == DegeneratePolicy::Skip => {
                warn!(
                    "Skipping row {}: degenerate return {} (instrument {:?})",
                    timestamp, value, instrument
                );
                self.stats.flagged_rows += 1;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        self.signal.commit(decision.state);
        match decision.event {
            SignalEvent::Enter => {
                self.stats.entries += 1;
                debug!(
                    "ENTER at {}: {} (spread {:.4})",
                    row.timestamp,
                    decision.state,
                    ranked.spread()
                );
            }
            SignalEvent::Exit => {
                self.stats.exits += 1;
                debug!("EXIT at {} (spread {:.4})", row.timestamp, ranked.spread());
            }
            SignalEvent::Hold => {}
        }

        self.stats.emitted_rows += 1;
        Ok(Some(out))
    }

    /// Run a whole feed from a clean state.
    pub fn run(&mut self, rows: &[AlignedRow]) -> Result<BacktestResult> {
        self.reset();
        info!(
            "Running {} policy over {} rows (window {}, warm-up {})",
            self.config.policy,
            rows.len(),
            self.config.window_width,
            self.config.warmup_rows()
        );

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(r) = self.push(row)? {
                out.push(r);
            }
        }

        info!(
            "Backtest complete: {} rows emitted, {} entries, {} exits",
            self.stats.emitted_rows, self.stats.entries, self.stats.exits
        );

        Ok(self.result(out))
    }

    /// Package emitted rows with the engine's current totals.
    pub fn result(&self, rows: Vec<ReturnRow>) -> BacktestResult {
        BacktestResult {
            config: self.config.clone(),
            rows,
            final_cumulative_strategy: self.aggregator.cumulative_strategy(),
            final_cumulative_baseline: self.aggregator.cumulative_baseline(),
            stats: self.stats,
        }
    }

    /// Return to the state of a freshly constructed engine.
    pub fn reset(&mut self) {
        self.standardizer.reset();
        self.signal.reset();
        self.aggregator.reset();
        self.last_timestamp = None;
        self.warmup_remaining = self.config.warmup_rows();
        self.stats = RunStats::default();
    }
}

/// Every price must be finite and positive before it reaches the rolling windows.
fn check_prices(row: &AlignedRow) -> Result<()> {
    match row
        .prices
        .iter()
        .position(|p| !(p.is_finite() && *p > 0.0))
    {
        Some(i) => Err(BacktestError::DegenerateReturn {
            timestamp: row.timestamp,
            instrument: Some(i),
            value: row.prices[i],
        }),
        None => Ok(()),
    }
}

/// Run a backtest over an aligned feed.
pub fn run_backtest(config: BacktestConfig, rows: &[AlignedRow]) -> Result<BacktestResult> {
    Engine::new(config)?.run(rows)
}
