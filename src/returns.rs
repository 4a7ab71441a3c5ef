//! Strategy and baseline return aggregation.
//!
//! Per row, each instrument's simple return is measured against the previous
//! emitted row. The strategy return is the position-weighted average of those
//! returns normalized by the number of active legs, so a two-leg and a
//! three-leg hedge are on the same scale. The baseline is the equal-weight
//! average of all instruments. Both are accumulated as log returns.

use crate::error::{BacktestError, Result};
use crate::types::{AlignedRow, PositionState, ReturnRow, Timestamp, INSTRUMENTS};
use serde::{Deserialize, Serialize};

/// Which positions are applied to the return ending at a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionTiming {
    /// Positions decided on row `t` weight the return from `t-1` to `t`.
    #[default]
    SameRow,
    /// Positions decided on row `t-1` weight the return from `t-1` to `t`.
    Lagged,
}

/// Simple period-over-period return.
pub fn simple_return(prev: f64, current: f64) -> f64 {
    (current - prev) / prev
}

/// `ln(1 + r)`, or `None` when `r <= -1` or `r` is not finite.
pub fn log_return(r: f64) -> Option<f64> {
    if !r.is_finite() || r <= -1.0 {
        return None;
    }
    Some(r.ln_1p())
}

/// Weight-normalized hedge return; exactly zero when every leg is flat.
pub fn strategy_return(positions: &PositionState, returns: &[f64; INSTRUMENTS]) -> f64 {
    let total_weight = positions.total_weight();
    if total_weight == 0 {
        return 0.0;
    }
    let weighted: f64 = positions
        .weights()
        .iter()
        .zip(returns)
        .map(|(&w, &r)| f64::from(w) * r)
        .sum();
    weighted / f64::from(total_weight)
}

/// Equal-weight average return.
pub fn baseline_return(returns: &[f64; INSTRUMENTS]) -> f64 {
    returns.iter().sum::<f64>() / INSTRUMENTS as f64
}

fn checked_log(timestamp: Timestamp, r: f64) -> Result<f64> {
    log_return(r).ok_or(BacktestError::DegenerateReturn {
        timestamp,
        instrument: None,
        value: r,
    })
}

/// Simple returns of every instrument between two rows.
pub fn instrument_returns(
    timestamp: Timestamp,
    prev: &[f64; INSTRUMENTS],
    current: &[f64; INSTRUMENTS],
) -> Result<[f64; INSTRUMENTS]> {
    let mut returns = [0.0; INSTRUMENTS];
    for i in 0..INSTRUMENTS {
        for price in [prev[i], current[i]] {
            if !(price.is_finite() && price > 0.0) {
                return Err(BacktestError::DegenerateReturn {
                    timestamp,
                    instrument: Some(i),
                    value: price,
                });
            }
        }
        returns[i] = simple_return(prev[i], current[i]);
    }
    Ok(returns)
}

/// Running accumulator of strategy and baseline log returns.
///
/// A failed [`step`](ReturnAggregator::step) leaves the aggregator untouched,
/// so a flagged row can be dropped without disturbing later rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnAggregator {
    timing: PositionTiming,
    prev_prices: Option<[f64; INSTRUMENTS]>,
    held: PositionState,
    cumulative_strategy: f64,
    cumulative_baseline: f64,
}

impl ReturnAggregator {
    pub fn new(timing: PositionTiming) -> Self {
        Self {
            timing,
            prev_prices: None,
            held: PositionState::flat(),
            cumulative_strategy: 0.0,
            cumulative_baseline: 0.0,
        }
    }

    /// Aggregate one row given the positions decided on it.
    ///
    /// The first row has no prior prices and contributes zero returns.
    pub fn step(&mut self, row: &AlignedRow, positions: PositionState) -> Result<ReturnRow> {
        let returns = match &self.prev_prices {
            Some(prev) => instrument_returns(row.timestamp, prev, &row.prices)?,
            None => [0.0; INSTRUMENTS],
        };

        let weights = match self.timing {
            PositionTiming::SameRow => positions,
            PositionTiming::Lagged => self.held,
        };

        let strategy = strategy_return(&weights, &returns);
        let baseline = baseline_return(&returns);
        let strategy_log = checked_log(row.timestamp, strategy)?;
        let baseline_log = checked_log(row.timestamp, baseline)?;

        self.prev_prices = Some(row.prices);
        self.held = positions;
        self.cumulative_strategy += strategy_log;
        self.cumulative_baseline += baseline_log;

        Ok(ReturnRow {
            timestamp: row.timestamp,
            strategy_return: strategy,
            baseline_return: baseline,
            strategy_log_return: strategy_log,
            baseline_log_return: baseline_log,
            cumulative_strategy: self.cumulative_strategy,
            cumulative_baseline: self.cumulative_baseline,
            positions,
        })
    }

    pub fn cumulative_strategy(&self) -> f64 {
        self.cumulative_strategy
    }

    pub fn cumulative_baseline(&self) -> f64 {
        self.cumulative_baseline
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.timing);
    }
}

/// Aggregate a whole sequence of rows and their positions.
pub fn aggregate_returns(
    rows: &[AlignedRow],
    positions: &[PositionState],
    timing: PositionTiming,
) -> Result<Vec<ReturnRow>> {
    if rows.len() != positions.len() {
        return Err(BacktestError::InvalidInput(format!(
            "{} rows but {} position states",
            rows.len(),
            positions.len()
        )));
    }

    let mut aggregator = ReturnAggregator::new(timing);
    rows.iter()
        .zip(positions)
        .map(|(row, &state)| aggregator.step(row, state))
        .collect()
}
