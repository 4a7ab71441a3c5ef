//! Rolling standardization of price series.
//!
//! Each instrument's price is scored against the mean and standard deviation
//! of a trailing window of its own most recent observations, current one
//! included. The window expands from one observation up to its full width, so
//! a score is available as soon as the window holds two distinct prices.
//!
//! # Example
//!
//! ```
//! use trispread::rolling::{RollingZScore, StdConvention, StreamingIndicator};
//!
//! let mut z = RollingZScore::new(3, StdConvention::Sample);
//! for price in [100.0, 101.0, 102.0] {
//!     z.update(price);
//! }
//! assert!((z.value().unwrap() - 1.0).abs() < 1e-12);
//! ```

use crate::types::{AlignedRow, ZScoreRow, INSTRUMENTS};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Trait for streaming indicators.
pub trait StreamingIndicator {
    /// Update indicator with new price.
    fn update(&mut self, price: f64);

    /// Get current indicator value.
    fn value(&self) -> Option<f64>;

    /// Check if indicator has warmed up.
    fn is_ready(&self) -> bool;

    /// Reset indicator state.
    fn reset(&mut self);
}

/// Denominator used for the window variance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdConvention {
    /// Divide by `n - 1`.
    #[default]
    Sample,
    /// Divide by `n`.
    Population,
}

impl StdConvention {
    fn ddof(self) -> f64 {
        match self {
            StdConvention::Sample => 1.0,
            StdConvention::Population => 0.0,
        }
    }
}

/// Mean and standard deviation of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingStat {
    pub mean: f64,
    pub std_dev: f64,
    /// Number of observations in the window.
    pub samples: usize,
}

impl RollingStat {
    /// Standardize `price` against this window.
    ///
    /// Returns `None` when fewer than two samples were seen or the window has
    /// no dispersion.
    pub fn zscore(&self, price: f64) -> Option<f64> {
        if self.samples < 2 || self.std_dev == 0.0 || !self.std_dev.is_finite() {
            return None;
        }
        let z = (price - self.mean) / self.std_dev;
        z.is_finite().then_some(z)
    }
}

/// Trailing-window z-score of a single price series.
///
/// Mean and variance are maintained incrementally with Welford updates. A
/// window made of one repeated value reports a standard deviation of exactly
/// zero regardless of accumulated rounding, and the moments are recomputed
/// from the buffer once per full window of evictions to bound drift.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollingZScore {
    window: usize,
    convention: StdConvention,
    buffer: VecDeque<f64>,
    mean: f64,
    m2: f64,
    /// Length of the run of identical values at the back of the buffer.
    same_run: usize,
    evictions: usize,
}

impl RollingZScore {
    /// Create a new rolling z-score over `window` observations.
    pub fn new(window: usize, convention: StdConvention) -> Self {
        assert!(window > 0, "Window must be positive");
        Self {
            window,
            convention,
            buffer: VecDeque::with_capacity(window.min(1 << 16)),
            mean: 0.0,
            m2: 0.0,
            same_run: 0,
            evictions: 0,
        }
    }

    /// Window width.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Number of observations currently in the window.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Statistics of the current window, `None` before the first update.
    pub fn stat(&self) -> Option<RollingStat> {
        let n = self.buffer.len();
        if n == 0 {
            return None;
        }

        if self.same_run >= n {
            return Some(RollingStat {
                mean: *self.buffer.back()?,
                std_dev: 0.0,
                samples: n,
            });
        }

        let denom = n as f64 - self.convention.ddof();
        let std_dev = if denom > 0.0 {
            (self.m2.max(0.0) / denom).sqrt()
        } else {
            f64::NAN
        };

        Some(RollingStat {
            mean: self.mean,
            std_dev,
            samples: n,
        })
    }

    fn push(&mut self, x: f64) {
        if self.buffer.back() == Some(&x) {
            self.same_run += 1;
        } else {
            self.same_run = 1;
        }
        self.buffer.push_back(x);

        let n = self.buffer.len() as f64;
        let delta = x - self.mean;
        self.mean += delta / n;
        self.m2 += delta * (x - self.mean);
    }

    fn evict(&mut self) {
        let Some(x) = self.buffer.pop_front() else {
            return;
        };
        let n = self.buffer.len();
        if n == 0 {
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }

        let delta = x - self.mean;
        self.mean -= delta / n as f64;
        self.m2 -= delta * (x - self.mean);
        self.same_run = self.same_run.min(n);

        self.evictions += 1;
        if self.evictions >= self.window {
            self.recompute();
        }
    }

    fn recompute(&mut self) {
        let n = self.buffer.len() as f64;
        self.mean = self.buffer.iter().sum::<f64>() / n;
        self.m2 = self
            .buffer
            .iter()
            .map(|&x| {
                let d = x - self.mean;
                d * d
            })
            .sum();
        self.evictions = 0;
    }
}

impl StreamingIndicator for RollingZScore {
    fn update(&mut self, price: f64) {
        self.push(price);
        if self.buffer.len() > self.window {
            self.evict();
        }
    }

    fn value(&self) -> Option<f64> {
        let price = *self.buffer.back()?;
        self.stat()?.zscore(price)
    }

    fn is_ready(&self) -> bool {
        self.buffer.len() >= 2
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.mean = 0.0;
        self.m2 = 0.0;
        self.same_run = 0;
        self.evictions = 0;
    }
}

/// Rolling z-scores of a whole series, `None` where undefined.
pub fn rolling_zscores(prices: &[f64], window: usize, convention: StdConvention) -> Vec<Option<f64>> {
    let mut z = RollingZScore::new(window, convention);
    prices
        .iter()
        .map(|&p| {
            z.update(p);
            z.value()
        })
        .collect()
}

/// One rolling z-score per instrument, updated in lockstep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowStandardizer {
    scores: Vec<RollingZScore>,
}

impl RowStandardizer {
    pub fn new(window: usize, convention: StdConvention) -> Self {
        Self {
            scores: (0..INSTRUMENTS)
                .map(|_| RollingZScore::new(window, convention))
                .collect(),
        }
    }

    /// Feed one aligned row; returns its z-scores when all are defined.
    pub fn update(&mut self, row: &AlignedRow) -> Option<ZScoreRow> {
        let mut z = [0.0; INSTRUMENTS];
        let mut defined = true;
        for (i, score) in self.scores.iter_mut().enumerate() {
            score.update(row.prices[i]);
            match score.value() {
                Some(v) => z[i] = v,
                None => defined = false,
            }
        }
        defined.then_some(ZScoreRow {
            timestamp: row.timestamp,
            z,
        })
    }

    pub fn reset(&mut self) {
        self.scores.iter_mut().for_each(|s| s.reset());
    }
}

/// Standardize a whole aligned feed, keeping only fully defined rows.
pub fn standardize_rows(
    rows: &[AlignedRow],
    window: usize,
    convention: StdConvention,
) -> Vec<ZScoreRow> {
    let mut standardizer = RowStandardizer::new(window, convention);
    rows.iter().filter_map(|row| standardizer.update(row)).collect()
}
