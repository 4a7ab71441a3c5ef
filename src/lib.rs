//! Trispread - a rolling z-score spread backtester for three instruments.
//!
//! # Overview
//!
//! Three aligned price series are standardized against trailing windows of
//! their own history. On every row the instruments are ranked by z-score, and
//! when the extremes drift far enough apart the strategy shorts the most
//! stretched instrument and buys the most depressed one, betting on
//! convergence. Returns are measured against an equal-weight basket of the
//! same instruments.
//!
//! The pipeline is strictly causal: a row only ever sees data at or before
//! its own timestamp.
//!
//! - [`data`]: load per-instrument CSV files and inner-join them on timestamp
//! - [`rolling`]: trailing-window mean, standard deviation and z-score
//! - [`rank`]: smallest, median and largest z-score of each row
//! - [`signal`]: persistent and stateless position policies
//! - [`returns`]: position-weighted strategy returns and the baseline
//! - [`engine`]: the row-at-a-time pipeline tying the stages together
//! - [`config`] and [`export`]: TOML configuration and result output
//!
//! # Quick Start
//!
//! ```no_run
//! use trispread::data::{align_series, load_csv, DataConfig};
//! use trispread::engine::{BacktestConfig, Engine};
//!
//! let config = DataConfig::default();
//! let a = load_csv("data/MES.csv", &config).unwrap();
//! let b = load_csv("data/MNQ.csv", &config).unwrap();
//! let c = load_csv("data/MYM.csv", &config).unwrap();
//! let rows = align_series([&a, &b, &c]);
//!
//! let mut engine = Engine::new(BacktestConfig {
//!     window_width: 1000,
//!     entry_threshold: 0.6,
//!     ..Default::default()
//! })
//! .unwrap();
//! let result = engine.run(&rows).unwrap();
//!
//! println!("Strategy: {:.2}%", result.total_strategy_return() * 100.0);
//! println!("Baseline: {:.2}%", result.total_baseline_return() * 100.0);
//! ```
//!
//! # Streaming
//!
//! [`Engine::push`] consumes one row at a time and returns the emitted
//! [`ReturnRow`], if any:
//!
//! ```
//! use trispread::engine::{BacktestConfig, Engine};
//! use trispread::types::AlignedRow;
//!
//! let mut engine = Engine::new(BacktestConfig {
//!     window_width: 3,
//!     warmup_fraction: 0.0,
//!     entry_threshold: 1.0,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let feed = [
//!     [100.0, 100.0, 100.0],
//!     [100.0, 101.0, 101.0],
//!     [100.0, 102.0, 102.0],
//!     [105.0, 100.0, 100.0],
//! ];
//! let mut emitted = Vec::new();
//! for (t, prices) in feed.into_iter().enumerate() {
//!     if let Some(row) = engine.push(&AlignedRow::new(t as i64, prices)).unwrap() {
//!         emitted.push(row);
//!     }
//! }
//! assert_eq!(emitted.len(), 1);
//! assert_eq!(emitted[0].positions.weights(), [-1, 1, 1]);
//! ```

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod export;
pub mod rank;
pub mod returns;
pub mod rolling;
pub mod signal;
pub mod types;

// Re-exports for convenience
pub use config::BacktestFileConfig;
pub use data::{align_series, align_series_strict, load_csv, load_dir, load_instruments, DataConfig, SeriesSpec};
pub use engine::{run_backtest, BacktestConfig, BacktestResult, DegeneratePolicy, Engine, RunStats};
pub use error::{BacktestError, Result};
pub use rank::{rank_row, Ranking};
pub use returns::{aggregate_returns, PositionTiming, ReturnAggregator};
pub use rolling::{RollingStat, RollingZScore, RowStandardizer, StdConvention, StreamingIndicator};
pub use signal::{
    PersistentPolicy, PolicyKind, PositionPolicy, SignalEvent, SignalMachine, StatelessPolicy,
};
pub use types::{
    AlignedRow, Position, PositionState, PricePoint, RankedRow, ReturnRow, Timestamp, ZScoreRow,
    INSTRUMENTS,
};
