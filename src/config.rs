//! Configuration file support for backtests.
//!
//! Allows loading backtest configurations from TOML files for reproducibility.

use crate::data::{DataConfig, SeriesSpec};
use crate::engine::{BacktestConfig, DegeneratePolicy};
use crate::error::{BacktestError, Result};
use crate::returns::PositionTiming;
use crate::rolling::StdConvention;
use crate::signal::PolicyKind;
use crate::types::INSTRUMENTS;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Complete backtest configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    /// Core backtest settings.
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Data settings.
    #[serde(default)]
    pub data: DataSettings,
    /// Output settings.
    #[serde(default)]
    pub output: OutputSettings,
}

/// Core backtest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_window_width")]
    pub window_width: usize,
    #[serde(default = "default_warmup_fraction")]
    pub warmup_fraction: f64,
    #[serde(default = "default_entry_threshold")]
    pub entry_threshold: f64,
    #[serde(default)]
    pub exit_threshold: f64,
    #[serde(default)]
    pub policy: PolicyKind,
    #[serde(default)]
    pub std_convention: StdConvention,
    #[serde(default)]
    pub degenerate_returns: DegeneratePolicy,
    #[serde(default)]
    pub position_timing: PositionTiming,
}

fn default_window_width() -> usize { 100_000 }
fn default_warmup_fraction() -> f64 { 0.01 }
fn default_entry_threshold() -> f64 { 0.6 }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            window_width: default_window_width(),
            warmup_fraction: default_warmup_fraction(),
            entry_threshold: default_entry_threshold(),
            exit_threshold: 0.0,
            policy: PolicyKind::default(),
            std_convention: StdConvention::default(),
            degenerate_returns: DegeneratePolicy::default(),
            position_timing: PositionTiming::default(),
        }
    }
}

/// Data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// Directory holding per-day `SYMBOL_*.csv` files.
    pub dir: Option<String>,
    /// Date format in CSV.
    pub date_format: Option<String>,
    /// CSV delimiter.
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Instruments in index order.
    #[serde(default)]
    pub instruments: Vec<InstrumentSettings>,
}

fn default_delimiter() -> char { ',' }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            dir: None,
            date_format: None,
            delimiter: ',',
            instruments: Vec::new(),
        }
    }
}

/// One instrument entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub symbol: String,
    /// Explicit CSV file; when absent the data directory is scanned.
    pub path: Option<String>,
}

/// Output settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputSettings {
    /// Where to write the per-row CSV, if anywhere.
    pub path: Option<String>,
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to a validated BacktestConfig for the engine.
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        let b = &self.backtest;
        let config = BacktestConfig {
            window_width: b.window_width,
            warmup_fraction: b.warmup_fraction,
            entry_threshold: b.entry_threshold,
            exit_threshold: b.exit_threshold,
            policy: b.policy,
            std_convention: b.std_convention,
            degenerate_returns: b.degenerate_returns,
            position_timing: b.position_timing,
        };
        config.validate()?;
        Ok(config)
    }

    /// CSV reader settings.
    pub fn data_config(&self) -> Result<DataConfig> {
        if !self.data.delimiter.is_ascii() {
            return Err(BacktestError::ConfigError(format!(
                "delimiter must be a single ASCII character, got '{}'",
                self.data.delimiter
            )));
        }
        Ok(DataConfig {
            date_format: self.data.date_format.clone(),
            delimiter: self.data.delimiter as u8,
            ..Default::default()
        })
    }

    /// Resolve where each instrument's prices come from.
    pub fn series_specs(&self) -> Result<[SeriesSpec; INSTRUMENTS]> {
        let instruments = &self.data.instruments;
        if instruments.len() != INSTRUMENTS {
            return Err(BacktestError::ConfigError(format!(
                "exactly {} instruments are required, got {}",
                INSTRUMENTS,
                instruments.len()
            )));
        }

        let specs = instruments
            .iter()
            .map(|inst| match (&inst.path, &self.data.dir) {
                (Some(path), _) => Ok(SeriesSpec::file(&inst.symbol, PathBuf::from(path))),
                (None, Some(dir)) => Ok(SeriesSpec::dir(&inst.symbol, PathBuf::from(dir))),
                (None, None) => Err(BacktestError::ConfigError(format!(
                    "instrument {} has no path and no data directory is set",
                    inst.symbol
                ))),
            })
            .collect::<Result<Vec<_>>>()?;

        specs
            .try_into()
            .map_err(|_| BacktestError::ConfigError("instrument count mismatch".to_string()))
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Trispread Backtest Configuration File
# Rolling z-score spread strategy over three instruments

[backtest]
window_width = 100000
warmup_fraction = 0.01
entry_threshold = 0.6
exit_threshold = 0.0
policy = "persistent"          # or "stateless"
std_convention = "sample"      # or "population"
degenerate_returns = "abort"   # or "skip"
position_timing = "same_row"   # or "lagged"

[data]
dir = "data"
date_format = "%Y-%m-%d %H:%M"
delimiter = ","

# Instruments in index order. Without a path, every file in `dir`
# named SYMBOL_*.csv is loaded.
[[data.instruments]]
symbol = "MES"

[[data.instruments]]
symbol = "MNQ"

[[data.instruments]]
symbol = "MYM"
# path = "data/MYM.csv"

[output]
# path = "results.csv"
"#
        .to_string()
    }
}
