//! Export utilities for backtest results.
//!
//! | Format | Use Case |
//! |--------|----------|
//! | CSV | One record per emitted row, for plotting and spreadsheets |
//! | JSON | Summary plus full result, for API integration |
//! | Text | Console report |

use crate::engine::{BacktestResult, RunStats};
use crate::error::{BacktestError, Result};
use crate::types::{ReturnRow, Timestamp};
use chrono::DateTime;
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;

/// Flat CSV record for one [`ReturnRow`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnRecord {
    pub timestamp: Timestamp,
    pub datetime: String,
    pub position_0: i8,
    pub position_1: i8,
    pub position_2: i8,
    pub strategy_return: f64,
    pub baseline_return: f64,
    pub cumulative_strategy: f64,
    pub cumulative_baseline: f64,
}

impl From<&ReturnRow> for ReturnRecord {
    fn from(row: &ReturnRow) -> Self {
        let [position_0, position_1, position_2] = row.positions.weights();
        Self {
            timestamp: row.timestamp,
            datetime: DateTime::from_timestamp(row.timestamp, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
            position_0,
            position_1,
            position_2,
            strategy_return: row.strategy_return,
            baseline_return: row.baseline_return,
            cumulative_strategy: row.cumulative_strategy,
            cumulative_baseline: row.cumulative_baseline,
        }
    }
}

fn write_records<W: Write>(writer: &mut Writer<W>, rows: &[ReturnRow]) -> Result<()> {
    for row in rows {
        writer.serialize(ReturnRecord::from(row))?;
    }
    writer.flush()?;
    Ok(())
}

/// Export emitted rows to a CSV file.
pub fn write_csv(rows: &[ReturnRow], path: impl AsRef<Path>) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    write_records(&mut writer, rows)
}

/// Emitted rows as CSV text.
pub fn to_csv_string(rows: &[ReturnRow]) -> Result<String> {
    let mut writer = Writer::from_writer(Vec::new());
    write_records(&mut writer, rows)?;
    let bytes = writer
        .into_inner()
        .map_err(|e| BacktestError::DataError(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| BacktestError::DataError(e.to_string()))
}

/// Performance summary for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub policy: String,
    pub window_width: usize,
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub cumulative_strategy: f64,
    pub cumulative_baseline: f64,
    pub total_strategy_return_pct: f64,
    pub total_baseline_return_pct: f64,
    pub exposure_pct: f64,
    pub stats: RunStats,
}

impl RunSummary {
    /// Create summary from backtest result.
    pub fn from_result(result: &BacktestResult) -> Self {
        Self {
            policy: result.config.policy.to_string(),
            window_width: result.config.window_width,
            start: result.rows.first().map(|r| r.timestamp),
            end: result.rows.last().map(|r| r.timestamp),
            cumulative_strategy: result.final_cumulative_strategy,
            cumulative_baseline: result.final_cumulative_baseline,
            total_strategy_return_pct: result.total_strategy_return() * 100.0,
            total_baseline_return_pct: result.total_baseline_return() * 100.0,
            exposure_pct: result.exposure() * 100.0,
            stats: result.stats,
        }
    }
}

#[derive(Serialize)]
struct JsonReport<'a> {
    summary: RunSummary,
    result: &'a BacktestResult,
}

/// Summary and full result as pretty JSON.
pub fn to_json(result: &BacktestResult) -> Result<String> {
    let report = JsonReport {
        summary: RunSummary::from_result(result),
        result,
    };
    Ok(serde_json::to_string_pretty(&report)?)
}

fn format_timestamp(ts: Option<Timestamp>) -> String {
    ts.and_then(|t| DateTime::from_timestamp(t, 0))
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Console report of a run.
pub fn format_report(result: &BacktestResult) -> String {
    let s = RunSummary::from_result(result);
    let mut out = String::new();

    out.push_str("Backtest Results\n");
    out.push_str(&"=".repeat(40));
    out.push('\n');
    out.push_str(&format!("Policy:              {}\n", s.policy));
    out.push_str(&format!("Window:              {}\n", s.window_width));
    out.push_str(&format!(
        "Period:              {} to {}\n",
        format_timestamp(s.start),
        format_timestamp(s.end)
    ));
    out.push('\n');
    out.push_str(&format!("Strategy return:     {:>10.4}%\n", s.total_strategy_return_pct));
    out.push_str(&format!("Baseline return:     {:>10.4}%\n", s.total_baseline_return_pct));
    out.push_str(&format!("Cumulative log (S):  {:>10.6}\n", s.cumulative_strategy));
    out.push_str(&format!("Cumulative log (B):  {:>10.6}\n", s.cumulative_baseline));
    out.push_str(&format!("Exposure:            {:>10.2}%\n", s.exposure_pct));
    out.push('\n');
    out.push_str(&format!(
        "Rows: {} in, {} undefined, {} warm-up, {} flagged, {} emitted\n",
        s.stats.input_rows,
        s.stats.undefined_rows,
        s.stats.warmup_rows,
        s.stats.flagged_rows,
        s.stats.emitted_rows
    ));
    out.push_str(&format!(
        "Signals: {} entries, {} exits\n",
        s.stats.entries, s.stats.exits
    ));
    out
}

/// Print the console report to stdout.
pub fn print_report(result: &BacktestResult) {
    print!("{}", format_report(result));
}
