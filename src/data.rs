//! Data loading and alignment of the instrument feeds.
//!
//! Each instrument is read from CSV files holding one row per bar, either a
//! single file or a directory of per-day files named `SYMBOL_<date>.csv`. Only
//! the timestamp and the open price are kept. Rows without an open price are
//! placeholders for non-trading periods and are dropped here, so they never
//! reach the backtest. The three series are then inner-joined on timestamp.

use crate::error::{BacktestError, Result};
use crate::types::{AlignedRow, PricePoint, Timestamp, INSTRUMENTS};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use csv::ReaderBuilder;
use rayon::prelude::*;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Raw CSV row with flexible column names.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "TIMESTAMP",
        alias = "datetime",
        alias = "Datetime",
        alias = "TIME_NUMERIC"
    )]
    date: String,
    #[serde(alias = "Time", alias = "time", alias = "TIME", default)]
    time: Option<String>,
    #[serde(alias = "Open", alias = "open", alias = "OPEN", alias = "o", default)]
    open: Option<f64>,
}

/// Data source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Format of the combined "date time" string (e.g., "%Y-%m-%d %H:%M").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character.
    pub delimiter: u8,
    /// Skip unparseable rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: b',',
            skip_invalid: true,
        }
    }
}

/// Where an instrument's price records live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesSource {
    /// A single CSV file.
    File(PathBuf),
    /// A directory of per-day files named `SYMBOL_*.csv`.
    Dir(PathBuf),
}

/// One instrument of the feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSpec {
    pub symbol: String,
    pub source: SeriesSource,
}

impl SeriesSpec {
    pub fn file(symbol: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            symbol: symbol.into(),
            source: SeriesSource::File(path.into()),
        }
    }

    pub fn dir(symbol: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            symbol: symbol.into(),
            source: SeriesSource::Dir(dir.into()),
        }
    }
}

/// Parse a date (and optional time) into seconds since the epoch.
fn parse_timestamp(date: &str, time: Option<&str>, format: Option<&str>) -> Result<Timestamp> {
    let s = match time {
        Some(t) if !t.trim().is_empty() => format!("{} {}", date.trim(), t.trim()),
        _ => date.trim().to_string(),
    };

    if let Some(fmt) = format {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt).timestamp());
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M",
    ];

    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&s, fmt) {
            return Ok(Utc.from_utc_datetime(&dt).timestamp());
        }
    }

    for fmt in ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(&s, fmt) {
            if let Some(dt) = d.and_hms_opt(0, 0, 0) {
                return Ok(Utc.from_utc_datetime(&dt).timestamp());
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
        return Ok(dt.timestamp());
    }

    // Unix seconds
    if let Ok(ts) = s.parse::<i64>() {
        return Ok(ts);
    }

    Err(BacktestError::DataError(format!(
        "Could not parse date: '{}'",
        s
    )))
}

/// Read the price points of one file without sorting.
fn read_points(path: &Path, config: &DataConfig) -> Result<Vec<PricePoint>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(config.delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut skipped = 0;
    let mut placeholders = 0;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) => {
                if config.skip_invalid {
                    debug!("Skipping row {}: {}", row_num + 1, e);
                    skipped += 1;
                    continue;
                }
                return Err(BacktestError::CsvError(e));
            }
        };

        let open = match row.open {
            Some(p) if p.is_finite() => p,
            _ => {
                placeholders += 1;
                continue;
            }
        };

        let timestamp =
            match parse_timestamp(&row.date, row.time.as_deref(), config.date_format.as_deref()) {
                Ok(ts) => ts,
                Err(e) => {
                    if config.skip_invalid {
                        debug!("Skipping row {} due to date parse error: {}", row_num + 1, e);
                        skipped += 1;
                        continue;
                    }
                    return Err(e);
                }
            };

        points.push(PricePoint::new(timestamp, open));
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }
    if placeholders > 0 {
        debug!(
            "Dropped {} rows without an open price in {}",
            placeholders,
            path.display()
        );
    }

    Ok(points)
}

/// Sort by timestamp and drop duplicate timestamps, keeping the first.
fn sort_and_dedup(points: &mut Vec<PricePoint>) {
    points.sort_by_key(|p| p.timestamp);
    let original_len = points.len();
    points.dedup_by_key(|p| p.timestamp);
    if points.len() < original_len {
        warn!("Removed {} duplicate timestamps", original_len - points.len());
    }
}

/// Load one instrument's open prices from a CSV file.
pub fn load_csv(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<PricePoint>> {
    let path = path.as_ref();
    info!("Loading data from: {}", path.display());

    let mut points = read_points(path, config)?;
    sort_and_dedup(&mut points);

    if points.is_empty() {
        return Err(BacktestError::NoData);
    }

    info!(
        "Loaded {} prices from {} to {}",
        points.len(),
        points[0].timestamp,
        points[points.len() - 1].timestamp
    );
    Ok(points)
}

/// Load and concatenate every `SYMBOL_*.csv` file in a directory.
pub fn load_dir(dir: impl AsRef<Path>, symbol: &str, config: &DataConfig) -> Result<Vec<PricePoint>> {
    let dir = dir.as_ref();
    let prefix = format!("{}_", symbol);

    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".csv"))
        })
        .collect();
    files.sort();

    info!(
        "Loading {} files for {} from {}",
        files.len(),
        symbol,
        dir.display()
    );

    let mut points = Vec::new();
    for file in &files {
        points.extend(read_points(file, config)?);
    }
    sort_and_dedup(&mut points);

    if points.is_empty() {
        return Err(BacktestError::DataError(format!(
            "No prices for {} in {}",
            symbol,
            dir.display()
        )));
    }
    Ok(points)
}

/// Load one instrument from its source.
pub fn load_series(spec: &SeriesSpec, config: &DataConfig) -> Result<Vec<PricePoint>> {
    match &spec.source {
        SeriesSource::File(path) => load_csv(path, config),
        SeriesSource::Dir(dir) => load_dir(dir, &spec.symbol, config),
    }
}

/// Load all instruments in parallel, returned in configuration order.
pub fn load_instruments(
    specs: &[SeriesSpec; INSTRUMENTS],
    config: &DataConfig,
) -> Result<[Vec<PricePoint>; INSTRUMENTS]> {
    let loaded: Vec<Vec<PricePoint>> = specs
        .par_iter()
        .map(|spec| load_series(spec, config))
        .collect::<Result<Vec<_>>>()?;

    loaded
        .try_into()
        .map_err(|_| BacktestError::DataError("instrument count mismatch".to_string()))
}

/// Inner-join instrument series on timestamp.
///
/// A timestamp is kept only when every instrument has a price for it; the
/// result is strictly increasing in timestamp.
pub fn align_series(series: [&[PricePoint]; INSTRUMENTS]) -> Vec<AlignedRow> {
    let maps: Vec<HashMap<Timestamp, f64>> = series
        .iter()
        .map(|points| {
            let mut map = HashMap::with_capacity(points.len());
            for p in points.iter() {
                map.entry(p.timestamp).or_insert(p.open);
            }
            map
        })
        .collect();

    let mut timestamps: Vec<Timestamp> = maps[0].keys().copied().collect();
    timestamps.sort_unstable();

    let rows: Vec<AlignedRow> = timestamps
        .into_iter()
        .filter_map(|ts| {
            let mut prices = [0.0; INSTRUMENTS];
            for (i, map) in maps.iter().enumerate() {
                prices[i] = *map.get(&ts)?;
            }
            Some(AlignedRow::new(ts, prices))
        })
        .collect();

    let dropped = maps.iter().map(HashMap::len).max().unwrap_or(0) - rows.len();
    debug!(
        "Aligned {} timestamps ({} without a price in every series)",
        rows.len(),
        dropped
    );
    rows
}

/// Inner-join that refuses gaps: every timestamp of every series must be
/// present in all of them.
pub fn align_series_strict(
    series: [&[PricePoint]; INSTRUMENTS],
    symbols: [&str; INSTRUMENTS],
) -> Result<Vec<AlignedRow>> {
    let sets: Vec<HashSet<Timestamp>> = series
        .iter()
        .map(|points| points.iter().map(|p| p.timestamp).collect())
        .collect();
    let mut union: Vec<Timestamp> = sets.iter().flatten().copied().collect();
    union.sort_unstable();
    union.dedup();

    for (set, symbol) in sets.iter().zip(symbols) {
        if let Some(&timestamp) = union.iter().find(|ts| !set.contains(*ts)) {
            return Err(BacktestError::MissingData {
                symbol: symbol.to_string(),
                timestamp,
            });
        }
    }

    let rows = align_series(series);
    if rows.is_empty() {
        return Err(BacktestError::NoData);
    }
    Ok(rows)
}

/// Descriptive summary of one price series.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub rows: usize,
    pub start: Timestamp,
    pub end: Timestamp,
    pub min_price: f64,
    pub max_price: f64,
    pub mean_price: f64,
}

/// Summarize a loaded series, `None` if empty.
pub fn summarize(points: &[PricePoint]) -> Option<SeriesSummary> {
    let first = points.first()?;
    let last = points.last()?;
    let min_price = points.iter().map(|p| p.open).fold(f64::INFINITY, f64::min);
    let max_price = points.iter().map(|p| p.open).fold(f64::NEG_INFINITY, f64::max);
    let mean_price = points.iter().map(|p| p.open).sum::<f64>() / points.len() as f64;

    Some(SeriesSummary {
        rows: points.len(),
        start: first.timestamp,
        end: last.timestamp,
        min_price,
        max_price,
        mean_price,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn write_day(dir: &Path, name: &str, rows: &[(&str, &str, &str)]) {
        let mut file = fs::File::create(dir.join(name)).unwrap();
        writeln!(file, "DATE,TIME,OPEN,HIGH,LOW,CLOSE,VOLUME").unwrap();
        for (date, time, open) in rows {
            writeln!(file, "{},{},{},,,,", date, time, open).unwrap();
        }
    }

    fn points(data: &[(Timestamp, f64)]) -> Vec<PricePoint> {
        data.iter().map(|&(t, p)| PricePoint::new(t, p)).collect()
    }

    #[test]
    fn test_parse_timestamp() {
        let ts = parse_timestamp("2024-09-01", Some("18:00"), None).unwrap();
        assert_eq!(ts, 1_725_213_600);

        let ts = parse_timestamp("2024-09-01 18:00:00", None, None).unwrap();
        assert_eq!(ts, 1_725_213_600);

        assert_eq!(parse_timestamp("1725213600", None, None).unwrap(), 1_725_213_600);
        assert!(parse_timestamp("not a date", None, None).is_err());
    }

    #[test]
    fn test_parse_timestamp_explicit_format() {
        let ts = parse_timestamp("01.09.2024", Some("18:00"), Some("%d.%m.%Y %H:%M")).unwrap();
        assert_eq!(ts, 1_725_213_600);
    }

    #[test]
    fn test_load_csv_drops_placeholders() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "DATE,TIME,OPEN,HIGH,LOW,CLOSE,VOLUME").unwrap();
        writeln!(file, "2024-09-01,18:01,5601.25,5602,5600,5601,10").unwrap();
        writeln!(file, "2024-09-01,18:00,5600.00,5601,5599,5600,12").unwrap();
        writeln!(file, "2024-09-01,18:02,,,,,").unwrap();
        writeln!(file, "2024-09-01,18:01,9999.00,5602,5600,5601,10").unwrap();

        let points = load_csv(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].timestamp, 1_725_213_600);
        assert_eq!(points[0].open, 5600.0);
        // First occurrence of a duplicate timestamp wins.
        assert_eq!(points[1].open, 5601.25);
    }

    #[test]
    fn test_load_csv_empty_is_error() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "DATE,TIME,OPEN").unwrap();
        writeln!(file, "2024-09-01,18:00,").unwrap();
        assert!(matches!(
            load_csv(file.path(), &DataConfig::default()),
            Err(BacktestError::NoData)
        ));
    }

    #[test]
    fn test_load_dir_concatenates_days() {
        let dir = tempdir().unwrap();
        write_day(
            dir.path(),
            "MES_2024-09-02.csv",
            &[("2024-09-02", "09:30", "5610.5"), ("2024-09-02", "09:31", "5611.0")],
        );
        write_day(
            dir.path(),
            "MES_2024-09-01.csv",
            &[("2024-09-01", "18:00", "5600.0")],
        );
        write_day(
            dir.path(),
            "MNQ_2024-09-01.csv",
            &[("2024-09-01", "18:00", "19000.0")],
        );

        let points = load_dir(dir.path(), "MES", &DataConfig::default()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].open, 5600.0);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        assert!(load_dir(dir.path(), "MYM", &DataConfig::default()).is_err());
    }

    #[test]
    fn test_load_instruments_in_order() {
        let dir = tempdir().unwrap();
        for (symbol, price) in [("MES", "5600"), ("MNQ", "19000"), ("MYM", "41000")] {
            write_day(
                dir.path(),
                &format!("{}_2024-09-01.csv", symbol),
                &[("2024-09-01", "18:00", price)],
            );
        }
        let specs = [
            SeriesSpec::dir("MYM", dir.path()),
            SeriesSpec::dir("MES", dir.path()),
            SeriesSpec::dir("MNQ", dir.path()),
        ];
        let [a, b, c] = load_instruments(&specs, &DataConfig::default()).unwrap();
        assert_eq!(a[0].open, 41000.0);
        assert_eq!(b[0].open, 5600.0);
        assert_eq!(c[0].open, 19000.0);
    }

    #[test]
    fn test_align_inner_join() {
        let a = points(&[(1, 10.0), (2, 11.0), (3, 12.0), (5, 13.0)]);
        let b = points(&[(2, 20.0), (3, 21.0), (4, 22.0), (5, 23.0)]);
        let c = points(&[(1, 30.0), (3, 31.0), (5, 32.0)]);

        let rows = align_series([&a, &b, &c]);
        let timestamps: Vec<Timestamp> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(timestamps, vec![3, 5]);
        assert_eq!(rows[0].prices, [12.0, 21.0, 31.0]);
        assert_eq!(rows[1].prices, [13.0, 23.0, 32.0]);
        assert!(rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_align_strict_reports_gap() {
        let a = points(&[(1, 10.0), (2, 11.0)]);
        let b = points(&[(1, 20.0), (2, 21.0), (3, 22.0)]);
        let c = points(&[(1, 30.0), (2, 31.0), (3, 32.0)]);

        let err = align_series_strict([&a, &b, &c], ["A", "B", "C"]).unwrap_err();
        match err {
            BacktestError::MissingData { symbol, timestamp } => {
                assert_eq!(symbol, "A");
                assert_eq!(timestamp, 3);
            }
            other => panic!("unexpected error: {}", other),
        }

        let rows = align_series_strict([&b, &c, &c], ["B", "C", "C"]).unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_summarize() {
        let s = summarize(&points(&[(1, 10.0), (2, 14.0), (3, 12.0)])).unwrap();
        assert_eq!(s.rows, 3);
        assert_eq!(s.start, 1);
        assert_eq!(s.end, 3);
        assert_eq!(s.min_price, 10.0);
        assert_eq!(s.max_price, 14.0);
        assert!((s.mean_price - 12.0).abs() < 1e-12);
        assert!(summarize(&[]).is_none());
    }
}
