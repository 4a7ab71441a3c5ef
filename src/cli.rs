//! Command-line interface for the backtest engine.

use trispread::config::BacktestFileConfig;
use trispread::data::{
    align_series, align_series_strict, load_csv, load_instruments, summarize, DataConfig, SeriesSpec,
};
use trispread::engine::{BacktestConfig, BacktestResult, DegeneratePolicy, Engine};
use trispread::error::{BacktestError, Result};
use trispread::export::{print_report, to_csv_string, to_json, write_csv};
use trispread::returns::PositionTiming;
use trispread::rolling::StdConvention;
use trispread::signal::PolicyKind;
use trispread::types::{PricePoint, INSTRUMENTS};

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Trispread - rolling z-score spread backtester for three instruments.
#[derive(Parser)]
#[command(name = "trispread")]
#[command(version)]
#[command(about = "Backtest a rolling z-score spread strategy across three instruments")]
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
    /// Run a backtest over three instrument series
    Run {
        /// Instrument as SYMBOL=PATH, or SYMBOL when --dir is given (exactly three, in index order)
        #[arg(short, long = "series", value_parser = parse_series, num_args = 1, required = true)]
        series: Vec<SeriesArg>,

        /// Directory of per-day SYMBOL_*.csv files
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Rolling window width
        #[arg(short, long, default_value = "100000")]
        window: usize,

        /// Fraction of the window discarded as warm-up
        #[arg(long, default_value = "0.01")]
        warmup: f64,

        /// Entry threshold on the z-score spread
        #[arg(long, default_value = "0.6")]
        entry: f64,

        /// Exit threshold on the z-score spread
        #[arg(long, default_value = "0.0")]
        exit: f64,

        /// Position policy
        #[arg(short, long, value_enum, default_value = "persistent")]
        policy: PolicyArg,

        /// Standard deviation convention
        #[arg(long = "std", value_enum, default_value = "sample")]
        std_convention: StdArg,

        /// Handling of rows whose return cannot be log-transformed
        #[arg(long, value_enum, default_value = "abort")]
        degenerate: DegenerateArg,

        /// Which positions weight each row's return
        #[arg(long, value_enum, default_value = "same-row")]
        timing: TimingArg,

        /// Date format of the combined DATE and TIME columns
        #[arg(long)]
        date_format: Option<String>,

        /// Write per-row results to this CSV file
        #[arg(long)]
        output_file: Option<PathBuf>,

        /// Fail when a timestamp is missing from any series instead of dropping it
        #[arg(long)]
        strict: bool,
    },

    /// Run backtest from a TOML configuration file
    RunConfig {
        /// Path to configuration file
        #[arg(short, long)]
        config: PathBuf,
    },

    /// Generate an example configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "trispread.toml")]
        output: PathBuf,
    },

    /// Validate an instrument data file
    Validate {
        /// Path to CSV data file
        #[arg(short, long)]
        data: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    Csv,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    Persistent,
    Stateless,
}

impl From<PolicyArg> for PolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Persistent => PolicyKind::Persistent,
            PolicyArg::Stateless => PolicyKind::Stateless,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum StdArg {
    Sample,
    Population,
}

impl From<StdArg> for StdConvention {
    fn from(arg: StdArg) -> Self {
        match arg {
            StdArg::Sample => StdConvention::Sample,
            StdArg::Population => StdConvention::Population,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum DegenerateArg {
    Abort,
    Skip,
}

impl From<DegenerateArg> for DegeneratePolicy {
    fn from(arg: DegenerateArg) -> Self {
        match arg {
            DegenerateArg::Abort => DegeneratePolicy::Abort,
            DegenerateArg::Skip => DegeneratePolicy::Skip,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum TimingArg {
    SameRow,
    Lagged,
}

impl From<TimingArg> for PositionTiming {
    fn from(arg: TimingArg) -> Self {
        match arg {
            TimingArg::SameRow => PositionTiming::SameRow,
            TimingArg::Lagged => PositionTiming::Lagged,
        }
    }
}

/// One `--series` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesArg {
    pub symbol: String,
    pub path: Option<PathBuf>,
}

fn parse_series(s: &str) -> std::result::Result<SeriesArg, String> {
    let (symbol, path) = match s.split_once('=') {
        Some((symbol, path)) if !path.is_empty() => (symbol, Some(PathBuf::from(path))),
        Some(_) => return Err(format!("missing path in '{}'", s)),
        None => (s, None),
    };
    if symbol.is_empty() {
        return Err(format!("missing symbol in '{}'", s));
    }
    Ok(SeriesArg {
        symbol: symbol.to_string(),
        path,
    })
}

fn series_specs(series: &[SeriesArg], dir: Option<&Path>) -> Result<[SeriesSpec; INSTRUMENTS]> {
    if series.len() != INSTRUMENTS {
        return Err(BacktestError::ConfigError(format!(
            "exactly {} --series arguments are required, got {}",
            INSTRUMENTS,
            series.len()
        )));
    }

    let specs = series
        .iter()
        .map(|s| match (&s.path, dir) {
            (Some(path), _) => Ok(SeriesSpec::file(&s.symbol, path)),
            (None, Some(dir)) => Ok(SeriesSpec::dir(&s.symbol, dir)),
            (None, None) => Err(BacktestError::ConfigError(format!(
                "no path for {} and no --dir given",
                s.symbol
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    specs
        .try_into()
        .map_err(|_| BacktestError::ConfigError("instrument count mismatch".to_string()))
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

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("Warning: a tracing subscriber was already installed");
        }
    }
}

/// Run the CLI application.
pub fn run() -> Result<()> {
    let cli = Cli::parse();
    cli.init_logging();

    match &cli.command {
        Commands::Run {
            series,
            dir,
            window,
            warmup,
            entry,
            exit,
            policy,
            std_convention,
            degenerate,
            timing,
            date_format,
            output_file,
            strict,
        } => {
            let specs = series_specs(series, dir.as_deref())?;
            let config = BacktestConfig {
                window_width: *window,
                warmup_fraction: *warmup,
                entry_threshold: *entry,
                exit_threshold: *exit,
                policy: (*policy).into(),
                std_convention: (*std_convention).into(),
                degenerate_returns: (*degenerate).into(),
                position_timing: (*timing).into(),
            };
            let data_config = DataConfig {
                date_format: date_format.clone(),
                ..Default::default()
            };
            run_backtest(
                &specs,
                &data_config,
                config,
                output_file.as_deref(),
                *strict,
                cli.output,
            )
        }

        Commands::RunConfig { config } => run_from_config(config, cli.output),

        Commands::Init { output } => init_config(output),

        Commands::Validate { data } => validate_data(data),
    }
}

fn run_backtest(
    specs: &[SeriesSpec; INSTRUMENTS],
    data_config: &DataConfig,
    config: BacktestConfig,
    output_file: Option<&Path>,
    strict: bool,
    output: OutputFormat,
) -> Result<()> {
    let mut engine = Engine::new(config)?;

    let symbols: Vec<&str> = specs.iter().map(|s| s.symbol.as_str()).collect();
    info!("Loading instruments: {}", symbols.join(", "));
    let loaded = load_instruments(specs, data_config)?;
    let [a, b, c] = &loaded;
    let series = [a.as_slice(), b.as_slice(), c.as_slice()];
    let rows = if strict {
        let [s0, s1, s2] = specs;
        align_series_strict(series, [&s0.symbol, &s1.symbol, &s2.symbol])?
    } else {
        align_series(series)
    };
    if rows.is_empty() {
        return Err(BacktestError::DataError(format!(
            "no timestamp is shared by {}",
            symbols.join(", ")
        )));
    }
    info!("Aligned {} rows", rows.len());

    let result = engine.run(&rows)?;

    if let Some(path) = output_file {
        write_csv(&result.rows, path)?;
        info!("Wrote {} rows to {}", result.rows.len(), path.display());
    }

    print_result(&result, output)
}

fn print_result(result: &BacktestResult, output: OutputFormat) -> Result<()> {
    match output {
        OutputFormat::Text => print_report(result),
        OutputFormat::Json => println!("{}", to_json(result)?),
        OutputFormat::Csv => print!("{}", to_csv_string(&result.rows)?),
    }
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    let example = BacktestFileConfig::example();
    fs::write(output, example)?;
    println!("Created example configuration file: {}", output.display());
    println!("\nEdit this file to customize your backtest, then run:");
    println!("  trispread run-config -c {}", output.display());
    Ok(())
}

fn run_from_config(config_path: &Path, output: OutputFormat) -> Result<()> {
    let file_config = BacktestFileConfig::load(config_path)?;
    let backtest_config = file_config.to_backtest_config()?;
    let specs = file_config.series_specs()?;
    let data_config = file_config.data_config()?;
    let output_file = file_config.output.path.as_deref().map(Path::new);

    run_backtest(&specs, &data_config, backtest_config, output_file, false, output)
}

fn validate_data(data_path: &Path) -> Result<()> {
    println!("Validating data file: {}", data_path.display());

    let points: Vec<PricePoint> = load_csv(data_path, &DataConfig::default())?;
    let summary = summarize(&points).ok_or(BacktestError::NoData)?;
    let format_ts = |ts: i64| {
        chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| ts.to_string())
    };

    println!("\nData Summary:");
    println!("  Rows: {}", summary.rows);
    println!("  Start: {}", format_ts(summary.start));
    println!("  End: {}", format_ts(summary.end));
    println!(
        "  Open Range: {:.2} - {:.2}",
        summary.min_price, summary.max_price
    );
    println!("  Average Open: {:.2}", summary.mean_price);

    println!("\nValidation: PASSED");
    Ok(())
}
