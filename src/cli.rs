//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::models::MetricSpec;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// stepstat - step-aligned statistics for distributed training logs
///
/// Scans TensorBoard event files written by every worker of a training run,
/// aligns scalars by step, and writes per-step summary tables.
///
/// Examples:
///   stepstat aggregate runs/async_delay_0000
///   stepstat aggregate runs --batch --metric "Accuracy/test=accuracy:4:desc:mean"
///   stepstat compare runs --method allreduce --against async --target 0.885
///   stepstat compare runs --method async --baseline-zero
///   stepstat smooth time_result --column time --span 8
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .stepstat.toml in the current directory
    #[arg(short, long, value_name = "FILE", global = true, env = "STEPSTAT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only, no progress bars)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Aggregate event logs of one run (or every run under a root) into a stats table
    Aggregate(AggregateArgs),

    /// Compare steps needed to reach target accuracies across a delay sweep
    Compare(CompareArgs),

    /// Exponentially smooth one column of every stats CSV in a directory
    Smooth(SmoothArgs),

    /// Generate a default .stepstat.toml configuration file
    InitConfig,
}

#[derive(clap::Args, Debug, Clone)]
pub struct AggregateArgs {
    /// Run directory containing one folder per worker rank
    #[arg(value_name = "PATH")]
    pub path: PathBuf,

    /// Treat PATH as a root and aggregate each subdirectory as its own run
    #[arg(long)]
    pub batch: bool,

    /// Output file (single-run mode only)
    ///
    /// Defaults to <PATH>/<name>_stats.<ext>
    #[arg(short, long, value_name = "FILE", conflicts_with = "batch")]
    pub output: Option<PathBuf>,

    /// Output format (csv, json)
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Collapse raw steps by integer division before grouping
    #[arg(long, value_name = "N")]
    pub step_divisor: Option<u64>,

    /// Only emit steps where every metric has data
    #[arg(long)]
    pub require_all_tags: bool,

    /// Metric definition `tag=column[:k[:asc|desc[:agg]]]` (repeatable)
    ///
    /// Replaces the metrics from the config file when given.
    /// Example: --metric "Time/train=time:8:asc:mean"
    #[arg(short, long = "metric", value_name = "SPEC")]
    pub metrics: Vec<MetricSpec>,

    /// Number of decimals in CSV output
    #[arg(long, value_name = "DIGITS")]
    pub precision: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct CompareArgs {
    /// Root holding <method>_delay_<ms> directories
    #[arg(value_name = "ROOT")]
    pub root: PathBuf,

    /// Method whose milestones are compared
    #[arg(long, value_name = "NAME")]
    pub method: String,

    /// Second method; the output is <method> minus <against>
    #[arg(long, value_name = "NAME", required_unless_present = "baseline_zero")]
    pub against: Option<String>,

    /// Compare each delay of <method> against its zero-delay run instead
    #[arg(long, conflicts_with = "against")]
    pub baseline_zero: bool,

    /// Target accuracy (repeatable)
    #[arg(short, long = "target", value_name = "VALUE")]
    pub targets: Vec<f64>,

    /// Column holding the tracked accuracy
    #[arg(long, value_name = "NAME")]
    pub column: Option<String>,

    /// Which qualifying row counts as reaching the target (1-based)
    #[arg(long, value_name = "N")]
    pub occurrence: Option<usize>,
}

#[derive(clap::Args, Debug, Clone)]
pub struct SmoothArgs {
    /// Directory of stats CSV files
    #[arg(value_name = "DIR")]
    pub dir: PathBuf,

    /// Column to smooth
    #[arg(long, value_name = "NAME")]
    pub column: Option<String>,

    /// EWM span
    #[arg(long, value_name = "N")]
    pub span: Option<f64>,

    /// Where to write the smoothed tables (defaults to DIR)
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,
}

/// Output format for aggregated tables.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Comma-separated values (default)
    #[default]
    Csv,
    /// JSON with run metadata
    Json,
}

impl OutputFormat {
    /// File extension for this format.
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Csv => "csv",
            OutputFormat::Json => "json",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::Aggregate(agg) => {
                if !agg.path.is_dir() {
                    return Err(format!("Not a directory: {}", agg.path.display()));
                }
                if agg.step_divisor == Some(0) {
                    return Err("Step divisor must be at least 1".to_string());
                }
            }
            Command::Compare(cmp) => {
                if !cmp.root.is_dir() {
                    return Err(format!("Not a directory: {}", cmp.root.display()));
                }
                if cmp.occurrence == Some(0) {
                    return Err("Occurrence must be at least 1".to_string());
                }
                if cmp.targets.iter().any(|t| !t.is_finite()) {
                    return Err("Targets must be finite numbers".to_string());
                }
            }
            Command::Smooth(smooth) => {
                if !smooth.dir.is_dir() {
                    return Err(format!("Not a directory: {}", smooth.dir.display()));
                }
                if let Some(span) = smooth.span {
                    if !(span >= 1.0) {
                        return Err("Span must be at least 1".to_string());
                    }
                }
            }
            Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
