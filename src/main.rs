//! stepstat - step-aligned statistics for distributed training logs
//!
//! A CLI tool that reads the TensorBoard event files written by every worker
//! of a distributed training run, aligns their scalars by step, and writes
//! per-step summary tables.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (bad arguments, unreadable logs, write failure, etc.)

mod analysis;
mod cli;
mod config;
mod error;
mod events;
mod loader;
mod models;
mod report;
mod scanner;

use analysis::milestones::{self, MilestoneQuery};
use analysis::smoothing::ewm_mean;
use anyhow::{Context, Result};
use chrono::Utc;
use cli::{AggregateArgs, Args, Command, CompareArgs, SmoothArgs};
use config::{Config, CONFIG_FILE};
use loader::{load_run, LoadOptions};
use models::{ReportMetadata, StatsReport};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("stepstat v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args) {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle init-config: generate a default .stepstat.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE);

    if path.exists() {
        eprintln!("⚠️  {} already exists. Remove it first or edit it manually.", CONFIG_FILE);
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content).with_context(|| format!("Failed to write {}", CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE);
    println!("   Edit it to customize metrics, step grouping, and output format.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Dispatch the selected command.
fn run(args: Args) -> Result<()> {
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    match args.command {
        Command::Aggregate(ref agg) => run_aggregate(agg, &config),
        Command::Compare(ref cmp) => run_compare(cmp, &config),
        Command::Smooth(ref smooth) => run_smooth(smooth, &config),
        Command::InitConfig => handle_init_config(),
    }
}

/// Aggregate one run, or every run under a root in batch mode.
fn run_aggregate(args: &AggregateArgs, config: &Config) -> Result<()> {
    let start_time = Instant::now();

    let runs = if args.batch {
        scanner::discover_runs(&args.path)?
    } else {
        vec![args.path.clone()]
    };

    if runs.is_empty() {
        warn!("No run directories found under {}", args.path.display());
        return Ok(());
    }

    let metrics = &config.aggregation.metrics;
    println!("📊 Aggregating {} run(s) with {} metric(s)", runs.len(), metrics.len());
    for metric in metrics {
        println!("   - {}", metric);
    }

    let options = LoadOptions {
        scan: scanner::ScanConfig::from(&config.scanner),
        step_divisor: config.aggregation.step_divisor,
        show_progress: config.general.progress,
    };

    for run_dir in &runs {
        let output = match args.output {
            Some(ref path) => path.clone(),
            None => default_output_path(run_dir, config.report.format.extension()),
        };
        aggregate_run(run_dir, &output, config, &options)?;
    }

    println!(
        "\n✅ Aggregation complete in {:.1}s",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}

/// `<run>/<run name>_stats.<ext>`
fn default_output_path(run_dir: &Path, extension: &str) -> PathBuf {
    let name = run_name(run_dir);
    run_dir.join(format!("{}_stats.{}", name, extension))
}

fn run_name(run_dir: &Path) -> String {
    run_dir
        .canonicalize()
        .unwrap_or_else(|_| run_dir.to_path_buf())
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "run".to_string())
}

fn aggregate_run(
    run_dir: &Path,
    output: &Path,
    config: &Config,
    options: &LoadOptions,
) -> Result<()> {
    println!("\n🔍 Reading {}", run_dir.display());

    let metrics = &config.aggregation.metrics;
    let aggregator = load_run(run_dir, metrics, options)?;
    if aggregator.is_empty() {
        warn!("No observations for the configured tags in {}", run_dir.display());
    }
    debug!("Tags seen: {:?}", aggregator.tags());
    for metric in metrics {
        if aggregator.steps_for(&metric.tag).is_empty() {
            warn!("No source in {} logged '{}'", run_dir.display(), metric.tag);
        }
    }

    let table = aggregator.finalize_table(metrics, config.aggregation.require_all_tags);
    if table.is_empty() {
        warn!("No steps to report for {}", run_dir.display());
    }

    let report = StatsReport {
        metadata: ReportMetadata {
            run: run_name(run_dir),
            generated_at: Utc::now(),
            sources: aggregator.sources().len(),
            observations: aggregator.len(),
            require_all_tags: config.aggregation.require_all_tags,
            step_divisor: config.aggregation.step_divisor,
            metrics: metrics.clone(),
        },
        table,
    };

    report::write_report(
        &report,
        output,
        config.report.format,
        config.report.precision,
    )?;

    println!(
        "   {} sources, {} observations, {} steps, {} empty cells",
        report.metadata.sources,
        report.metadata.observations,
        report.table.rows.len(),
        report.table.null_count()
    );
    println!("   Saved to {}", output.display());
    Ok(())
}

/// Compare milestones across a delay sweep.
fn run_compare(args: &CompareArgs, config: &Config) -> Result<()> {
    let query = MilestoneQuery {
        column: config.compare.column.clone(),
        targets: config.compare.targets.clone(),
        occurrence: config.compare.occurrence,
    };

    let (table, output) = match args.against {
        Some(ref against) if !args.baseline_zero => {
            let index = milestones::collect_milestones(
                &args.root,
                &[args.method.as_str(), against.as_str()],
                &query,
            )?;
            let table =
                milestones::pairwise_differences(&index, &args.method, against, &query.targets);
            (table, args.root.join("time_differences.csv"))
        }
        _ => {
            let index =
                milestones::collect_milestones(&args.root, &[args.method.as_str()], &query)?;
            let table = milestones::zero_delay_differences(&index, &args.method, &query.targets);
            let name = format!("{}_time_differences_with_zero_delay.csv", args.method);
            (table, args.root.join(name))
        }
    };

    if table.rows.is_empty() {
        warn!("No matching delay directories under {}", args.root.display());
    }

    report::write_differences_csv(&table, &output)?;
    println!("✅ Time differences saved to {}", output.display());
    Ok(())
}

/// Smooth one column of every stats CSV in a directory.
fn run_smooth(args: &SmoothArgs, config: &Config) -> Result<()> {
    let out_dir = args.out_dir.clone().unwrap_or_else(|| args.dir.clone());
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let column = &config.smooth.column;
    let mut written = 0usize;

    for path in scanner::files_with_suffix(&args.dir, ".csv")? {
        let name = path.file_name().map(|n| n.to_string_lossy().to_string());
        if name.as_deref().is_some_and(|n| n.ends_with("_smoothed.csv")) {
            continue;
        }

        let table = report::read_table(&path)?;
        let Some(index) = table.column_index(column) else {
            warn!("Missing '{}' column in file: {}", column, path.display());
            continue;
        };

        let steps: Vec<_> = table.rows.iter().map(|r| r.step).collect();
        let raw: Vec<_> = table.rows.iter().map(|r| r.value(index)).collect();
        let smoothed = ewm_mean(&raw, config.smooth.span);

        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let output = out_dir.join(format!("{}_smoothed.csv", stem));
        report::write_smoothed_csv(
            &output,
            column,
            &steps,
            &raw,
            &smoothed,
            config.report.precision,
        )?;
        debug!("Smoothed {} -> {}", path.display(), output.display());
        written += 1;
    }

    println!("✅ Wrote {} smoothed table(s) to {}", written, out_dir.display());
    Ok(())
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {:#}", e);
            Ok(Config::default())
        }
    }
}
