//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.stepstat.toml` files.

use crate::cli::OutputFormat;
use crate::analysis::Reduction;
use crate::error::StatError;
use crate::models::{MetricSpec, SortOrder};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".stepstat.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Event file discovery.
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Metric aggregation.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,

    /// Delay sweep comparison.
    #[serde(default)]
    pub compare: CompareConfig,

    /// Smoothing settings.
    #[serde(default)]
    pub smooth: SmoothConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Show a progress bar while reading event files.
    #[serde(default = "default_true")]
    pub progress: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self { progress: true }
    }
}

fn default_true() -> bool {
    true
}

/// Event file discovery settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// File name prefix of event files.
    #[serde(default = "default_event_prefix")]
    pub event_prefix: String,

    /// Directory or file names to skip.
    #[serde(default)]
    pub excludes: Vec<String>,

    /// Maximum depth below a run directory.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            event_prefix: default_event_prefix(),
            excludes: Vec::new(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_event_prefix() -> String {
    "events.out.tfevents.".to_string()
}

fn default_max_depth() -> usize {
    2
}

/// Aggregation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Integer divisor applied to raw steps before grouping.
    #[serde(default)]
    pub step_divisor: Option<u64>,

    /// Only emit steps at which every metric's tag has data.
    #[serde(default)]
    pub require_all_tags: bool,

    /// Output columns.
    #[serde(default = "default_metrics")]
    pub metrics: Vec<MetricSpec>,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            step_divisor: None,
            require_all_tags: false,
            metrics: default_metrics(),
        }
    }
}

fn default_metrics() -> Vec<MetricSpec> {
    vec![
        MetricSpec::new("Top-1 Accuracy/test", "top_1_accuracy"),
        MetricSpec::new("Top-3 Accuracy/test", "top_3_accuracy"),
    ]
}

/// Report generation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Output format for aggregated tables.
    #[serde(default)]
    pub format: OutputFormat,

    /// Fixed number of decimals; shortest exact form when unset.
    #[serde(default)]
    pub precision: Option<usize>,
}

/// Delay sweep comparison settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompareConfig {
    /// Column holding the accuracy being tracked.
    #[serde(default = "default_compare_column")]
    pub column: String,

    /// Accuracy targets.
    #[serde(default = "default_targets")]
    pub targets: Vec<f64>,

    /// Which qualifying row counts as reaching the target.
    #[serde(default = "default_occurrence")]
    pub occurrence: usize,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            column: default_compare_column(),
            targets: default_targets(),
            occurrence: default_occurrence(),
        }
    }
}

fn default_compare_column() -> String {
    "top_1_accuracy".to_string()
}

fn default_targets() -> Vec<f64> {
    vec![0.885, 0.89, 0.895]
}

fn default_occurrence() -> usize {
    3
}

/// Smoothing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmoothConfig {
    /// Column to smooth.
    #[serde(default = "default_smooth_column")]
    pub column: String,

    /// EWM span.
    #[serde(default = "default_span")]
    pub span: f64,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            column: default_smooth_column(),
            span: default_span(),
        }
    }
}

fn default_smooth_column() -> String {
    "time".to_string()
}

fn default_span() -> f64 {
    8.0
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Check metric definitions and numeric settings.
    pub fn validate(&self) -> Result<(), StatError> {
        let invalid = |key: &str, reason: &str| StatError::InvalidSetting {
            key: key.to_string(),
            reason: reason.to_string(),
        };

        // Also rejects NaN
        if !(self.smooth.span >= 1.0) || self.smooth.span.is_infinite() {
            return Err(invalid("smooth.span", "must be a finite number of at least 1"));
        }
        if self.compare.occurrence == 0 {
            return Err(invalid("compare.occurrence", "must be at least 1"));
        }
        if self.compare.targets.iter().any(|t| !t.is_finite()) {
            return Err(invalid("compare.targets", "must be finite numbers"));
        }
        if self.aggregation.step_divisor == Some(0) {
            return Err(invalid("aggregation.step_divisor", "must be at least 1"));
        }

        let mut columns = HashSet::new();
        for metric in &self.aggregation.metrics {
            metric.validate()?;
            if !columns.insert(metric.column_name.as_str()) {
                return Err(StatError::InvalidMetric {
                    spec: metric.to_string(),
                    reason: "duplicate column name".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        // Quiet mode hides progress bars too
        if args.quiet {
            self.general.progress = false;
        }

        match &args.command {
            crate::cli::Command::Aggregate(agg) => {
                if let Some(divisor) = agg.step_divisor {
                    self.aggregation.step_divisor = Some(divisor);
                }
                if agg.require_all_tags {
                    self.aggregation.require_all_tags = true;
                }
                if !agg.metrics.is_empty() {
                    self.aggregation.metrics = agg.metrics.clone();
                }
                if let Some(format) = agg.format {
                    self.report.format = format;
                }
                if let Some(precision) = agg.precision {
                    self.report.precision = Some(precision);
                }
            }
            crate::cli::Command::Compare(cmp) => {
                if let Some(ref column) = cmp.column {
                    self.compare.column = column.clone();
                }
                if !cmp.targets.is_empty() {
                    self.compare.targets = cmp.targets.clone();
                }
                if let Some(occurrence) = cmp.occurrence {
                    self.compare.occurrence = occurrence;
                }
            }
            crate::cli::Command::Smooth(smooth) => {
                if let Some(ref column) = smooth.column {
                    self.smooth.column = column.clone();
                }
                if let Some(span) = smooth.span {
                    self.smooth.span = span;
                }
            }
            crate::cli::Command::InitConfig => {}
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let mut config = Config::default();
        config.aggregation.metrics = vec![
            MetricSpec::new("Accuracy/test", "mean_top4_accuracy").with_k(4),
            MetricSpec::new("Time/train", "mean_top8_time")
                .with_k(8)
                .with_sort_order(SortOrder::Asc),
            MetricSpec::new("Loss/train", "median_loss").with_agg(Reduction::Median),
        ];
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
