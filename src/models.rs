//! Data models for the metric aggregator.
//!
//! This module contains the core data structures used throughout the
//! application for representing observations, metric definitions, and
//! aggregated result tables.

use crate::analysis::Reduction;
use crate::error::StatError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Training step used as the alignment key across sources.
pub type Step = u64;

/// A single scalar logged by one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Opaque identifier of the worker/shard (event file path).
    pub source_id: String,
    /// Metric name, e.g. `Accuracy/test`.
    pub tag: String,
    /// Raw step as logged, before any step transform.
    pub step: Step,
    /// Measured value.
    pub value: f64,
}

impl Observation {
    pub fn new(source_id: impl Into<String>, tag: impl Into<String>, step: Step, value: f64) -> Self {
        Self {
            source_id: source_id.into(),
            tag: tag.into(),
            step,
            value,
        }
    }
}

/// Order in which values are ranked before top-k selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Smallest first (e.g. fastest workers).
    Asc,
    /// Largest first (e.g. best accuracies).
    #[default]
    Desc,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Asc => write!(f, "asc"),
            SortOrder::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "asc" | "ascending" => Ok(SortOrder::Asc),
            "desc" | "descending" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}'", other)),
        }
    }
}

/// Definition of one output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSpec {
    /// Tag to read from the event logs.
    pub tag: String,
    /// Name of the output column.
    pub column_name: String,
    /// How many ranked values contribute; `None` uses all of them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k: Option<usize>,
    /// Ranking direction applied before selecting `k` values.
    #[serde(default)]
    pub sort_order: SortOrder,
    /// Reduction applied to the selected values.
    #[serde(default)]
    pub agg_func: Reduction,
}

impl MetricSpec {
    pub fn new(tag: impl Into<String>, column_name: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            column_name: column_name.into(),
            k: None,
            sort_order: SortOrder::Desc,
            agg_func: Reduction::Mean,
        }
    }

    pub fn with_k(mut self, k: usize) -> Self {
        self.k = Some(k);
        self
    }

    pub fn with_sort_order(mut self, order: SortOrder) -> Self {
        self.sort_order = order;
        self
    }

    pub fn with_agg(mut self, agg: Reduction) -> Self {
        self.agg_func = agg;
        self
    }

    /// Reject metric definitions with values that can never produce a result.
    pub fn validate(&self) -> Result<(), StatError> {
        let invalid = |reason: &str| StatError::InvalidMetric {
            spec: self.to_string(),
            reason: reason.to_string(),
        };

        if self.tag.trim().is_empty() {
            return Err(invalid("tag must not be empty"));
        }
        if self.column_name.trim().is_empty() {
            return Err(invalid("column name must not be empty"));
        }
        if self.column_name == "step" {
            return Err(invalid("'step' is reserved for the key column"));
        }
        if self.k == Some(0) {
            return Err(invalid("k must be at least 1"));
        }
        Ok(())
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.tag, self.column_name)?;
        match self.k {
            Some(k) => write!(f, ":{}", k)?,
            None => write!(f, ":all")?,
        }
        write!(f, ":{}:{}", self.sort_order, self.agg_func)
    }
}

/// Parses `tag=column[:k[:asc|desc[:agg]]]`, where `k` may be `all`.
impl FromStr for MetricSpec {
    type Err = StatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| StatError::InvalidMetric {
            spec: s.to_string(),
            reason,
        };

        let (tag, rest) = s
            .split_once('=')
            .ok_or_else(|| invalid("expected 'tag=column'".to_string()))?;

        let mut parts = rest.split(':');
        let column = parts.next().unwrap_or_default();
        let mut spec = MetricSpec::new(tag.trim(), column.trim());

        if let Some(k) = parts.next().map(str::trim).filter(|p| !p.is_empty()) {
            if !k.eq_ignore_ascii_case("all") {
                let k: usize = k
                    .parse()
                    .map_err(|_| invalid(format!("k must be a positive integer, got '{}'", k)))?;
                spec.k = Some(k);
            }
        }

        if let Some(order) = parts.next().map(str::trim).filter(|p| !p.is_empty()) {
            spec.sort_order = order.parse().map_err(invalid)?;
        }

        if let Some(agg) = parts.next().map(str::trim).filter(|p| !p.is_empty()) {
            spec.agg_func = Reduction::parse(agg);
        }

        if parts.next().is_some() {
            return Err(invalid("too many ':' separated fields".to_string()));
        }

        spec.validate()?;
        Ok(spec)
    }
}

/// One aggregated output record; `values` is aligned with the metric specs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub step: Step,
    pub values: Vec<Option<f64>>,
}

impl ResultRow {
    /// Value of the `index`-th column, `None` when no source reported it.
    pub fn value(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied().flatten()
    }
}

/// A finalized table: column names plus rows sorted by step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepTable {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

impl StepTable {
    pub fn new(columns: Vec<String>, rows: Vec<ResultRow>) -> Self {
        Self { columns, rows }
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Number of null cells across the table.
    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .map(|r| r.values.iter().filter(|v| v.is_none()).count())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Metadata about one aggregated run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    /// Name of the run directory.
    pub run: String,
    /// When the table was produced.
    pub generated_at: DateTime<Utc>,
    /// Number of event files that contributed.
    pub sources: usize,
    /// Number of ingested observations.
    pub observations: usize,
    /// Whether rows required every tag to be present.
    pub require_all_tags: bool,
    /// Step divisor applied before grouping, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_divisor: Option<u64>,
    /// Metric definitions, in column order.
    pub metrics: Vec<MetricSpec>,
}

/// A finalized table plus the metadata describing how it was built.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub metadata: ReportMetadata,
    pub table: StepTable,
}
