//! Reduction strategies applied to the values selected for one cell.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Named reductions understood besides `mean` and `median`.
pub const NAMED_REDUCTIONS: &[&str] = &["sum", "min", "max", "count", "prod", "std", "var", "sem"];

/// How the selected values of a cell collapse into one number.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Reduction {
    /// Arithmetic average.
    #[default]
    Mean,
    /// Middle element of the ascending-sorted selection.
    Median,
    /// Any other statistic, resolved by name at finalize time.
    Named(String),
}

impl Reduction {
    /// Parse a reduction name. Unknown names are kept as `Named` and only
    /// rejected when applied.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "mean" | "avg" | "average" => Reduction::Mean,
            "median" => Reduction::Median,
            other => Reduction::Named(other.to_string()),
        }
    }

    /// Whether this reduction can be applied.
    pub fn is_supported(&self) -> bool {
        match self {
            Reduction::Mean | Reduction::Median => true,
            Reduction::Named(name) => NAMED_REDUCTIONS.contains(&name.as_str()),
        }
    }

    /// Reduce `values`. Returns `None` for an empty slice, for an unsupported
    /// name, and for sample statistics that need more than one value.
    pub fn apply(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }

        match self {
            Reduction::Mean => Some(mean(values)),
            Reduction::Median => Some(median(values)),
            Reduction::Named(name) => match name.as_str() {
                "sum" => Some(values.iter().sum()),
                "min" => values.iter().copied().min_by(f64::total_cmp),
                "max" => values.iter().copied().max_by(f64::total_cmp),
                "count" => Some(values.len() as f64),
                "prod" => Some(values.iter().product()),
                "var" => sample_variance(values),
                "std" => sample_variance(values).map(f64::sqrt),
                "sem" => {
                    sample_variance(values).map(|v| (v / values.len() as f64).sqrt())
                }
                _ => None,
            },
        }
    }
}

impl From<String> for Reduction {
    fn from(name: String) -> Self {
        Reduction::parse(&name)
    }
}

impl From<Reduction> for String {
    fn from(reduction: Reduction) -> Self {
        reduction.to_string()
    }
}

impl fmt::Display for Reduction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reduction::Mean => write!(f, "mean"),
            Reduction::Median => write!(f, "median"),
            Reduction::Named(name) => write!(f, "{}", name),
        }
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    // Always on an ascending copy, whatever order the selection came in.
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Sample variance (ddof = 1).
fn sample_variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m).powi(2)).sum();
    Some(ss / (values.len() - 1) as f64)
}

/// Ordering used for ranking values; NaN sorts consistently instead of panicking.
pub fn compare_values(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}
