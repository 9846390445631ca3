//! Time-to-target comparison across delay sweeps.
//!
//! A sweep root holds one directory per `<method>_delay_<ms>` experiment,
//! each with `*_stats.csv` tables produced by `aggregate`. For every target
//! accuracy we find the step at which the accuracy column reaches the target
//! for the n-th time, then difference those steps across methods or against
//! the zero-delay run.

use crate::models::{Step, StepTable};
use crate::report::read_table;
use crate::scanner;
use anyhow::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, warn};

const DELAY_MARKER: &str = "_delay_";

/// What counts as reaching a target.
#[derive(Debug, Clone)]
pub struct MilestoneQuery {
    /// Column compared against the targets.
    pub column: String,
    /// Target values, in output column order.
    pub targets: Vec<f64>,
    /// Which qualifying row counts (1-based).
    pub occurrence: usize,
}

/// Step of the `occurrence`-th row whose `column` is `>= target`.
pub fn time_to_target(
    table: &StepTable,
    column: usize,
    target: f64,
    occurrence: usize,
) -> Option<Step> {
    table
        .rows
        .iter()
        .filter(|row| row.value(column).is_some_and(|v| v >= target))
        .nth(occurrence.checked_sub(1)?)
        .map(|row| row.step)
}

/// Split `allreduce_delay_0040` into `("allreduce", 40)`.
pub fn parse_delay_dir(name: &str) -> Option<(&str, u64)> {
    let (method, delay) = name.split_once(DELAY_MARKER)?;
    Some((method, delay.parse().ok()?))
}

/// Milestone steps per method and delay; one slot per target.
#[derive(Debug, Clone, Default)]
pub struct MilestoneIndex {
    by_method: BTreeMap<String, BTreeMap<u64, Vec<Option<Step>>>>,
}

impl MilestoneIndex {
    /// Record the milestones of one stats table.
    pub fn record(&mut self, method: &str, delay_ms: u64, milestones: Vec<Option<Step>>) {
        let slots = self
            .by_method
            .entry(method.to_string())
            .or_default()
            .entry(delay_ms)
            .or_insert_with(|| vec![None; milestones.len()]);

        // Later tables only fill in targets they actually reached.
        for (slot, found) in slots.iter_mut().zip(milestones) {
            if found.is_some() {
                *slot = found;
            }
        }
    }

    /// Make a delay known for `method` even when no target was reached.
    pub fn register_delay(&mut self, method: &str, delay_ms: u64, targets: usize) {
        self.by_method
            .entry(method.to_string())
            .or_default()
            .entry(delay_ms)
            .or_insert_with(|| vec![None; targets]);
    }

    pub fn delays(&self, method: &str) -> BTreeSet<u64> {
        self.by_method
            .get(method)
            .map(|d| d.keys().copied().collect())
            .unwrap_or_default()
    }

    pub fn milestone(&self, method: &str, delay_ms: u64, target: usize) -> Option<Step> {
        self.by_method
            .get(method)?
            .get(&delay_ms)?
            .get(target)
            .copied()
            .flatten()
    }
}

/// Scan a sweep root and compute milestones for the given methods.
pub fn collect_milestones(
    root: &Path,
    methods: &[&str],
    query: &MilestoneQuery,
) -> Result<MilestoneIndex> {
    let mut index = MilestoneIndex::default();

    for dir in scanner::discover_runs(root)? {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.contains(DELAY_MARKER) {
            continue;
        }
        let Some((method, delay_ms)) = parse_delay_dir(name) else {
            warn!("Cannot parse delay from directory name: {}", name);
            continue;
        };
        if !methods.contains(&method) {
            continue;
        }

        index.register_delay(method, delay_ms, query.targets.len());

        for stats_file in scanner::files_with_suffix(&dir, "_stats.csv")? {
            let table = read_table(&stats_file)?;
            let Some(column) = table.column_index(&query.column) else {
                warn!(
                    "Missing '{}' column in file: {}",
                    query.column,
                    stats_file.display()
                );
                continue;
            };

            let milestones = query
                .targets
                .iter()
                .map(|t| time_to_target(&table, column, *t, query.occurrence))
                .collect();
            debug!("{} -> {:?}", stats_file.display(), milestones);
            index.record(method, delay_ms, milestones);
        }
    }

    Ok(index)
}

/// One output row: a delay and the signed step difference per target.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferenceRow {
    pub delay_ms: u64,
    pub differences: Vec<Option<i64>>,
}

/// Step differences per delay, one column per target.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DifferenceTable {
    pub targets: Vec<f64>,
    pub rows: Vec<DifferenceRow>,
}

impl DifferenceTable {
    /// Column headers, delay first.
    pub fn headers(&self) -> Vec<String> {
        std::iter::once("Delay (ms)".to_string())
            .chain(
                self.targets
                    .iter()
                    .map(|t| format!("Time Difference for Target Accuracy {}", t)),
            )
            .collect()
    }
}

fn difference(later: Option<Step>, earlier: Option<Step>) -> Option<i64> {
    Some(later? as i64 - earlier? as i64)
}

/// `milestone(a) - milestone(b)` for every delay either method ran.
pub fn pairwise_differences(
    index: &MilestoneIndex,
    method_a: &str,
    method_b: &str,
    targets: &[f64],
) -> DifferenceTable {
    let delays: BTreeSet<u64> = index
        .delays(method_a)
        .union(&index.delays(method_b))
        .copied()
        .collect();

    let rows = delays
        .into_iter()
        .map(|delay_ms| DifferenceRow {
            delay_ms,
            differences: (0..targets.len())
                .map(|t| {
                    difference(
                        index.milestone(method_a, delay_ms, t),
                        index.milestone(method_b, delay_ms, t),
                    )
                })
                .collect(),
        })
        .collect();

    DifferenceTable {
        targets: targets.to_vec(),
        rows,
    }
}

/// `milestone(delay) - milestone(0)` for every non-zero delay of `method`.
pub fn zero_delay_differences(
    index: &MilestoneIndex,
    method: &str,
    targets: &[f64],
) -> DifferenceTable {
    let rows = index
        .delays(method)
        .into_iter()
        .filter(|d| *d != 0)
        .map(|delay_ms| DifferenceRow {
            delay_ms,
            differences: (0..targets.len())
                .map(|t| {
                    difference(
                        index.milestone(method, delay_ms, t),
                        index.milestone(method, 0, t),
                    )
                })
                .collect(),
        })
        .collect();

    DifferenceTable {
        targets: targets.to_vec(),
        rows,
    }
}
