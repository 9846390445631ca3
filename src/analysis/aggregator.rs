//! Step-aligned aggregation across sources.
//!
//! Observations from every worker are bucketed by (step, tag). At finalize
//! time each configured metric ranks its bucket, keeps the first `k` values,
//! and reduces them, producing one row per step.

use crate::analysis::reduction::compare_values;
use crate::error::StatError;
use crate::models::{MetricSpec, Observation, ResultRow, SortOrder, Step, StepTable};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

/// All values recorded at one step, partitioned by tag.
#[derive(Debug, Clone, Default)]
pub struct StepGroup {
    values: HashMap<String, Vec<f64>>,
}

impl StepGroup {
    /// Values recorded for `tag`, in arrival order.
    pub fn values(&self, tag: &str) -> &[f64] {
        self.values.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    fn has(&self, tag: &str) -> bool {
        !self.values(tag).is_empty()
    }
}

/// Accumulates observations for one run and emits aggregated rows.
#[derive(Debug, Clone, Default)]
pub struct StepAggregator {
    step_divisor: Option<u64>,
    groups: BTreeMap<Step, StepGroup>,
    sources: BTreeSet<String>,
    observations: usize,
}

impl StepAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collapse raw steps with integer division before grouping.
    /// A divisor of 0 or 1 leaves steps unchanged.
    pub fn with_step_divisor(mut self, divisor: Option<u64>) -> Self {
        self.step_divisor = divisor.filter(|d| *d > 1);
        self
    }

    /// Map a raw step onto its grouping key.
    pub fn group_step(&self, raw: Step) -> Step {
        match self.step_divisor {
            Some(d) => raw / d,
            None => raw,
        }
    }

    /// Record one observation. Duplicates are kept.
    pub fn ingest(&mut self, observation: Observation) {
        let step = self.group_step(observation.step);
        self.groups
            .entry(step)
            .or_default()
            .values
            .entry(observation.tag)
            .or_default()
            .push(observation.value);
        self.sources.insert(observation.source_id);
        self.observations += 1;
    }

    /// Record a whole `(step, value)` series read from one source.
    ///
    /// Negative steps cannot be aligned and are skipped.
    pub fn ingest_series(&mut self, source_id: &str, tag: &str, points: &[(i64, f64)]) {
        for &(step, value) in points {
            match Step::try_from(step) {
                Ok(step) => self.ingest(Observation::new(source_id, tag, step, value)),
                Err(_) => debug!("Skipping negative step {} for '{}' in {}", step, tag, source_id),
            }
        }
    }

    /// Number of values recorded for a (tag, grouped step) pair.
    #[cfg(test)]
    pub fn observation_count(&self, tag: &str, step: Step) -> usize {
        self.groups.get(&step).map_or(0, |g| g.values(tag).len())
    }

    /// Grouped steps at which `tag` has at least one value.
    pub fn steps_for(&self, tag: &str) -> BTreeSet<Step> {
        self.groups
            .iter()
            .filter(|(_, group)| group.has(tag))
            .map(|(step, _)| *step)
            .collect()
    }

    /// Every tag seen so far.
    pub fn tags(&self) -> BTreeSet<&str> {
        self.groups
            .values()
            .flat_map(|g| g.values.keys().map(String::as_str))
            .collect()
    }

    /// Distinct source identifiers seen so far.
    pub fn sources(&self) -> &BTreeSet<String> {
        &self.sources
    }

    /// Total number of ingested observations.
    pub fn len(&self) -> usize {
        self.observations
    }

    pub fn is_empty(&self) -> bool {
        self.observations == 0
    }

    /// Produce one row per step, ascending.
    ///
    /// With `require_all_tags` a step is emitted only when every configured
    /// tag has data there; otherwise any configured tag suffices and missing
    /// cells are `None`. Rows are computed lazily as the iterator advances.
    pub fn finalize<'a>(&'a self, specs: &'a [MetricSpec], require_all_tags: bool) -> Rows<'a> {
        for spec in specs {
            if !spec.agg_func.is_supported() {
                let diag = StatError::UnsupportedAggregation {
                    column: spec.column_name.clone(),
                    func: spec.agg_func.to_string(),
                };
                warn!("{}", diag);
            }
        }

        let tags: BTreeSet<&str> = specs.iter().map(|s| s.tag.as_str()).collect();
        let steps: Vec<Step> = if tags.is_empty() {
            Vec::new()
        } else {
            self.groups
                .iter()
                .filter(|(_, group)| {
                    if require_all_tags {
                        tags.iter().all(|t| group.has(t))
                    } else {
                        tags.iter().any(|t| group.has(t))
                    }
                })
                .map(|(step, _)| *step)
                .collect()
        };

        debug!(
            "Finalizing {} steps across {} metrics (require_all_tags={})",
            steps.len(),
            specs.len(),
            require_all_tags
        );

        Rows {
            aggregator: self,
            specs,
            steps: steps.into_iter(),
        }
    }

    /// Finalize and collect into a table.
    pub fn finalize_table(&self, specs: &[MetricSpec], require_all_tags: bool) -> StepTable {
        let columns = specs.iter().map(|s| s.column_name.clone()).collect();
        let rows = self.finalize(specs, require_all_tags).collect();
        StepTable::new(columns, rows)
    }

    fn aggregate_cell(&self, group: &StepGroup, spec: &MetricSpec) -> Option<f64> {
        let values = group.values(&spec.tag);
        if values.is_empty() {
            return None;
        }

        let mut ranked = values.to_vec();
        match spec.sort_order {
            SortOrder::Asc => ranked.sort_by(compare_values),
            SortOrder::Desc => ranked.sort_by(|a, b| compare_values(b, a)),
        }

        if let Some(k) = spec.k {
            ranked.truncate(k);
        }

        spec.agg_func.apply(&ranked)
    }
}

/// Lazy iterator over finalized rows. Single pass; call `finalize` again for
/// a fresh sequence.
pub struct Rows<'a> {
    aggregator: &'a StepAggregator,
    specs: &'a [MetricSpec],
    steps: std::vec::IntoIter<Step>,
}

impl Iterator for Rows<'_> {
    type Item = ResultRow;

    fn next(&mut self) -> Option<Self::Item> {
        let step = self.steps.next()?;
        let group = self.aggregator.groups.get(&step)?;
        let values = self
            .specs
            .iter()
            .map(|spec| self.aggregator.aggregate_cell(group, spec))
            .collect();
        Some(ResultRow { step, values })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.steps.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Reduction;

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map_or(false, |a| (a - b).abs() < 1e-9)
    }

    fn feed(agg: &mut StepAggregator, tag: &str, step: Step, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            agg.ingest(Observation::new(format!("rank_{}", i), tag, step, *v));
        }
    }

    #[test]
    fn test_group_size_matches_ingest_count_in_any_order() {
        let observations = vec![
            Observation::new("a", "acc", 1, 0.5),
            Observation::new("b", "acc", 1, 0.6),
            Observation::new("a", "acc", 1, 0.5),
            Observation::new("c", "acc", 2, 0.7),
            Observation::new("a", "time", 1, 3.0),
        ];

        let mut forward = StepAggregator::new();
        for o in observations.iter().cloned() {
            forward.ingest(o);
        }
        let mut backward = StepAggregator::new();
        for o in observations.iter().rev().cloned() {
            backward.ingest(o);
        }

        for agg in [&forward, &backward] {
            assert_eq!(agg.observation_count("acc", 1), 3);
            assert_eq!(agg.observation_count("acc", 2), 1);
            assert_eq!(agg.observation_count("time", 1), 1);
            assert_eq!(agg.observation_count("time", 2), 0);
            assert_eq!(agg.len(), 5);
        }

        let specs = vec![MetricSpec::new("acc", "acc").with_agg(Reduction::Named("sum".into()))];
        assert_eq!(
            forward.finalize_table(&specs, false),
            backward.finalize_table(&specs, false)
        );
    }

    #[test]
    fn test_finalize_is_idempotent() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "acc", 10, &[0.1, 0.4, 0.3]);
        feed(&mut agg, "acc", 20, &[0.5]);
        let specs = vec![MetricSpec::new("acc", "acc").with_k(2)];

        let first: Vec<_> = agg.finalize(&specs, false).collect();
        let second: Vec<_> = agg.finalize(&specs, false).collect();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_top_k_desc_mean() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "acc", 1, &[0.6, 0.9, 0.7, 0.8]);
        let specs = vec![MetricSpec::new("acc", "acc").with_k(3)];

        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert!(close(rows[0].value(0), 0.8));
    }

    #[test]
    fn test_median_of_selection_regardless_of_order() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "acc", 1, &[0.9, 0.8, 0.7]);
        feed(&mut agg, "acc", 2, &[0.9, 0.8, 0.7, 0.6]);

        for order in [SortOrder::Asc, SortOrder::Desc] {
            let specs = vec![MetricSpec::new("acc", "acc")
                .with_sort_order(order)
                .with_agg(Reduction::Median)];
            let rows: Vec<_> = agg.finalize(&specs, false).collect();
            assert!(close(rows[0].value(0), 0.8));
            assert!(close(rows[1].value(0), 0.75));
        }
    }

    #[test]
    fn test_median_of_top_k_subset() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "acc", 1, &[0.1, 0.9, 0.5, 0.8, 0.7]);
        let specs = vec![MetricSpec::new("acc", "acc")
            .with_k(3)
            .with_agg(Reduction::Median)];

        // Best three are [0.9, 0.8, 0.7]; median of those, not of all five.
        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert!(close(rows[0].value(0), 0.8));
    }

    #[test]
    fn test_k_larger_than_group_is_clamped() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "acc", 1, &[0.2, 0.4]);
        let specs = vec![MetricSpec::new("acc", "acc").with_k(10)];

        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert!(close(rows[0].value(0), 0.3));
    }

    #[test]
    fn test_ascending_selects_smallest() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "time", 1, &[5.0, 1.0, 3.0, 2.0]);
        let specs = vec![MetricSpec::new("time", "time")
            .with_k(2)
            .with_sort_order(SortOrder::Asc)];

        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert!(close(rows[0].value(0), 1.5));
    }

    #[test]
    fn test_require_all_tags_excludes_partial_steps() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "a", 1, &[1.0]);
        feed(&mut agg, "b", 1, &[2.0]);
        feed(&mut agg, "a", 2, &[3.0]);
        let specs = vec![MetricSpec::new("a", "a"), MetricSpec::new("b", "b")];

        let strict: Vec<_> = agg.finalize(&specs, true).collect();
        assert_eq!(strict.len(), 1);
        assert_eq!(strict[0].step, 1);

        let union: Vec<_> = agg.finalize(&specs, false).collect();
        assert_eq!(union.len(), 2);
        assert_eq!(union[1].step, 2);
        assert!(close(union[1].value(0), 3.0));
        assert_eq!(union[1].values[1], None);
    }

    #[test]
    fn test_unconfigured_tags_do_not_create_rows() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "a", 1, &[1.0]);
        feed(&mut agg, "other", 2, &[2.0]);
        let specs = vec![MetricSpec::new("a", "a")];

        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert_eq!(rows.len(), 1);
        assert!(agg.finalize(&[], false).next().is_none());
    }

    #[test]
    fn test_unsupported_aggregation_yields_null_not_zero() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "a", 1, &[1.0, 2.0]);
        let specs = vec![
            MetricSpec::new("a", "bogus").with_agg(Reduction::Named("nonsense".into())),
            MetricSpec::new("a", "mean"),
        ];

        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert_eq!(rows[0].values[0], None);
        assert!(close(rows[0].value(1), 1.5));
    }

    #[test]
    fn test_step_divisor_merges_groups() {
        let mut agg = StepAggregator::new().with_step_divisor(Some(100));
        agg.ingest(Observation::new("r0", "acc", 1049, 0.4));
        agg.ingest(Observation::new("r1", "acc", 1000, 0.6));
        agg.ingest(Observation::new("r1", "acc", 1100, 0.9));

        assert_eq!(agg.observation_count("acc", 10), 2);
        assert_eq!(agg.steps_for("acc"), BTreeSet::from([10, 11]));

        let specs = vec![MetricSpec::new("acc", "acc")];
        let rows: Vec<_> = agg.finalize(&specs, false).collect();
        assert_eq!(rows.len(), 2);
        assert!(close(rows[0].value(0), 0.5));
    }

    #[test]
    fn test_ingest_series_skips_negative_steps() {
        let mut agg = StepAggregator::new();
        agg.ingest_series("r0", "acc", &[(-1, 0.1), (0, 0.2), (5, 0.3)]);
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.sources().len(), 1);
        assert_eq!(agg.tags(), BTreeSet::from(["acc"]));
    }

    #[test]
    fn test_end_to_end_accuracy_and_time() {
        let mut agg = StepAggregator::new();
        feed(&mut agg, "Accuracy/test", 100, &[0.81, 0.79, 0.83, 0.80, 0.75]);
        let times: Vec<f64> = (0..8).map(|i| 1.0 + i as f64 * 0.1).collect();
        feed(&mut agg, "Time/train", 100, &times);

        let specs = vec![
            MetricSpec::new("Accuracy/test", "accuracy").with_k(4),
            MetricSpec::new("Time/train", "time")
                .with_k(8)
                .with_sort_order(SortOrder::Asc),
        ];

        let table = agg.finalize_table(&specs, true);
        assert_eq!(table.columns, vec!["accuracy", "time"]);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].step, 100);
        assert!(close(table.rows[0].value(0), 0.8075));
        assert!(close(table.rows[0].value(1), 1.35));
    }
}
