//! Loading one run directory into a step aggregator.

use crate::analysis::StepAggregator;
use crate::events::extract_scalars;
use crate::models::MetricSpec;
use crate::scanner::{FileScanner, ScanConfig};
use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Options controlling how a run is loaded.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub scan: ScanConfig,
    pub step_divisor: Option<u64>,
    pub show_progress: bool,
}

/// Read every event file under `run_dir` and ingest the configured tags.
pub fn load_run(
    run_dir: &Path,
    metrics: &[MetricSpec],
    options: &LoadOptions,
) -> Result<StepAggregator> {
    let scanner = FileScanner::new(run_dir.to_path_buf(), options.scan.clone());
    let files = scanner
        .scan()
        .with_context(|| format!("Failed to scan {}", run_dir.display()))?;

    if files.is_empty() {
        warn!("No event files found under {}", run_dir.display());
    } else {
        info!("Found {} event files under {}", files.len(), run_dir.display());
    }

    let tags: Vec<&str> = metrics
        .iter()
        .map(|m| m.tag.as_str())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let progress_bar = options.show_progress.then(|| {
        let pb = ProgressBar::new(files.len() as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    });

    let mut aggregator = StepAggregator::new().with_step_divisor(options.step_divisor);

    for file in &files {
        if let Some(ref pb) = progress_bar {
            pb.set_message(file.source_id.clone());
        }

        let series = extract_scalars(&file.path, &tags)?;
        for (tag, points) in &series {
            aggregator.ingest_series(&file.source_id, tag, points);
        }
        debug!("Ingested {} ({} bytes)", file.source_id, file.size);

        if let Some(ref pb) = progress_bar {
            pb.inc(1);
        }
    }

    if let Some(pb) = progress_bar {
        pb.finish_and_clear();
    }

    Ok(aggregator)
}
