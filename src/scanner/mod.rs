//! File scanner for discovering run directories and event files.
//!
//! A run directory holds one folder per worker rank, each containing one or
//! more `events.out.tfevents.*` files. Results are sorted by path so that
//! repeated runs ingest sources in the same order.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

/// Configuration for event file discovery.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// File name prefix of event files.
    pub prefix: String,
    /// Directory or file names to skip.
    pub excludes: Vec<String>,
    /// Maximum depth below the run directory (1 = files at the run root).
    pub max_depth: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            prefix: "events.out.tfevents.".to_string(),
            excludes: Vec::new(),
            max_depth: 2,
        }
    }
}

impl From<&crate::config::ScannerConfig> for ScanConfig {
    fn from(config: &crate::config::ScannerConfig) -> Self {
        Self {
            prefix: config.event_prefix.clone(),
            excludes: config.excludes.clone(),
            max_depth: config.max_depth,
        }
    }
}

/// A discovered event file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedFile {
    /// Full path to the file.
    pub path: PathBuf,
    /// Path relative to the run directory; used as the source id.
    pub source_id: String,
    /// File size in bytes.
    pub size: u64,
}

/// Event file scanner for one run directory.
pub struct FileScanner {
    config: ScanConfig,
    run_root: PathBuf,
}

impl FileScanner {
    /// Create a new file scanner.
    pub fn new(run_root: PathBuf, config: ScanConfig) -> Self {
        Self { config, run_root }
    }

    /// Find every event file under the run directory.
    pub fn scan(&self) -> Result<Vec<ScannedFile>> {
        if !self.run_root.is_dir() {
            anyhow::bail!("Not a directory: {}", self.run_root.display());
        }

        let mut files = Vec::new();

        let walker = WalkDir::new(&self.run_root)
            .min_depth(1)
            .max_depth(self.config.max_depth.max(1))
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_excluded(e));

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("Skipping unreadable entry under {}: {}", self.run_root.display(), e);
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches(&entry) {
                continue;
            }

            let size = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", entry.path().display()))?
                .len();
            let rel_path = entry
                .path()
                .strip_prefix(&self.run_root)
                .unwrap_or(entry.path());

            files.push(ScannedFile {
                path: entry.path().to_path_buf(),
                source_id: rel_path.to_string_lossy().to_string(),
                size,
            });
        }

        Ok(files)
    }

    /// Check if a file name looks like an event file.
    fn matches(&self, entry: &DirEntry) -> bool {
        entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(&self.config.prefix))
    }

    /// Check if an entry matches exclusion patterns.
    fn is_excluded(&self, entry: &DirEntry) -> bool {
        let Some(name) = entry.file_name().to_str() else {
            return true;
        };

        // Hidden files
        if name.starts_with('.') && entry.depth() > 0 {
            return true;
        }

        // Explicit excludes
        self.config.excludes.iter().any(|pattern| name == pattern)
    }
}

/// Immediate subdirectories of `root`, sorted, hidden ones skipped.
pub fn discover_runs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        anyhow::bail!("Not a directory: {}", root.display());
    }

    let mut runs = Vec::new();
    for entry in WalkDir::new(root).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", root.display()))?;
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if entry.file_type().is_dir() && !hidden {
            runs.push(entry.into_path());
        }
    }
    Ok(runs)
}

/// Files directly inside `dir` whose name ends with `suffix`, sorted.
pub fn files_with_suffix(dir: &Path, suffix: &str) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to list {}", dir.display()))?;
        let matches = entry.file_name().to_string_lossy().ends_with(suffix);
        if entry.file_type().is_file() && matches {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}
