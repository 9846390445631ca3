//! Reading stats tables back from CSV.

use crate::models::{ResultRow, Step, StepTable};
use anyhow::{bail, Context, Result};
use std::path::Path;

/// Parse a `step` cell; tolerates `100.0` as written by some tools.
fn parse_step(raw: &str) -> Option<Step> {
    let raw = raw.trim();
    raw.parse::<Step>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0)
            .map(|v| v as Step)
    })
}

/// Load a stats CSV with a `step` column. Empty cells become `None`; rows
/// keep file order.
pub fn read_table(path: &Path) -> Result<StepTable> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;

    let headers = reader
        .headers()
        .with_context(|| format!("Failed to read header of {}", path.display()))?
        .clone();

    let Some(step_index) = headers.iter().position(|h| h == "step") else {
        bail!("No 'step' column in {}", path.display());
    };

    let columns: Vec<String> = headers
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != step_index)
        .map(|(_, h)| h.to_string())
        .collect();

    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Bad record in {}", path.display()))?;
        let lineno = line + 2;

        let step_raw = record.get(step_index).unwrap_or_default();
        let Some(step) = parse_step(step_raw) else {
            bail!("Invalid step '{}' at {}:{}", step_raw, path.display(), lineno);
        };

        let mut values = Vec::with_capacity(columns.len());
        for (i, cell) in record.iter().enumerate() {
            if i == step_index {
                continue;
            }
            let cell = cell.trim();
            if cell.is_empty() {
                values.push(None);
                continue;
            }
            let value: f64 = cell.parse().with_context(|| {
                format!("Invalid number '{}' at {}:{}", cell, path.display(), lineno)
            })?;
            values.push(Some(value));
        }

        rows.push(ResultRow { step, values });
    }

    Ok(StepTable::new(columns, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_table_with_nulls() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_stats.csv");
        std::fs::write(&path, "step,top_1_accuracy,top_3_accuracy\n1,0.5,\n2.0,0.6,0.9\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns, vec!["top_1_accuracy", "top_3_accuracy"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].values, vec![Some(0.5), None]);
        assert_eq!(table.rows[1].step, 2);
    }

    #[test]
    fn test_step_column_may_be_anywhere() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("t.csv");
        std::fs::write(&path, "time,step\n1.5,10\n").unwrap();

        let table = read_table(&path).unwrap();
        assert_eq!(table.columns, vec!["time"]);
        assert_eq!(table.rows[0].step, 10);
        assert_eq!(table.rows[0].value(0), Some(1.5));
    }

    #[test]
    fn test_rejects_missing_step_column_and_bad_numbers() {
        let dir = TempDir::new().unwrap();
        let no_step = dir.path().join("a.csv");
        std::fs::write(&no_step, "epoch,acc\n1,0.5\n").unwrap();
        assert!(read_table(&no_step).is_err());

        let bad = dir.path().join("b.csv");
        std::fs::write(&bad, "step,acc\n1,high\n").unwrap();
        assert!(read_table(&bad).is_err());
    }
}
