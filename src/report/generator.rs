//! Table output.
//!
//! Aggregated tables are written as CSV (one row per step, empty cells for
//! missing values) or as JSON with run metadata.

use crate::analysis::milestones::DifferenceTable;
use crate::cli::OutputFormat;
use crate::models::{ReportMetadata, Step, StatsReport, StepTable};
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;

/// Cell value as written by every writer; NaN and infinities count as missing.
fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

/// Render one cell. `None` becomes an empty field, never `0`.
pub fn format_value(value: Option<f64>, precision: Option<usize>) -> String {
    match (finite(value), precision) {
        (None, _) => String::new(),
        (Some(v), Some(p)) => format!("{:.*}", p, v),
        (Some(v), None) => format!("{:?}", v),
    }
}

fn table_to_csv<W: Write>(table: &StepTable, precision: Option<usize>, out: W) -> Result<()> {
    let mut writer = csv::Writer::from_writer(out);

    let header = std::iter::once("step").chain(table.columns.iter().map(String::as_str));
    writer.write_record(header)?;

    for row in &table.rows {
        let mut record = Vec::with_capacity(row.values.len() + 1);
        record.push(row.step.to_string());
        record.extend(row.values.iter().map(|v| format_value(*v, precision)));
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Generate a CSV table.
pub fn generate_csv(table: &StepTable, precision: Option<usize>) -> Result<String> {
    let mut buf = Vec::new();
    table_to_csv(table, precision, &mut buf)?;
    String::from_utf8(buf).context("CSV output is not valid UTF-8")
}

#[derive(Serialize)]
struct JsonReport<'a> {
    metadata: &'a ReportMetadata,
    columns: &'a [String],
    rows: Vec<Value>,
}

/// Generate a JSON report.
pub fn generate_json_report(report: &StatsReport) -> Result<String> {
    let rows = report
        .table
        .rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            object.insert("step".to_string(), Value::from(row.step));
            for (column, value) in report.table.columns.iter().zip(&row.values) {
                let value = finite(*value).map_or(Value::Null, Value::from);
                object.insert(column.clone(), value);
            }
            Value::Object(object)
        })
        .collect();

    let json = JsonReport {
        metadata: &report.metadata,
        columns: &report.table.columns,
        rows,
    };
    serde_json::to_string_pretty(&json).map_err(Into::into)
}

/// Write a report in the requested format.
pub fn write_report(
    report: &StatsReport,
    path: &Path,
    format: OutputFormat,
    precision: Option<usize>,
) -> Result<()> {
    let content = match format {
        OutputFormat::Csv => generate_csv(&report.table, precision)?,
        OutputFormat::Json => generate_json_report(report)?,
    };

    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Write a delay comparison table.
pub fn write_differences_csv(table: &DifferenceTable, path: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(table.headers())?;
    for row in &table.rows {
        let mut record = vec![row.delay_ms.to_string()];
        record.extend(
            row.differences
                .iter()
                .map(|d| d.map(|d| d.to_string()).unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Write a smoothed series next to its raw values.
pub fn write_smoothed_csv(
    path: &Path,
    column: &str,
    steps: &[Step],
    raw: &[Option<f64>],
    smoothed: &[Option<f64>],
    precision: Option<usize>,
) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;

    writer.write_record(["step", column, "smoothed_value"])?;
    for ((step, raw), smoothed) in steps.iter().zip(raw).zip(smoothed) {
        writer.write_record([
            step.to_string(),
            format_value(*raw, precision),
            format_value(*smoothed, precision),
        ])?;
    }

    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::milestones::DifferenceRow;
    use crate::models::{MetricSpec, ResultRow};
    use chrono::Utc;
    use tempfile::TempDir;

    fn create_test_report() -> StatsReport {
        let table = StepTable::new(
            vec!["accuracy".to_string(), "time".to_string()],
            vec![
                ResultRow {
                    step: 100,
                    values: vec![Some(0.8075), Some(1.35)],
                },
                ResultRow {
                    step: 200,
                    values: vec![Some(0.9), None],
                },
            ],
        );

        StatsReport {
            metadata: ReportMetadata {
                run: "async_delay_0000".to_string(),
                generated_at: Utc::now(),
                sources: 4,
                observations: 13,
                require_all_tags: false,
                step_divisor: None,
                metrics: vec![
                    MetricSpec::new("Accuracy/test", "accuracy").with_k(4),
                    MetricSpec::new("Time/train", "time"),
                ],
            },
            table,
        }
    }

    #[test]
    fn test_generate_csv_uses_empty_cells_for_missing_values() {
        let report = create_test_report();
        let csv = generate_csv(&report.table, None).unwrap();

        assert_eq!(csv, "step,accuracy,time\n100,0.8075,1.35\n200,0.9,\n");
    }

    #[test]
    fn test_generate_csv_with_precision() {
        let report = create_test_report();
        let csv = generate_csv(&report.table, Some(2)).unwrap();

        assert!(csv.contains("100,0.81,1.35\n"));
        assert!(csv.contains("200,0.90,\n"));
    }

    #[test]
    fn test_non_finite_cells_are_missing_in_csv_and_json() {
        let mut report = create_test_report();
        report.table.rows[0].values = vec![Some(f64::NAN), Some(f64::INFINITY)];

        let csv = generate_csv(&report.table, None).unwrap();
        assert!(csv.contains("100,,\n"));

        let json: Value = serde_json::from_str(&generate_json_report(&report).unwrap()).unwrap();
        assert_eq!(json["rows"][0]["accuracy"], Value::Null);
        assert_eq!(json["rows"][0]["time"], Value::Null);
    }

    #[test]
    fn test_format_value_whole_numbers_keep_decimal_point() {
        assert_eq!(format_value(Some(1.0), None), "1.0");
        assert_eq!(format_value(None, Some(3)), "");
    }

    #[test]
    fn test_generate_json_report() {
        let report = create_test_report();
        let json = generate_json_report(&report).unwrap();
        let parsed: Value = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed["metadata"]["run"], "async_delay_0000");
        assert_eq!(parsed["metadata"]["metrics"][0]["k"], 4);
        assert_eq!(parsed["columns"][1], "time");
        assert_eq!(parsed["rows"][0]["step"], 100);
        assert_eq!(parsed["rows"][1]["time"], Value::Null);
        assert!(parsed["metadata"].get("step_divisor").is_none());
    }

    #[test]
    fn test_write_differences_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("time_differences.csv");
        let table = DifferenceTable {
            targets: vec![0.885, 0.89],
            rows: vec![
                DifferenceRow {
                    delay_ms: 0,
                    differences: vec![Some(-20), None],
                },
                DifferenceRow {
                    delay_ms: 40,
                    differences: vec![Some(60), Some(50)],
                },
            ],
        };

        write_differences_csv(&table, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();

        assert_eq!(
            lines[0],
            "Delay (ms),Time Difference for Target Accuracy 0.885,Time Difference for Target Accuracy 0.89"
        );
        assert_eq!(lines[1], "0,-20,");
        assert_eq!(lines[2], "40,60,50");
    }

    #[test]
    fn test_write_report_json_to_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run_stats.json");
        write_report(&create_test_report(), &path, OutputFormat::Json, None).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("\"rows\""));
    }
}
