//! Report writer: text report, raw CSV export and JSON summary.
//!
//! Every report gets a fresh timestamped file name under the results
//! directory; an existing file is never overwritten.

use crate::aggregate::{self, GroupSummary};
use crate::record::TestCaseRecord;
use crate::stats::StatSummary;
use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

const RULE_WIDTH: usize = 80;
const GROUP_RULE_WIDTH: usize = 40;
const UNDEFINED: &str = "n/a";

/// Fixed leading CSV columns; metric columns follow.
pub const RAW_COLUMNS: [&str; 5] = [
    "iteration",
    "test_name",
    "operation",
    "data_size",
    "duration_us",
];

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("cannot write report {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot write raw results {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("cannot write summary {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One failed iteration, as listed in reports.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureLine {
    pub iteration: u32,
    pub reason: String,
}

/// How the iterations of a session went.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunAccounting {
    pub planned: u32,
    /// Iterations that were attempted, whatever their outcome.
    pub completed: u32,
    /// Iterations whose process failed.
    pub failed: u32,
    /// Iterations whose process succeeded but yielded no records.
    pub without_records: u32,
    pub interrupted: bool,
    pub failures: Vec<FailureLine>,
}

/// Files produced by one report.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportPaths {
    pub text: PathBuf,
    /// `None` for a "no valid results" report.
    pub raw_csv: Option<PathBuf>,
    pub summary_json: Option<PathBuf>,
}

impl ReportPaths {
    pub fn has_results(&self) -> bool {
        self.raw_csv.is_some()
    }
}

#[derive(Serialize)]
struct SummaryDocument<'a> {
    generated_at: String,
    label: u32,
    accounting: &'a RunAccounting,
    groups: &'a [GroupSummary],
}

/// Writes reports into one results directory.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    results_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Write the report for `records`, labelled with the completed iteration count.
    ///
    /// With no records, a "no valid results" report is written instead and no
    /// CSV or JSON is produced.
    pub fn write(
        &self,
        records: &[TestCaseRecord],
        accounting: &RunAccounting,
    ) -> Result<ReportPaths, ReportError> {
        let generated = Local::now();
        let stamp = generated.format("%Y%m%d_%H%M%S").to_string();
        let label = accounting.completed;

        std::fs::create_dir_all(&self.results_dir).map_err(|source| ReportError::Io {
            path: self.results_dir.clone(),
            source,
        })?;

        let text_path = fresh_path(
            &self.results_dir,
            &format!("performance_analysis_{label}_{stamp}"),
            "txt",
        );

        if records.is_empty() {
            let text = render_no_results(accounting, &generated);
            write_text(&text_path, &text)?;
            info!(path = %text_path.display(), "Wrote no-results report");
            return Ok(ReportPaths {
                text: text_path,
                raw_csv: None,
                summary_json: None,
            });
        }

        let summaries = aggregate::summarize(records);

        let csv_path = fresh_path(
            &self.results_dir,
            &format!("raw_results_{label}_{stamp}"),
            "csv",
        );
        write_raw_csv(&csv_path, records)?;

        let json_path = fresh_path(&self.results_dir, &format!("summary_{label}_{stamp}"), "json");
        let document = SummaryDocument {
            generated_at: generated.to_rfc3339_opts(SecondsFormat::Secs, false),
            label,
            accounting,
            groups: &summaries,
        };
        let json = serde_json::to_string_pretty(&document).map_err(|source| ReportError::Json {
            path: json_path.clone(),
            source,
        })?;
        write_text(&json_path, &json)?;

        let text = render_text(
            &summaries,
            records.len(),
            accounting,
            &generated,
            &csv_path,
            &json_path,
        );
        write_text(&text_path, &text)?;

        info!(
            path = %text_path.display(),
            raw = %csv_path.display(),
            groups = summaries.len(),
            records = records.len(),
            "Wrote performance report"
        );

        Ok(ReportPaths {
            text: text_path,
            raw_csv: Some(csv_path),
            summary_json: Some(json_path),
        })
    }
}

/// First of `stem.ext`, `stem_1.ext`, `stem_2.ext`, ... that does not exist yet.
fn fresh_path(dir: &Path, stem: &str, ext: &str) -> PathBuf {
    let mut candidate = dir.join(format!("{stem}.{ext}"));
    let mut n = 1u32;
    while candidate.exists() {
        candidate = dir.join(format!("{stem}_{n}.{ext}"));
        n += 1;
    }
    candidate
}

fn write_text(path: &Path, text: &str) -> Result<(), ReportError> {
    std::fs::write(path, text).map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Write one CSV row per record. Metric columns are the union of keys in
/// first-seen order; a record without a metric leaves its cell empty.
pub fn write_raw_csv(path: &Path, records: &[TestCaseRecord]) -> Result<(), ReportError> {
    let csv_err = |source| ReportError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut metric_keys: Vec<&str> = Vec::new();
    for record in records {
        for (key, _) in &record.metrics {
            if !metric_keys.contains(&key.as_str()) {
                metric_keys.push(key.as_str());
            }
        }
    }

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;

    let header = RAW_COLUMNS.iter().copied().chain(metric_keys.iter().copied());
    writer.write_record(header).map_err(csv_err)?;

    for record in records {
        let mut row = vec![
            record.iteration.to_string(),
            record.test_name.clone(),
            record.operation.clone(),
            record.data_size.to_string(),
            record.duration_us.to_string(),
        ];
        row.extend(
            metric_keys
                .iter()
                .map(|key| record.metric(key).map(|v| v.to_string()).unwrap_or_default()),
        );
        writer.write_record(&row).map_err(csv_err)?;
    }

    writer.flush().map_err(|source| ReportError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn fmt_value(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => UNDEFINED.to_string(),
    }
}

fn header(out: &mut String, accounting: &RunAccounting, generated: &DateTime<Local>) {
    out.push_str(&format!(
        "Performance Analysis - Iteration {}\n",
        accounting.completed
    ));
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push('\n');
    out.push_str(&format!(
        "Generated: {}\n",
        generated.to_rfc3339_opts(SecondsFormat::Secs, false)
    ));
    out.push_str(&format!(
        "Iterations: {} completed, {} failed, {} without records (of {} planned)\n",
        accounting.completed, accounting.failed, accounting.without_records, accounting.planned
    ));
    if accounting.interrupted {
        out.push_str("Interrupted: session stopped before all iterations ran\n");
    }
}

fn failures(out: &mut String, accounting: &RunAccounting) {
    if accounting.failures.is_empty() {
        return;
    }
    out.push_str("Iteration failures:\n");
    for failure in &accounting.failures {
        out.push_str(&format!(
            "  iteration {}: {}\n",
            failure.iteration, failure.reason
        ));
    }
}

/// Render the text report for aggregated groups.
pub fn render_text(
    groups: &[GroupSummary],
    record_count: usize,
    accounting: &RunAccounting,
    generated: &DateTime<Local>,
    raw_path: &Path,
    summary_path: &Path,
) -> String {
    let mut out = String::new();
    header(&mut out, accounting, generated);
    out.push_str(&format!(
        "Records: {} in {} groups\n",
        record_count,
        groups.len()
    ));
    out.push_str(&format!("Raw data: {}\n", raw_path.display()));
    out.push_str(&format!("Summary: {}\n\n", summary_path.display()));

    for group in groups {
        render_group(&mut out, group);
    }

    failures(&mut out, accounting);
    out
}

fn render_group(out: &mut String, group: &GroupSummary) {
    out.push_str(&format!("Test: {}\n", group.key.test_name));
    out.push_str(&format!("Operation: {}\n", group.key.operation));
    out.push_str(&"-".repeat(GROUP_RULE_WIDTH));
    out.push('\n');
    out.push_str(&format!("Samples: {}\n", group.samples));

    let d = group.duration_us.as_ref();
    out.push_str("\nTiming Statistics (microseconds):\n");
    out.push_str(&format!("Mean duration: {}\n", fmt_value(d.map(|s| s.mean), 2)));
    out.push_str(&format!("Std deviation: {}\n", fmt_value(d.map(|s| s.std_dev), 2)));
    out.push_str(&format!("Min duration: {}\n", fmt_value(d.map(|s| s.min), 2)));
    out.push_str(&format!("Max duration: {}\n", fmt_value(d.map(|s| s.max), 2)));
    out.push_str(&format!("P95 duration: {}\n", fmt_value(d.map(|s| s.p95), 2)));

    let size = group.data_size.as_ref();
    out.push_str("\nData Size (points):\n");
    out.push_str(&format!(
        "Mean: {}  Min: {}  Max: {}\n",
        fmt_value(size.map(|s| s.mean), 2),
        fmt_value(size.map(|s| s.min), 0),
        fmt_value(size.map(|s| s.max), 0)
    ));

    if !group.metrics.is_empty() {
        out.push_str("\nPerformance Metrics Statistics:\n");
        for metric in &group.metrics {
            let s: Option<&StatSummary> = metric.stats.as_ref();
            out.push_str(&format!("\n{}:\n", metric.name));
            out.push_str(&format!(
                "  Count: {} (missing in {})\n",
                s.map_or(0, |s| s.count),
                metric.missing
            ));
            out.push_str(&format!("  Mean: {}\n", fmt_value(s.map(|s| s.mean), 6)));
            out.push_str(&format!("  Std:  {}\n", fmt_value(s.map(|s| s.std_dev), 6)));
            out.push_str(&format!("  Min:  {}\n", fmt_value(s.map(|s| s.min), 6)));
            out.push_str(&format!("  Max:  {}\n", fmt_value(s.map(|s| s.max), 6)));
            out.push_str(&format!("  P95:  {}\n", fmt_value(s.map(|s| s.p95), 6)));
        }
    }

    out.push('\n');
    out.push_str(&"=".repeat(RULE_WIDTH));
    out.push_str("\n\n");
}

/// Render the report for a session where no iteration produced a record.
pub fn render_no_results(accounting: &RunAccounting, generated: &DateTime<Local>) -> String {
    let mut out = String::new();
    header(&mut out, accounting, generated);
    out.push('\n');
    out.push_str("No valid results: no iteration produced a parseable test case.\n\n");
    failures(&mut out, accounting);
    out
}
