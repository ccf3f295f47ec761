use std::{
    fmt::Write,
    fs::{self, File, OpenOptions},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::AggregateReport;
use crate::inspect::DetailedReport;

/// Format styles supported by the terminal renderers.
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Writes timestamped CSV artifacts into a results directory.
///
/// Artifacts are write-once: an existing file with the same name is an error,
/// never overwritten.
pub struct ReportWriter {
    dir: PathBuf,
    timestamp: String,
}

impl ReportWriter {
    /// Writer stamped with the current local time (`YYYYmmdd_HHMMSS`).
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        Self::with_timestamp(dir, timestamp)
    }

    pub fn with_timestamp(dir: impl Into<PathBuf>, timestamp: impl Into<String>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create results directory {}", dir.display()))?;
        Ok(Self {
            dir,
            timestamp: timestamp.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}_{}.csv", self.timestamp))
    }

    /// Serialize `rows` with a header derived from the row type's field names.
    pub fn write_rows<T: Serialize>(&self, name: &str, rows: &[T]) -> Result<PathBuf> {
        let (path, mut writer) = self.create(name)?;
        for row in rows {
            writer
                .serialize(row)
                .with_context(|| format!("failed to write row to {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
        Ok(path)
    }

    /// Write a table whose columns are only known at runtime.
    pub fn write_table(
        &self,
        name: &str,
        header: &[String],
        records: &[Vec<String>],
    ) -> Result<PathBuf> {
        let (path, mut writer) = self.create(name)?;
        writer.write_record(header)?;
        for record in records {
            writer
                .write_record(record)
                .with_context(|| format!("failed to write row to {}", path.display()))?;
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
        Ok(path)
    }

    fn create(&self, name: &str) -> Result<(PathBuf, csv::Writer<File>)> {
        let path = self.artifact_path(name);
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("failed to create report {}", path.display()))?;
        Ok((path, csv::Writer::from_writer(file)))
    }
}

/// Render the aggregate statistics for the terminal.
pub fn render_aggregate(report: &AggregateReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Human => render_aggregate_human(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(report)?),
    }
}

fn render_aggregate_human(report: &AggregateReport) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "Summary:")?;
    writeln!(out, "  Total files analyzed: {}", report.overview.total_files)?;
    writeln!(
        out,
        "  Files with high-confidence licenses: {}",
        report.overview.high_confidence_files
    )?;
    writeln!(
        out,
        "  Overall license detection rate: {}",
        percent(report.overview.detection_rate)
    )?;

    if report.groups.is_empty() {
        writeln!(out, "\nNo results stored yet.")?;
        return Ok(out);
    }

    writeln!(out, "\nPer language and model:")?;
    for group in &report.groups {
        writeln!(
            out,
            "  - {lang:<12} {model:<22} files {total:>4}, licensed {high:>4}, rate {rate:>7}, similarity avg {sim}",
            lang = group.lang,
            model = group.model,
            total = group.total_files,
            high = group.files_with_licenses,
            rate = percent(group.license_detection_rate),
            sim = score(group.avg_similarity),
        )?;
    }

    if !report.license_summary.is_empty() {
        writeln!(out, "\nHigh-confidence licenses:")?;
        for row in &report.license_summary {
            writeln!(
                out,
                "  - {} / {}: {} x{}",
                row.lang, row.model, row.license_key, row.count
            )?;
        }
    }
    Ok(out)
}

/// Render the detailed-report terminal summary.
pub fn render_detailed(report: &DetailedReport, format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Human => render_detailed_human(report),
        OutputFormat::Json => Ok(serde_json::to_string_pretty(&report.issue_summary())?),
    }
}

fn render_detailed_human(report: &DetailedReport) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "Files analyzed: {}", report.files.len())?;
    writeln!(out, "Total issues: {}", report.issues.len())?;

    if report.issues.is_empty() {
        writeln!(out, "\nNo issues detected.")?;
    } else {
        writeln!(out, "\nIssue types:")?;
        for (issue_type, count) in report.counts_by_type() {
            writeln!(out, "  - {issue_type}: {count}")?;
        }

        writeln!(out, "\nFiles with most issues:")?;
        for file in report.top_files(5) {
            writeln!(
                out,
                "  - {} ({}): {} issue(s)",
                display_name(&file.file),
                file.model,
                file.total_issues
            )?;
        }

        writeln!(out, "\nIssues by model:")?;
        for (model, count) in report.counts_by_model() {
            writeln!(out, "  - {model}: {count}")?;
        }
    }

    let high_risk: Vec<_> = report.files.iter().filter(|f| f.high_risk).collect();
    writeln!(out, "\nHigh-risk files: {}", high_risk.len())?;
    for file in high_risk {
        writeln!(
            out,
            "  - {} ({}): issues {}, license {:.2}, similarity {:.2}",
            display_name(&file.file),
            file.model,
            file.total_issues,
            file.max_license_score,
            file.similarity_score
        )?;
    }
    Ok(out)
}

fn percent(rate: Option<f64>) -> String {
    rate.map(|r| format!("{r:.1}%"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn score(value: Option<f64>) -> String {
    value
        .map(|v| format!("{v:.3}"))
        .unwrap_or_else(|| "n/a".to_string())
}

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}
