use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use super::{is_high_risk, FileRisk, IssueScanner};
use crate::aggregate::is_high_confidence;
use crate::provenance::ProvenanceResolver;
use crate::report::ReportWriter;
use crate::store::{LicenseDetection, ResultStore};

const NO_HIGH_CONFIDENCE_LICENSES: &str = "none";

/// A row of the `detailed_issues` artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssueRow {
    pub file_path: String,
    pub language: String,
    pub model: String,
    pub file_size_bytes: u64,
    pub similarity_score: f64,
    pub line_number: Option<usize>,
    pub line_content: String,
    pub issue_type: String,
    pub pattern_matched: String,
    pub high_confidence_licenses: String,
    pub max_license_score: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueSummaryRow {
    pub issue_type: String,
    pub language: String,
    pub model: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default)]
pub struct DetailedReport {
    pub issues: Vec<IssueRow>,
    pub files: Vec<FileRisk>,
}

impl DetailedReport {
    pub fn issue_summary(&self) -> Vec<IssueSummaryRow> {
        let mut counts: BTreeMap<(&str, &str, &str), usize> = BTreeMap::new();
        for issue in &self.issues {
            *counts
                .entry((
                    issue.issue_type.as_str(),
                    issue.language.as_str(),
                    issue.model.as_str(),
                ))
                .or_default() += 1;
        }
        counts
            .into_iter()
            .map(|((issue_type, language, model), count)| IssueSummaryRow {
                issue_type: issue_type.to_string(),
                language: language.to_string(),
                model: model.to_string(),
                count,
            })
            .collect()
    }

    /// Issue counts per type, most frequent first.
    pub fn counts_by_type(&self) -> Vec<(String, usize)> {
        ranked(self.issues.iter().map(|i| i.issue_type.as_str()))
    }

    pub fn counts_by_model(&self) -> Vec<(String, usize)> {
        ranked(self.issues.iter().map(|i| i.model.as_str()))
    }

    /// Files with at least one issue, most issues first.
    pub fn top_files(&self, limit: usize) -> Vec<&FileRisk> {
        let mut files: Vec<_> = self.files.iter().filter(|f| f.total_issues > 0).collect();
        files.sort_by(|a, b| b.total_issues.cmp(&a.total_issues).then_with(|| a.file.cmp(&b.file)));
        files.truncate(limit);
        files
    }
}

fn ranked<'a>(keys: impl Iterator<Item = &'a str>) -> Vec<(String, usize)> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for key in keys {
        *counts.entry(key).or_default() += 1;
    }
    let mut ranked: Vec<_> = counts
        .into_iter()
        .map(|(key, count)| (key.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

/// Every regular file under `<root>/<lang>/`, sorted by language then name.
fn generated_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    let mut langs: Vec<_> = fs::read_dir(root)
        .with_context(|| format!("failed to list {}", root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
        .collect();
    langs.sort_by_key(|entry| entry.file_name());

    for lang_dir in langs {
        let lang = lang_dir.file_name().to_string_lossy().into_owned();
        let mut entries: Vec<_> = match fs::read_dir(lang_dir.path()) {
            Ok(read) => read
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
                .map(|entry| entry.path())
                .collect(),
            Err(err) => {
                warn!(dir = %lang_dir.path().display(), error = %err, "skipping unreadable language directory");
                continue;
            }
        };
        entries.sort();
        files.extend(entries.into_iter().map(|path| (lang.clone(), path)));
    }
    Ok(files)
}

/// Inspect every generated file and join the results with stored scores.
#[instrument(name = "detailed_report", skip_all, fields(root = %resolver.generated_root().display()))]
pub fn analyze_generated_tree(
    resolver: &ProvenanceResolver<'_>,
    scanner: &IssueScanner,
    store: &ResultStore,
) -> Result<DetailedReport> {
    let root = resolver.generated_root();
    if !root.is_dir() {
        warn!(root = %root.display(), "generated directory not found; nothing to inspect");
        return Ok(DetailedReport::default());
    }

    let similarity: HashMap<String, f64> = store
        .similarity_records()?
        .into_iter()
        .map(|record| (record.file, record.score))
        .collect();
    let mut licenses: HashMap<String, Vec<LicenseDetection>> = HashMap::new();
    for detection in store.license_detections()? {
        licenses
            .entry(detection.file_path.clone())
            .or_default()
            .push(detection);
    }

    let mut report = DetailedReport::default();
    for (lang, path) in generated_files(root)? {
        let file_path = path.to_string_lossy().into_owned();
        debug!(file = %file_path, "analyzing");
        let model = resolver.resolve_path(&path).backend;
        let file_size_bytes = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let similarity_score = similarity.get(&file_path).copied().unwrap_or(0.0);
        let detections = licenses.get(&file_path).map(Vec::as_slice).unwrap_or(&[]);
        let max_license_score = detections.iter().map(|d| d.score).fold(0.0, f64::max);
        let high_confidence_licenses = high_confidence_keys(detections);

        let issues = scanner.scan_file(&path);
        let total_issues = issues.len();
        report.issues.extend(issues.into_iter().map(|issue| IssueRow {
            file_path: file_path.clone(),
            language: lang.clone(),
            model: model.clone(),
            file_size_bytes,
            similarity_score,
            line_number: issue.line_number,
            line_content: issue.line_content,
            issue_type: issue.issue_type,
            pattern_matched: issue.pattern_matched,
            high_confidence_licenses: high_confidence_licenses.clone(),
            max_license_score,
        }));
        report.files.push(FileRisk {
            file: file_path,
            language: lang,
            model,
            file_size_bytes,
            total_issues,
            similarity_score,
            max_license_score,
            high_confidence_licenses,
            high_risk: is_high_risk(total_issues, max_license_score, similarity_score),
        });
    }

    info!(
        files = report.files.len(),
        issues = report.issues.len(),
        "detailed analysis complete"
    );
    Ok(report)
}

fn high_confidence_keys(detections: &[LicenseDetection]) -> String {
    let mut sorted: Vec<_> = detections
        .iter()
        .filter(|d| is_high_confidence(d.score))
        .collect();
    sorted.sort_by(|a, b| b.score.total_cmp(&a.score));
    if sorted.is_empty() {
        return NO_HIGH_CONFIDENCE_LICENSES.to_string();
    }
    sorted
        .iter()
        .map(|d| d.license_key.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Write `detailed_issues`, `issue_summary` and `file_issues_summary`.
pub fn write_artifacts(report: &DetailedReport, writer: &ReportWriter) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if report.files.is_empty() {
        info!("no files found for analysis");
        return Ok(written);
    }
    if report.issues.is_empty() {
        info!("no issues found in analyzed files");
    } else {
        written.push(writer.write_rows("detailed_issues", &report.issues)?);
        written.push(writer.write_rows("issue_summary", &report.issue_summary())?);
    }
    written.push(writer.write_rows("file_issues_summary", &report.files)?);
    for path in &written {
        info!(path = %path.display(), "report written");
    }
    Ok(written)
}
