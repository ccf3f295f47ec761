use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, instrument};

use crate::report::ReportWriter;
use crate::store::{LicenseDetection, SimilarityRecord};

/// Scores strictly above this count as high-confidence detections.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 0.8;

pub fn is_high_confidence(score: f64) -> bool {
    score > HIGH_CONFIDENCE_THRESHOLD
}

/// Percentage of files with a high-confidence detection, one decimal.
///
/// `None` when the group is empty.
pub fn detection_rate(total_files: usize, high_confidence_files: usize) -> Option<f64> {
    if total_files == 0 {
        return None;
    }
    Some(round_to(
        high_confidence_files as f64 / total_files as f64 * 100.0,
        1,
    ))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(round_to(values.iter().sum::<f64>() / values.len() as f64, 3))
}

fn max(values: &[f64]) -> Option<f64> {
    values.iter().copied().reduce(f64::max).map(|v| round_to(v, 3))
}

type GroupKey = (String, String);

/// Per (language, backend) statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub lang: String,
    pub model: String,
    pub total_files: usize,
    pub files_with_licenses: usize,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
    pub avg_similarity: Option<f64>,
    pub max_similarity: Option<f64>,
    pub license_detection_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LicenseSummaryRow {
    pub lang: String,
    pub model: String,
    pub license_key: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PivotRow {
    pub lang: String,
    pub license_key: String,
    pub counts: Vec<usize>,
}

/// High-confidence license counts, one column per backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LicensePivot {
    pub models: Vec<String>,
    pub rows: Vec<PivotRow>,
}

impl LicensePivot {
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["lang".to_string(), "license_key".to_string()];
        header.extend(self.models.iter().cloned());
        header
    }

    pub fn records(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = vec![row.lang.clone(), row.license_key.clone()];
                record.extend(row.counts.iter().map(usize::to_string));
                record
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileSummaryRow {
    pub lang: String,
    pub model: String,
    pub file_count: usize,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilaritySummaryRow {
    pub lang: String,
    pub model: String,
    pub avg_score: Option<f64>,
    pub max_score: Option<f64>,
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Overview {
    pub total_files: usize,
    pub high_confidence_files: usize,
    pub detection_rate: Option<f64>,
}

/// Everything derived from one read of the store.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub overview: Overview,
    pub groups: Vec<GroupStats>,
    pub license_summary: Vec<LicenseSummaryRow>,
    pub license_pivot: LicensePivot,
    pub file_summary: Vec<FileSummaryRow>,
    pub similarity_summary: Vec<SimilaritySummaryRow>,
}

#[derive(Default)]
struct GroupAccumulator {
    files: BTreeSet<String>,
    high_files: BTreeSet<String>,
    license_files: BTreeSet<String>,
    license_scores: Vec<f64>,
    similarity_files: BTreeSet<String>,
    similarity_scores: Vec<f64>,
}

pub fn aggregate(similarity: &[SimilarityRecord], licenses: &[LicenseDetection]) -> AggregateReport {
    let mut groups: BTreeMap<GroupKey, GroupAccumulator> = BTreeMap::new();
    let mut all_files = BTreeSet::new();
    let mut all_high = BTreeSet::new();

    for row in licenses {
        let acc = groups
            .entry((row.lang.clone(), row.model.clone()))
            .or_default();
        acc.files.insert(row.file_path.clone());
        acc.license_files.insert(row.file_path.clone());
        acc.license_scores.push(row.score);
        all_files.insert(row.file_path.as_str());
        if is_high_confidence(row.score) {
            acc.high_files.insert(row.file_path.clone());
            all_high.insert(row.file_path.as_str());
        }
    }
    for row in similarity {
        let acc = groups
            .entry((row.lang.clone(), row.model.clone()))
            .or_default();
        acc.files.insert(row.file.clone());
        acc.similarity_files.insert(row.file.clone());
        acc.similarity_scores.push(row.score);
        all_files.insert(row.file.as_str());
    }

    let group_stats = groups
        .iter()
        .map(|((lang, model), acc)| GroupStats {
            lang: lang.clone(),
            model: model.clone(),
            total_files: acc.files.len(),
            files_with_licenses: acc.high_files.len(),
            avg_score: mean(&acc.license_scores),
            max_score: max(&acc.license_scores),
            avg_similarity: mean(&acc.similarity_scores),
            max_similarity: max(&acc.similarity_scores),
            license_detection_rate: detection_rate(acc.files.len(), acc.high_files.len()),
        })
        .collect();

    let file_summary = groups
        .iter()
        .filter(|(_, acc)| !acc.license_scores.is_empty())
        .map(|((lang, model), acc)| FileSummaryRow {
            lang: lang.clone(),
            model: model.clone(),
            file_count: acc.license_files.len(),
            avg_score: mean(&acc.license_scores),
            max_score: max(&acc.license_scores),
        })
        .collect();

    let similarity_summary = groups
        .iter()
        .filter(|(_, acc)| !acc.similarity_scores.is_empty())
        .map(|((lang, model), acc)| SimilaritySummaryRow {
            lang: lang.clone(),
            model: model.clone(),
            avg_score: mean(&acc.similarity_scores),
            max_score: max(&acc.similarity_scores),
            file_count: acc.similarity_scores.len(),
        })
        .collect();

    let license_summary = license_summary(licenses);
    let license_pivot = license_pivot(&license_summary);

    AggregateReport {
        overview: Overview {
            total_files: all_files.len(),
            high_confidence_files: all_high.len(),
            detection_rate: detection_rate(all_files.len(), all_high.len()),
        },
        groups: group_stats,
        license_summary,
        license_pivot,
        file_summary,
        similarity_summary,
    }
}

/// High-confidence detections counted per (language, backend, license).
pub fn license_summary(licenses: &[LicenseDetection]) -> Vec<LicenseSummaryRow> {
    let mut counts: BTreeMap<(String, String, String), usize> = BTreeMap::new();
    for row in licenses.iter().filter(|row| is_high_confidence(row.score)) {
        *counts
            .entry((row.lang.clone(), row.model.clone(), row.license_key.clone()))
            .or_default() += 1;
    }
    counts
        .into_iter()
        .map(|((lang, model, license_key), count)| LicenseSummaryRow {
            lang,
            model,
            license_key,
            count,
        })
        .collect()
}

pub fn license_pivot(summary: &[LicenseSummaryRow]) -> LicensePivot {
    let models: Vec<String> = summary
        .iter()
        .map(|row| row.model.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut cells: BTreeMap<(String, String), Vec<usize>> = BTreeMap::new();
    for row in summary {
        let counts = cells
            .entry((row.lang.clone(), row.license_key.clone()))
            .or_insert_with(|| vec![0; models.len()]);
        if let Some(col) = models.iter().position(|m| m == &row.model) {
            counts[col] += row.count;
        }
    }
    LicensePivot {
        models,
        rows: cells
            .into_iter()
            .map(|((lang, license_key), counts)| PivotRow {
                lang,
                license_key,
                counts,
            })
            .collect(),
    }
}

/// Write every non-empty aggregate table as a timestamped CSV artifact.
#[instrument(name = "aggregate_artifacts", skip_all)]
pub fn write_artifacts(
    report: &AggregateReport,
    similarity: &[SimilarityRecord],
    licenses: &[LicenseDetection],
    writer: &ReportWriter,
) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if licenses.is_empty() {
        info!("no license detections stored; skipping license artifacts");
    } else {
        written.push(writer.write_rows("all_results", licenses)?);
        if report.license_summary.is_empty() {
            info!("no high-confidence license matches found (score > 0.8)");
        } else {
            written.push(writer.write_rows("license_summary", &report.license_summary)?);
            written.push(writer.write_table(
                "license_pivot",
                &report.license_pivot.header(),
                &report.license_pivot.records(),
            )?);
        }
        written.push(writer.write_rows("file_summary", &report.file_summary)?);
    }

    if similarity.is_empty() {
        info!("no similarity data available");
    } else {
        written.push(writer.write_rows("similarity_results", similarity)?);
        written.push(writer.write_rows("similarity_summary", &report.similarity_summary)?);
    }

    if !report.groups.is_empty() {
        written.push(writer.write_rows("overall_stats", &report.groups)?);
    }
    for path in &written {
        info!(path = %path.display(), "report written");
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lic(file: &str, model: &str, key: &str, score: f64) -> LicenseDetection {
        LicenseDetection {
            file_path: file.into(),
            license_key: key.into(),
            license_name: key.into(),
            lang: "python".into(),
            model: model.into(),
            score,
        }
    }

    fn sim(file: &str, model: &str, score: f64) -> SimilarityRecord {
        SimilarityRecord {
            file: file.into(),
            score,
            model: model.into(),
            lang: "python".into(),
            content_hash: None,
        }
    }

    #[test]
    fn empty_group_rate_is_undefined() {
        assert_eq!(detection_rate(0, 0), None);
    }

    #[test]
    fn ten_files_three_high_is_thirty_percent() {
        assert_eq!(detection_rate(10, 3), Some(30.0));
    }

    #[test]
    fn groups_join_similarity_and_licenses() {
        let mut licenses: Vec<_> = (0..10)
            .map(|i| lic(&format!("f{i}.py"), "openai", "none", 0.0))
            .collect();
        for i in 0..3 {
            licenses.push(lic(&format!("f{i}.py"), "openai", "MIT", 0.95));
        }
        let similarity = vec![sim("f0.py", "openai", 0.1), sim("f1.py", "openai", 0.0)];

        let report = aggregate(&similarity, &licenses);
        assert_eq!(report.groups.len(), 1);
        let group = &report.groups[0];
        assert_eq!(group.total_files, 10);
        assert_eq!(group.files_with_licenses, 3);
        assert_eq!(group.license_detection_rate, Some(30.0));
        assert_eq!(group.max_score, Some(0.95));
        assert_eq!(group.avg_similarity, Some(0.05));
        assert_eq!(report.overview.detection_rate, Some(30.0));
    }

    #[test]
    fn similarity_only_group_has_no_license_scores() {
        let report = aggregate(&[sim("a.py", "claude", 0.1)], &[]);
        let group = &report.groups[0];
        assert_eq!(group.total_files, 1);
        assert_eq!(group.avg_score, None);
        assert_eq!(group.license_detection_rate, Some(0.0));
        assert!(report.file_summary.is_empty());
        assert_eq!(report.similarity_summary.len(), 1);
    }

    #[test]
    fn pivot_counts_high_confidence_only() {
        let licenses = vec![
            lic("a.py", "openai", "MIT", 0.9),
            lic("b.py", "claude", "MIT", 0.99),
            lic("c.py", "claude", "MIT", 0.95),
            lic("d.py", "claude", "GPL-3.0", 0.5),
        ];
        let pivot = aggregate(&[], &licenses).license_pivot;
        assert_eq!(pivot.models, vec!["claude", "openai"]);
        assert_eq!(pivot.rows.len(), 1);
        assert_eq!(pivot.rows[0].counts, vec![2, 1]);
        assert_eq!(pivot.header(), vec!["lang", "license_key", "claude", "openai"]);
        assert_eq!(pivot.records()[0], vec!["python", "MIT", "2", "1"]);
    }

    #[test]
    fn empty_store_aggregates_without_error() {
        let report = aggregate(&[], &[]);
        assert_eq!(report.overview.total_files, 0);
        assert_eq!(report.overview.detection_rate, None);
        assert!(report.groups.is_empty());
    }

    #[test]
    fn writes_artifacts_for_available_tables() {
        let temp = tempfile::tempdir().unwrap();
        let writer = ReportWriter::with_timestamp(temp.path(), "20260101_000000").unwrap();
        let licenses = vec![lic("a.py", "openai", "none", 0.0)];
        let report = aggregate(&[], &licenses);
        let written = write_artifacts(&report, &[], &licenses, &writer).unwrap();
        let names: Vec<_> = written
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "all_results_20260101_000000.csv",
                "file_summary_20260101_000000.csv",
                "overall_stats_20260101_000000.csv",
            ]
        );
        let stats = std::fs::read_to_string(&written[2]).unwrap();
        assert!(stats.starts_with("lang,model,total_files,files_with_licenses"));
    }
}
