use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::provenance::ProvenanceResolver;
use crate::store::{LicenseDetection, ResultStore};

pub const NO_LICENSE_KEY: &str = "none";
pub const NO_LICENSE_NAME: &str = "No license detected";
const UNKNOWN: &str = "unknown";

/// A license reported for one file, score normalized into `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLicense {
    pub key: String,
    pub name: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScannedFile {
    pub path: String,
    pub licenses: Vec<DetectedLicense>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub reports: usize,
    pub files: usize,
    pub detections: usize,
    pub failed_reports: Vec<PathBuf>,
}

#[derive(Deserialize)]
struct RawReport {
    #[serde(default)]
    files: Vec<RawFile>,
}

#[derive(Deserialize)]
struct RawFile {
    #[serde(default)]
    path: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    licenses: Vec<RawLicense>,
    #[serde(default)]
    license_detections: Vec<RawDetection>,
}

#[derive(Deserialize)]
struct RawLicense {
    #[serde(default)]
    spdx_license_key: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    short_name: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

#[derive(Deserialize)]
struct RawDetection {
    #[serde(default)]
    license_expression: Option<String>,
    #[serde(default)]
    license_expression_spdx: Option<String>,
    #[serde(default)]
    matches: Vec<RawMatch>,
}

#[derive(Deserialize)]
struct RawMatch {
    #[serde(default)]
    score: Option<f64>,
}

/// Scores reported as percentages are scaled into `[0, 1]`.
pub fn normalize_score(raw: f64) -> f64 {
    let score = if raw > 1.0 { raw / 100.0 } else { raw };
    score.clamp(0.0, 1.0)
}

/// Parse one ScanCode JSON document, skipping directory entries.
pub fn parse_scan_report(json: &str) -> Result<Vec<ScannedFile>> {
    let report: RawReport = serde_json::from_str(json).context("malformed scan report")?;
    let files = report
        .files
        .into_iter()
        .filter(|file| file.kind.as_deref() != Some("directory"))
        .map(|file| {
            let mut licenses: Vec<DetectedLicense> = file
                .licenses
                .into_iter()
                .map(|lic| DetectedLicense {
                    key: lic
                        .spdx_license_key
                        .or(lic.key)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                    name: lic
                        .name
                        .or(lic.short_name)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                    score: normalize_score(lic.score.unwrap_or(0.0)),
                })
                .collect();
            licenses.extend(file.license_detections.into_iter().map(|det| {
                let score = det
                    .matches
                    .iter()
                    .filter_map(|m| m.score)
                    .fold(0.0_f64, f64::max);
                let name = det
                    .license_expression
                    .clone()
                    .unwrap_or_else(|| UNKNOWN.to_string());
                DetectedLicense {
                    key: det
                        .license_expression_spdx
                        .or(det.license_expression)
                        .unwrap_or_else(|| UNKNOWN.to_string()),
                    name,
                    score: normalize_score(score),
                }
            }));
            ScannedFile {
                path: file.path,
                licenses,
            }
        })
        .collect();
    Ok(files)
}

/// Expand one scanned file into detection rows; no licenses yields the `none` sentinel.
pub fn detections_for_file(
    file_path: &str,
    lang: &str,
    model: &str,
    licenses: &[DetectedLicense],
) -> Vec<LicenseDetection> {
    let row = |key: &str, name: &str, score: f64| LicenseDetection {
        file_path: file_path.to_string(),
        license_key: key.to_string(),
        license_name: name.to_string(),
        lang: lang.to_string(),
        model: model.to_string(),
        score,
    };
    if licenses.is_empty() {
        return vec![row(NO_LICENSE_KEY, NO_LICENSE_NAME, 0.0)];
    }
    licenses
        .iter()
        .map(|lic| row(&lic.key, &lic.name, lic.score))
        .collect()
}

/// Import every `<lang>.json` report under `scans_dir` into the store.
///
/// Both the legacy `licenses` array and the newer `license_detections`
/// layout are understood.
#[instrument(name = "import_scans", skip_all, fields(scans_dir = %scans_dir.display()))]
pub fn import_scan_reports(
    scans_dir: &Path,
    resolver: &ProvenanceResolver<'_>,
    store: &ResultStore,
) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();
    let mut reports: Vec<PathBuf> = match fs::read_dir(scans_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect(),
        Err(err) => {
            warn!(error = %err, "no scan results found; run the external scanner first");
            return Ok(summary);
        }
    };
    reports.sort();
    if reports.is_empty() {
        warn!("no scan results found; run the external scanner first");
    }

    for report in reports {
        let Some(lang) = report.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        let files = match fs::read_to_string(&report)
            .with_context(|| format!("failed to read {}", report.display()))
            .and_then(|raw| parse_scan_report(&raw))
        {
            Ok(files) => files,
            Err(err) => {
                warn!(report = %report.display(), error = %format!("{err:#}"), "skipping scan report");
                summary.failed_reports.push(report);
                continue;
            }
        };
        info!(lang = %lang, files = files.len(), "processing scan results");
        summary.reports += 1;

        for file in files {
            let file_name = Path::new(&file.path)
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let attribution = resolver.resolve(&lang, &file_name);
            let stored_path = match resolver.ordinal(&lang, &file_name) {
                Some(_) => resolver
                    .generated_root()
                    .join(&lang)
                    .join(&file_name)
                    .to_string_lossy()
                    .into_owned(),
                None => file.path.clone(),
            };
            let rows = detections_for_file(&stored_path, &lang, &attribution.backend, &file.licenses);
            if let Err(err) = store.replace_license_detections(&stored_path, &rows) {
                warn!(file = %stored_path, error = %format!("{err:#}"), "failed to store detections");
                continue;
            }
            summary.files += 1;
            summary.detections += rows.len();
        }
    }

    info!(
        reports = summary.reports,
        files = summary.files,
        detections = summary.detections,
        "scan import complete"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY: &str = r#"{
        "files": [
            {"path": "python", "type": "directory", "licenses": []},
            {"path": "python/a.py", "type": "file", "licenses": []},
            {"path": "python/b.py", "type": "file", "licenses": [
                {"key": "mit", "spdx_license_key": "MIT", "name": "MIT License", "score": 95.0},
                {"key": "apache-2.0", "short_name": "Apache 2.0", "score": 0.4}
            ]}
        ]
    }"#;

    #[test]
    fn parses_legacy_layout_and_skips_directories() {
        let files = parse_scan_report(LEGACY).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].licenses.is_empty());
        assert_eq!(files[1].licenses[0].key, "MIT");
        assert!((files[1].licenses[0].score - 0.95).abs() < 1e-9);
        assert_eq!(files[1].licenses[1].key, "apache-2.0");
        assert_eq!(files[1].licenses[1].name, "Apache 2.0");
    }

    #[test]
    fn parses_license_detections_layout() {
        let json = r#"{"files": [{"path": "go/x.go", "license_detections": [
            {"license_expression": "gpl-3.0", "license_expression_spdx": "GPL-3.0-only",
             "matches": [{"score": 88.5}, {"score": 99.0}]}
        ]}]}"#;
        let files = parse_scan_report(json).unwrap();
        let lic = &files[0].licenses[0];
        assert_eq!(lic.key, "GPL-3.0-only");
        assert_eq!(lic.name, "gpl-3.0");
        assert!((lic.score - 0.99).abs() < 1e-9);
    }

    #[test]
    fn zero_licenses_yield_single_sentinel() {
        let rows = detections_for_file("generated/python/a.py", "python", "openai", &[]);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].license_key, "none");
        assert_eq!(rows[0].score, 0.0);
    }

    #[test]
    fn two_licenses_share_the_backend() {
        let licenses = vec![
            DetectedLicense {
                key: "MIT".into(),
                name: "MIT License".into(),
                score: 0.9,
            },
            DetectedLicense {
                key: "BSD-3-Clause".into(),
                name: "BSD".into(),
                score: 0.3,
            },
        ];
        let rows = detections_for_file("f.py", "python", "claude", &licenses);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.model == "claude"));
    }

    #[test]
    fn rejects_malformed_json() {
        assert!(parse_scan_report("{not json").is_err());
    }

    #[test]
    fn normalizes_scores() {
        assert_eq!(normalize_score(100.0), 1.0);
        assert_eq!(normalize_score(0.85), 0.85);
        assert_eq!(normalize_score(-3.0), 0.0);
    }

    #[test]
    fn imports_reports_with_provenance_and_unknown_fallback() {
        let temp = tempfile::tempdir().unwrap();
        let generated = temp.path().join("generated");
        let scans = temp.path().join("scans");
        fs::create_dir_all(generated.join("python")).unwrap();
        fs::create_dir_all(&scans).unwrap();
        fs::write(generated.join("python/a.py"), "print(1)").unwrap();
        fs::write(generated.join("python/b.py"), "print(2)").unwrap();
        fs::write(scans.join("python.json"), LEGACY).unwrap();
        fs::write(scans.join("go.json"), "{broken").unwrap();
        fs::write(
            scans.join("typescript.json"),
            r#"{"files": [{"path": "typescript/missing.ts", "licenses": []}]}"#,
        )
        .unwrap();

        let store = ResultStore::open_in_memory().unwrap();
        let resolver =
            ProvenanceResolver::positional(&generated, vec!["openai".into(), "claude".into()]);
        let summary = import_scan_reports(&scans, &resolver, &store).unwrap();
        assert_eq!(summary.reports, 2);
        assert_eq!(summary.failed_reports.len(), 1);

        let rows = store.license_detections().unwrap();
        let b_path = generated.join("python/b.py").to_string_lossy().into_owned();
        let b_rows: Vec<_> = rows.iter().filter(|r| r.file_path == b_path).collect();
        assert_eq!(b_rows.len(), 2);
        assert!(b_rows.iter().all(|r| r.model == "claude"));
        let missing = rows
            .iter()
            .find(|r| r.file_path == "typescript/missing.ts")
            .unwrap();
        assert_eq!(missing.model, "unknown");
        assert_eq!(missing.license_key, "none");

        import_scan_reports(&scans, &resolver, &store).unwrap();
        assert_eq!(store.license_detections().unwrap().len(), rows.len());
    }

    #[test]
    fn missing_scans_dir_is_not_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let store = ResultStore::open_in_memory().unwrap();
        let resolver = ProvenanceResolver::positional(temp.path(), vec![]);
        let summary = import_scan_reports(&temp.path().join("nope"), &resolver, &store).unwrap();
        assert_eq!(summary.reports, 0);
    }
}
