use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{self, Write as _},
    fs::File,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

pub mod imports;
pub mod table;

pub use imports::{extract_imports, Family};
pub use table::{LicenseTable, TableValidationError};

pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    "node_modules",
    "__pycache__",
    ".pytest_cache",
    "dist",
    "build",
    ".venv",
    "venv",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyFinding {
    pub package: String,
    pub license: String,
    pub severity: Severity,
}

/// Findings per file, each file's findings ordered by severity then package.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub files: BTreeMap<PathBuf, Vec<DependencyFinding>>,
}

impl AuditReport {
    pub fn total_findings(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.files
            .values()
            .flatten()
            .filter(|f| f.severity == severity)
            .count()
    }

    /// 2 if anything is critical, 1 if anything is high, else 0.
    pub fn exit_code(&self) -> u8 {
        if self.count(Severity::Critical) > 0 {
            2
        } else if self.count(Severity::High) > 0 {
            1
        } else {
            0
        }
    }

    /// Write `File,Severity,Package,License,Description` rows to `path`.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        writer.write_record(["File", "Severity", "Package", "License", "Description"])?;
        for (file, findings) in &self.files {
            for finding in findings {
                writer.write_record([
                    &*file.to_string_lossy(),
                    finding.severity.as_str(),
                    finding.package.as_str(),
                    finding.license.as_str(),
                    format!("Potentially problematic license: {}", finding.license).as_str(),
                ])?;
            }
        }
        writer
            .flush()
            .with_context(|| format!("failed to flush {}", path.display()))?;
        Ok(())
    }

    /// Colored terminal report; per-file detail is omitted when `summary_only`.
    pub fn render(&self, summary_only: bool) -> Result<String> {
        let mut out = String::new();
        let total = self.total_findings();
        if total == 0 {
            writeln!(
                out,
                "{}",
                "✓ No problematic licenses detected in dependencies".green()
            )?;
            return Ok(out);
        }

        writeln!(
            out,
            "{}",
            format!(
                "\n⚠ Found {total} potential license issues in {} files",
                self.files.len()
            )
            .yellow()
        )?;
        writeln!(out, "{}", "=".repeat(60))?;

        if !summary_only {
            for (file, findings) in &self.files {
                writeln!(out, "\n{} {}", "FILE:".bold(), file.display())?;
                for severity in [Severity::Critical, Severity::High] {
                    let matching: Vec<_> =
                        findings.iter().filter(|f| f.severity == severity).collect();
                    if matching.is_empty() {
                        continue;
                    }
                    writeln!(out, "  {}", colorize(severity, &format!("{severity}:")))?;
                    for finding in matching {
                        writeln!(out, "    • {} ({})", finding.package, finding.license)?;
                    }
                }
            }
        }

        writeln!(out, "\n{}", "=".repeat(60))?;
        writeln!(out, "{}", "SUMMARY:".bold())?;
        for severity in [Severity::Critical, Severity::High] {
            let count = self.count(severity);
            if count > 0 {
                writeln!(
                    out,
                    "  {} {count} issues",
                    colorize(severity, &format!("{severity}:"))
                )?;
            }
        }
        Ok(out)
    }
}

fn colorize(severity: Severity, text: &str) -> colored::ColoredString {
    match severity {
        Severity::Critical => text.red(),
        Severity::High => text.yellow(),
    }
}

pub struct DependencyAuditor {
    table: LicenseTable,
    excludes: BTreeSet<String>,
}

impl DependencyAuditor {
    /// Auditor using the default exclusions plus `extra_excludes`.
    pub fn new(table: LicenseTable, extra_excludes: impl IntoIterator<Item = String>) -> Self {
        let mut excludes: BTreeSet<String> =
            DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
        excludes.extend(
            extra_excludes
                .into_iter()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
        );
        Self { table, excludes }
    }

    pub fn excludes(&self) -> &BTreeSet<String> {
        &self.excludes
    }

    /// Classify one file's content; empty when the extension is not audited.
    pub fn audit_source(&self, path: &Path, content: &str) -> Vec<DependencyFinding> {
        let Some(family) = Family::from_path(path) else {
            return Vec::new();
        };
        let mut seen = BTreeSet::new();
        let mut findings: Vec<_> = extract_imports(family, content)
            .into_iter()
            .filter(|package| seen.insert(package.to_lowercase()))
            .filter_map(|package| {
                let license = self.table.license_for(family, &package)?.to_string();
                let severity = match self.table.license_family(&license) {
                    Some(_) => Severity::Critical,
                    None => Severity::High,
                };
                Some(DependencyFinding {
                    package,
                    license,
                    severity,
                })
            })
            .collect();
        findings.sort_by(|a, b| a.severity.cmp(&b.severity).then_with(|| a.package.cmp(&b.package)));
        findings
    }

    /// Walk `root` and audit every recognised source file.
    ///
    /// A missing root is an error; unreadable files are logged and skipped.
    #[instrument(name = "audit_deps", skip(self), fields(root = %root.display()))]
    pub fn audit(&self, root: &Path) -> Result<AuditReport> {
        if !root.is_dir() {
            bail!("directory {} does not exist", root.display());
        }
        let mut report = AuditReport::default();
        let mut scanned = 0usize;

        let walker = WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                entry.depth() == 0
                    || !(entry.file_type().is_dir()
                        && self
                            .excludes
                            .contains(entry.file_name().to_string_lossy().as_ref()))
            });
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() || Family::from_path(entry.path()).is_none() {
                continue;
            }
            let content = match std::fs::read_to_string(entry.path()) {
                Ok(content) => content,
                Err(err) => {
                    warn!(file = %entry.path().display(), error = %err, "error analyzing file");
                    continue;
                }
            };
            scanned += 1;
            let findings = self.audit_source(entry.path(), &content);
            if !findings.is_empty() {
                debug!(file = %entry.path().display(), findings = findings.len(), "problematic imports");
                report.files.insert(entry.path().to_path_buf(), findings);
            }
        }

        info!(
            files_scanned = scanned,
            findings = report.total_findings(),
            "dependency audit complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn auditor() -> DependencyAuditor {
        DependencyAuditor::new(LicenseTable::builtin().unwrap(), Vec::new())
    }

    fn tree(files: &[(&str, &str)]) -> tempfile::TempDir {
        let temp = tempfile::tempdir().unwrap();
        for (path, content) in files {
            let full = temp.path().join(path);
            fs::create_dir_all(full.parent().unwrap()).unwrap();
            fs::write(full, content).unwrap();
        }
        temp
    }

    #[test]
    fn pyqt5_is_critical() {
        let findings = auditor().audit_source(Path::new("gui.py"), "import pyqt5\n");
        assert_eq!(
            findings,
            vec![DependencyFinding {
                package: "pyqt5".into(),
                license: "GPL-3.0".into(),
                severity: Severity::Critical,
            }]
        );
    }

    #[test]
    fn mixed_case_imports_report_once() {
        let findings = auditor().audit_source(
            Path::new("x.py"),
            "import PyQt5\nfrom pyqt5 import QtCore\n",
        );
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].package.to_lowercase(), "pyqt5");
    }

    #[test]
    fn stdlib_imports_are_clean() {
        assert!(auditor()
            .audit_source(Path::new("main.py"), "import os\nimport sys\n")
            .is_empty());
    }

    #[test]
    fn unlisted_family_license_is_high() {
        let findings = auditor().audit_source(Path::new("ui.py"), "import wxPython\n");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].license, "wxWindows");
    }

    #[test]
    fn exit_codes_follow_worst_severity() {
        let critical = tree(&[("a.py", "import pyqt5\n"), ("b.py", "import wxpython\n")]);
        assert_eq!(auditor().audit(critical.path()).unwrap().exit_code(), 2);

        let high = tree(&[("b.py", "import wxpython\n")]);
        assert_eq!(auditor().audit(high.path()).unwrap().exit_code(), 1);

        let clean = tree(&[("c.py", "import os\n"), ("notes.txt", "import pyqt5\n")]);
        let report = auditor().audit(clean.path()).unwrap();
        assert_eq!(report.exit_code(), 0);
        assert!(report.render(false).unwrap().contains("No problematic licenses"));
    }

    #[test]
    fn excluded_directories_are_skipped() {
        let temp = tree(&[
            ("node_modules/gpl/index.js", "const g = require('gpl');\n"),
            ("vendor/x.go", "import \"mysql\"\n"),
            ("src/app.js", "import 'jquery-ui';\n"),
        ]);
        let report = DependencyAuditor::new(LicenseTable::builtin().unwrap(), vec!["vendor".into()])
            .audit(temp.path())
            .unwrap();
        assert_eq!(report.files.len(), 1);
        let (path, findings) = report.files.iter().next().unwrap();
        assert!(path.ends_with("src/app.js"));
        assert_eq!(findings[0].package, "jquery-ui");
    }

    #[test]
    fn root_inside_excluded_name_is_still_scanned() {
        let temp = tree(&[("build/main.go", "import \"mysql\"\n")]);
        let report = auditor().audit(&temp.path().join("build")).unwrap();
        assert_eq!(report.count(Severity::Critical), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let temp = tempfile::tempdir().unwrap();
        assert!(auditor().audit(&temp.path().join("nope")).is_err());
    }

    #[test]
    fn csv_export_has_expected_columns() {
        let temp = tree(&[("a.py", "import pyqt5\n")]);
        let report = auditor().audit(temp.path()).unwrap();
        let out = temp.path().join("report.csv");
        report.write_csv(&out).unwrap();
        let csv = fs::read_to_string(out).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("File,Severity,Package,License,Description"));
        let row = lines.next().unwrap();
        assert!(row.ends_with(",CRITICAL,pyqt5,GPL-3.0,Potentially problematic license: GPL-3.0"));
    }

    #[test]
    fn summary_only_omits_file_detail() {
        colored::control::set_override(false);
        let temp = tree(&[("a.py", "import pyqt5\n")]);
        let report = auditor().audit(temp.path()).unwrap();
        let summary = report.render(true).unwrap();
        assert!(!summary.contains("FILE:"));
        assert!(summary.contains("CRITICAL: 1 issues"));
        assert!(report.render(false).unwrap().contains("• pyqt5 (GPL-3.0)"));
    }
}
