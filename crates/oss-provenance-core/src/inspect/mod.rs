use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::aggregate::is_high_confidence;

pub mod reporter;
pub mod scanner;

pub use reporter::{analyze_generated_tree, write_artifacts, DetailedReport, IssueRow, IssueSummaryRow};
pub use scanner::{default_rules, IssueScanner, LARGE_FILE_LINES};

/// Files with more issues than this are high risk.
pub const MAX_ISSUES_BEFORE_HIGH_RISK: usize = 5;

/// Distinguishes between literal keyword and regular-expression rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// ASCII case-insensitive literal.
    Keyword,
    /// Regex source; case sensitivity is controlled by inline flags.
    Regex,
}

/// A single per-line inspection rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueRule {
    /// Label written to the `issue_type` column.
    pub issue_type: String,
    pub kind: RuleKind,
    /// Literal or regex source, also written to `pattern_matched`.
    pub pattern: String,
}

impl IssueRule {
    pub fn new(
        issue_type: impl Into<String>,
        kind: RuleKind,
        pattern: impl Into<String>,
    ) -> Result<Self, IssueRuleError> {
        let rule = Self {
            issue_type: issue_type.into(),
            kind,
            pattern: pattern.into(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn keyword(issue_type: &str, pattern: &str) -> Result<Self, IssueRuleError> {
        Self::new(issue_type, RuleKind::Keyword, pattern)
    }

    pub fn regex(issue_type: &str, pattern: &str) -> Result<Self, IssueRuleError> {
        Self::new(issue_type, RuleKind::Regex, pattern)
    }

    pub fn validate(&self) -> Result<(), IssueRuleError> {
        if self.issue_type.trim().is_empty() {
            return Err(IssueRuleError::EmptyIssueType);
        }
        if self.pattern.is_empty() {
            return Err(IssueRuleError::EmptyPattern {
                issue_type: self.issue_type.clone(),
            });
        }
        if self.kind == RuleKind::Regex {
            regex::Regex::new(&self.pattern).map_err(|err| IssueRuleError::InvalidRegex {
                issue_type: self.issue_type.clone(),
                reason: err.to_string(),
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IssueRuleError {
    #[error("rule issue type must not be blank")]
    EmptyIssueType,
    #[error("rule `{issue_type}` pattern must not be empty")]
    EmptyPattern { issue_type: String },
    #[error("rule `{issue_type}` has an invalid regex: {reason}")]
    InvalidRegex { issue_type: String, reason: String },
}

/// One matched (line, rule) pair, or a file-level finding without a line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Issue {
    pub line_number: Option<usize>,
    pub line_content: String,
    pub issue_type: String,
    pub pattern_matched: String,
}

/// Per-file view joining inspection results with stored scores.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileRisk {
    pub file: String,
    pub language: String,
    pub model: String,
    pub file_size_bytes: u64,
    pub total_issues: usize,
    pub similarity_score: f64,
    pub max_license_score: f64,
    pub high_confidence_licenses: String,
    pub high_risk: bool,
}

pub fn is_high_risk(total_issues: usize, max_license_score: f64, similarity_score: f64) -> bool {
    total_issues > MAX_ISSUES_BEFORE_HIGH_RISK
        || is_high_confidence(max_license_score)
        || is_high_confidence(similarity_score)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn many_issues_alone_make_a_file_high_risk() {
        assert!(is_high_risk(6, 0.1, 0.2));
        assert!(!is_high_risk(5, 0.1, 0.2));
    }

    #[test]
    fn high_scores_make_a_file_high_risk() {
        assert!(is_high_risk(0, 0.81, 0.0));
        assert!(is_high_risk(0, 0.0, 0.9));
        assert!(!is_high_risk(0, 0.8, 0.8));
    }

    #[test]
    fn invalid_rules_are_rejected() {
        assert_eq!(
            IssueRule::keyword(" ", "gpl").unwrap_err(),
            IssueRuleError::EmptyIssueType
        );
        assert!(matches!(
            IssueRule::keyword("GPL", ""),
            Err(IssueRuleError::EmptyPattern { .. })
        ));
        assert!(matches!(
            IssueRule::regex("Broken", "(unclosed"),
            Err(IssueRuleError::InvalidRegex { .. })
        ));
    }
}
