use std::{collections::BTreeSet, fs, path::Path};

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use regex::Regex;
use tracing::{instrument, trace};

use super::{Issue, IssueRule, RuleKind};

/// Files with more lines than this get a single large-file issue.
pub const LARGE_FILE_LINES: usize = 100;

const LARGE_FILE_ISSUE: &str = "Large file - potential code reuse";
const READ_ERROR_ISSUE: &str = "File read error";

const LICENSE_KEYWORDS: &[(&str, &str)] = &[
    ("copyright", "Copyright notice found"),
    ("license", "License mention found"),
    ("apache", "Apache License reference"),
    ("gpl", "GPL License reference"),
    ("bsd", "BSD License reference"),
    ("@author", "Author attribution"),
    ("@copyright", "Copyright annotation"),
    ("(c)", "Copyright symbol"),
    ("all rights reserved", "Rights reservation clause"),
    ("permission is hereby granted", "Permission statement"),
];

const LLM_ARTIFACTS: &[(&str, &str)] = &[
    ("^```", "Code block marker"),
    ("Here is", "LLM explanation text"),
    ("This code", "LLM description text"),
    ("Note that", "LLM note text"),
];

/// License markers and leftover LLM formatting.
pub fn default_rules() -> Result<Vec<IssueRule>> {
    let mut rules = Vec::new();
    for (pattern, issue_type) in LICENSE_KEYWORDS {
        rules.push(IssueRule::keyword(issue_type, pattern)?);
    }
    rules.push(IssueRule::regex("MIT License reference", r"(?i)mit\s+license")?);
    for (pattern, description) in LLM_ARTIFACTS {
        rules.push(IssueRule::regex(
            &format!("LLM output formatting: {description}"),
            pattern,
        )?);
    }
    Ok(rules)
}

/// Line-oriented matcher combining a keyword automaton with regex rules.
pub struct IssueScanner {
    rules: Vec<IssueRule>,
    keywords: Option<(AhoCorasick, Vec<usize>)>,
    regexes: Vec<(Regex, usize)>,
}

impl IssueScanner {
    pub fn new(rules: Vec<IssueRule>) -> Result<Self> {
        let keyword_ids: Vec<usize> = rules
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.kind == RuleKind::Keyword)
            .map(|(idx, _)| idx)
            .collect();
        let keywords = if keyword_ids.is_empty() {
            None
        } else {
            let automaton = AhoCorasick::builder()
                .ascii_case_insensitive(true)
                .build(keyword_ids.iter().map(|&idx| rules[idx].pattern.as_str()))
                .context("failed to build keyword automaton from rules")?;
            Some((automaton, keyword_ids))
        };

        let mut regexes = Vec::new();
        for (idx, rule) in rules.iter().enumerate() {
            if rule.kind == RuleKind::Regex {
                let regex = Regex::new(&rule.pattern)
                    .with_context(|| format!("invalid regex pattern for rule {}", rule.issue_type))?;
                regexes.push((regex, idx));
            }
        }

        Ok(Self {
            rules,
            keywords,
            regexes,
        })
    }

    pub fn with_default_rules() -> Result<Self> {
        Self::new(default_rules()?)
    }

    pub fn rules(&self) -> &[IssueRule] {
        &self.rules
    }

    /// One issue per matched (line, rule) pair, ordered by line then rule,
    /// followed by the large-file issue if it applies.
    pub fn scan(&self, content: &str) -> Vec<Issue> {
        let mut issues = Vec::new();
        let mut line_count = 0;
        for (idx, line) in content.lines().enumerate() {
            line_count += 1;
            for rule_idx in self.matching_rules(line) {
                let rule = &self.rules[rule_idx];
                issues.push(Issue {
                    line_number: Some(idx + 1),
                    line_content: line.trim().to_string(),
                    issue_type: rule.issue_type.clone(),
                    pattern_matched: rule.pattern.clone(),
                });
            }
        }
        if line_count > LARGE_FILE_LINES {
            issues.push(Issue {
                line_number: None,
                line_content: format!("File has {line_count} lines"),
                issue_type: LARGE_FILE_ISSUE.to_string(),
                pattern_matched: "file_size".to_string(),
            });
        }
        issues
    }

    /// Scan a file from disk; an unreadable file yields a single read-error issue.
    #[instrument(name = "inspect_file", skip(self), fields(path = %path.display()))]
    pub fn scan_file(&self, path: &Path) -> Vec<Issue> {
        match fs::read(path) {
            Ok(bytes) => {
                let issues = self.scan(&String::from_utf8_lossy(&bytes));
                trace!(issues = issues.len(), "file inspected");
                issues
            }
            Err(err) => vec![Issue {
                line_number: None,
                line_content: format!("Error reading file: {err}"),
                issue_type: READ_ERROR_ISSUE.to_string(),
                pattern_matched: "error".to_string(),
            }],
        }
    }

    fn matching_rules(&self, line: &str) -> BTreeSet<usize> {
        let mut matched = BTreeSet::new();
        if let Some((automaton, ids)) = &self.keywords {
            for mat in automaton.find_overlapping_iter(line) {
                matched.insert(ids[mat.pattern().as_usize()]);
            }
        }
        for (regex, idx) in &self.regexes {
            if regex.is_match(line) {
                matched.insert(*idx);
            }
        }
        matched
    }
}
