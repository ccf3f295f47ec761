use std::{collections::BTreeSet, fmt, path::Path};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Source ecosystems the auditor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    Python,
    Javascript,
    Go,
}

impl Family {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_string_lossy().to_lowercase();
        match ext.as_str() {
            "py" => Some(Self::Python),
            "js" | "ts" | "jsx" | "tsx" => Some(Self::Javascript),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Javascript => "javascript",
            Self::Go => "go",
        }
    }
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const PY_MODULE: &str = r"[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*";

static PY_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+(.+)$").expect("valid python import regex"));
static PY_FROM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"^\s*from\s+({PY_MODULE})\s+import\b")).expect("valid python from regex")
});
static PY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"^({PY_MODULE})")).expect("valid python module regex"));

static JS_IMPORTS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r#"^\s*import\s+.*?from\s+['"]([^'"]+)['"]"#,
        r#"^\s*import\s+['"]([^'"]+)['"]"#,
        r#"^\s*(?:const|let|var)\s+.*?=\s*require\s*\(\s*['"]([^'"]+)['"]"#,
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid javascript import regex"))
    .collect()
});

static GO_SINGLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^import\s+(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?"([^"]+)""#).expect("valid go import regex")
});
static GO_BLOCK_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:[A-Za-z_.][A-Za-z0-9_]*\s+)?"([^"]+)""#).expect("valid go block regex")
});

/// Package names imported by `content`, deduplicated and sorted.
pub fn extract_imports(family: Family, content: &str) -> BTreeSet<String> {
    match family {
        Family::Python => python_imports(content),
        Family::Javascript => javascript_imports(content),
        Family::Go => go_imports(content),
    }
}

fn python_top_level(module: &str) -> String {
    module.split('.').next().unwrap_or(module).to_string()
}

fn python_imports(content: &str) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for line in content.lines() {
        if let Some(caps) = PY_FROM.captures(line) {
            imports.insert(python_top_level(&caps[1]));
        } else if let Some(caps) = PY_IMPORT.captures(line) {
            // `import a.b as c, d`
            for item in caps[1].split(',') {
                if let Some(name) = PY_NAME.captures(item.trim()) {
                    imports.insert(python_top_level(&name[1]));
                }
            }
        }
    }
    imports
}

/// Package key for a JS module specifier; `None` for relative paths.
pub fn javascript_package(specifier: &str) -> Option<String> {
    if specifier.starts_with('.') {
        return None;
    }
    let mut parts = specifier.split('/');
    let first = parts.next()?;
    if first.starts_with('@') {
        if let Some(name) = parts.next() {
            return Some(format!("{first}/{name}"));
        }
    }
    Some(first.to_string())
}

fn javascript_imports(content: &str) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    for line in content.lines() {
        for pattern in JS_IMPORTS.iter() {
            if let Some(caps) = pattern.captures(line) {
                if let Some(package) = javascript_package(&caps[1]) {
                    imports.insert(package);
                }
                break;
            }
        }
    }
    imports
}

fn go_imports(content: &str) -> BTreeSet<String> {
    let mut imports = BTreeSet::new();
    let mut in_block = false;
    for line in content.lines() {
        let line = line.trim();
        if in_block {
            if line.starts_with(')') {
                in_block = false;
            } else if let Some(caps) = GO_BLOCK_ENTRY.captures(line) {
                imports.insert(caps[1].to_string());
            }
            continue;
        }
        if let Some(rest) = line.strip_prefix("import") {
            let rest = rest.trim_start();
            if let Some(inner) = rest.strip_prefix('(') {
                // `import ( "fmt" )` may open and close on one line.
                let inner = inner.trim();
                let (entries, closed) = match inner.split_once(')') {
                    Some((entries, _)) => (entries, true),
                    None => (inner, false),
                };
                if let Some(caps) = GO_BLOCK_ENTRY.captures(entries.trim()) {
                    imports.insert(caps[1].to_string());
                }
                in_block = !closed;
            } else if let Some(caps) = GO_SINGLE.captures(line) {
                imports.insert(caps[1].to_string());
            }
        }
    }
    imports
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn maps_extensions_to_families() {
        assert_eq!(Family::from_path(Path::new("a/b.PY")), Some(Family::Python));
        assert_eq!(Family::from_path(Path::new("x.tsx")), Some(Family::Javascript));
        assert_eq!(Family::from_path(Path::new("main.go")), Some(Family::Go));
        assert_eq!(Family::from_path(Path::new("README.md")), None);
        assert_eq!(Family::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn python_top_level_modules() {
        let content = "import os, sys\nimport PyQt5.QtWidgets as qw\nfrom readline import parse_and_bind\n  from . import sibling\n# import commented\n";
        assert_eq!(
            extract_imports(Family::Python, content),
            set(&["PyQt5", "os", "readline", "sys"])
        );
    }

    #[test]
    fn javascript_specifiers() {
        let content = r#"
import React from 'react';
import { x } from "@angular/core/testing";
import './styles.css';
const ui = require('jquery-ui/widgets/dialog');
let local = require("./local");
var gpl = require ( 'gpl' );
"#;
        assert_eq!(
            extract_imports(Family::Javascript, content),
            set(&["@angular/core", "gpl", "jquery-ui", "react"])
        );
    }

    #[test]
    fn go_single_and_block_imports() {
        let content = r#"package main

import "fmt"
import sql "database/sql"

import (
    "os"
    m "github.com/go-sql-driver/mysql"
    _ "mysql"
)

func main() { fmt.Println("not an import") }
"#;
        assert_eq!(
            extract_imports(Family::Go, content),
            set(&[
                "database/sql",
                "fmt",
                "github.com/go-sql-driver/mysql",
                "mysql",
                "os",
            ])
        );
    }

    #[test]
    fn go_string_literals_outside_imports_are_ignored() {
        let content = "package main\nvar s = \"gpl\"\n\"copyleft\"\n";
        assert!(extract_imports(Family::Go, content).is_empty());
    }

    #[test]
    fn scoped_package_without_name_keeps_scope() {
        assert_eq!(javascript_package("@scope").as_deref(), Some("@scope"));
        assert_eq!(javascript_package("../up"), None);
    }
}
