use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use super::imports::Family;

const BUILTIN_TABLE: &str = include_str!("../../data/problematic_packages.json");

/// Known packages with problematic licenses, keyed by ecosystem.
#[derive(Debug, Clone)]
pub struct LicenseTable {
    families: BTreeMap<String, Vec<String>>,
    packages: HashMap<Family, HashMap<String, String>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableValidationError {
    #[error("license family `{family}` must list at least one license")]
    EmptyFamily { family: String },
    #[error("package name in `{family}` table must not be blank")]
    EmptyPackage { family: String },
    #[error("package `{package}` in `{family}` table has no license")]
    EmptyLicense { family: String, package: String },
    #[error("duplicate package `{package}` in `{family}` table")]
    DuplicatePackage { family: String, package: String },
}

#[derive(Deserialize)]
struct JsonTable {
    license_families: BTreeMap<String, Vec<String>>,
    packages: BTreeMap<Family, Vec<JsonPackage>>,
}

#[derive(Deserialize)]
struct JsonPackage {
    name: String,
    license: String,
}

impl LicenseTable {
    /// Table shipped with the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_TABLE).context("built-in package table is invalid")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read package table at {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("invalid package table at {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let table: JsonTable =
            serde_json::from_str(raw).context("invalid JSON structure in package table")?;

        for (family, licenses) in &table.license_families {
            if licenses.is_empty() {
                return Err(TableValidationError::EmptyFamily {
                    family: family.clone(),
                }
                .into());
            }
        }

        let mut packages = HashMap::new();
        for (family, entries) in table.packages {
            let mut seen = HashSet::new();
            let mut lookup = HashMap::new();
            for entry in entries {
                let name = entry.name.trim().to_lowercase();
                if name.is_empty() {
                    return Err(TableValidationError::EmptyPackage {
                        family: family.to_string(),
                    }
                    .into());
                }
                if entry.license.trim().is_empty() {
                    return Err(TableValidationError::EmptyLicense {
                        family: family.to_string(),
                        package: name,
                    }
                    .into());
                }
                if !seen.insert(name.clone()) {
                    return Err(TableValidationError::DuplicatePackage {
                        family: family.to_string(),
                        package: name,
                    }
                    .into());
                }
                lookup.insert(name, entry.license.trim().to_string());
            }
            packages.insert(family, lookup);
        }

        Ok(Self {
            families: table.license_families,
            packages,
        })
    }

    /// License recorded for `package`, matched case-insensitively.
    pub fn license_for(&self, family: Family, package: &str) -> Option<&str> {
        self.packages
            .get(&family)?
            .get(&package.to_lowercase())
            .map(String::as_str)
    }

    /// Name of the problematic license family containing `license`, if any.
    pub fn license_family(&self, license: &str) -> Option<&str> {
        self.families
            .iter()
            .find(|(_, licenses)| licenses.iter().any(|l| l == license))
            .map(|(family, _)| family.as_str())
    }

    pub fn package_count(&self) -> usize {
        self.packages.values().map(HashMap::len).sum()
    }
}
