use std::{
    cell::RefCell,
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::store::ResultStore;

pub const UNKNOWN_BACKEND: &str = "unknown";

/// How an attribution was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionSource {
    Recorded,
    Inferred,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub backend: String,
    pub source: AttributionSource,
}

impl Attribution {
    pub fn unknown() -> Self {
        Self {
            backend: UNKNOWN_BACKEND.to_string(),
            source: AttributionSource::Unknown,
        }
    }
}

/// Backend used for attempt or ordinal `index` under round-robin alternation.
///
/// With two backends this is the even → first, odd → second rule.
pub fn alternation_pick<T>(index: usize, backends: &[T]) -> Option<&T> {
    if backends.is_empty() {
        return None;
    }
    Some(&backends[index % backends.len()])
}

/// Sorted file names of the regular files directly under `dir`.
pub fn cohort_listing(dir: &Path) -> std::io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(names)
}

/// Attributes generated files to the backend that produced them.
///
/// A tag recorded at generation time always wins. Without one, the backend is
/// inferred from the file's ordinal in the sorted listing of its language
/// directory, which shifts if members of that cohort are added or removed.
pub struct ProvenanceResolver<'s> {
    generated_root: PathBuf,
    backends: Vec<String>,
    store: Option<&'s ResultStore>,
    cohorts: RefCell<HashMap<String, Option<Vec<String>>>>,
}

impl<'s> ProvenanceResolver<'s> {
    /// Resolver that only uses positional inference.
    pub fn positional(generated_root: impl Into<PathBuf>, backends: Vec<String>) -> Self {
        Self {
            generated_root: generated_root.into(),
            backends,
            store: None,
            cohorts: RefCell::new(HashMap::new()),
        }
    }

    /// Resolver that consults recorded provenance before falling back to inference.
    pub fn with_store(
        generated_root: impl Into<PathBuf>,
        backends: Vec<String>,
        store: &'s ResultStore,
    ) -> Self {
        Self {
            store: Some(store),
            ..Self::positional(generated_root, backends)
        }
    }

    pub fn generated_root(&self) -> &Path {
        &self.generated_root
    }

    /// Resolve a path shaped like `<root>/<lang>/<file>`.
    pub fn resolve_path(&self, path: &Path) -> Attribution {
        let lang = path
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned());
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned());
        match (lang, file_name) {
            (Some(lang), Some(file_name)) => self.resolve(&lang, &file_name),
            _ => Attribution::unknown(),
        }
    }

    pub fn resolve(&self, lang: &str, file_name: &str) -> Attribution {
        if let Some(store) = self.store {
            match store.recorded_backend(lang, file_name) {
                Ok(Some(backend)) => {
                    return Attribution {
                        backend,
                        source: AttributionSource::Recorded,
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(lang, file_name, error = %err, "recorded provenance lookup failed"),
            }
        }

        match self.ordinal(lang, file_name) {
            Some(index) => match alternation_pick(index, &self.backends) {
                Some(backend) => Attribution {
                    backend: backend.clone(),
                    source: AttributionSource::Inferred,
                },
                None => Attribution::unknown(),
            },
            None => {
                debug!(lang, file_name, "file not found in cohort");
                Attribution::unknown()
            }
        }
    }

    /// Position of `file_name` in the sorted listing of its language cohort.
    pub fn ordinal(&self, lang: &str, file_name: &str) -> Option<usize> {
        let mut cohorts = self.cohorts.borrow_mut();
        let listing = cohorts.entry(lang.to_string()).or_insert_with(|| {
            let dir = self.generated_root.join(lang);
            match cohort_listing(&dir) {
                Ok(names) => Some(names),
                Err(err) => {
                    warn!(dir = %dir.display(), error = %err, "cannot list cohort");
                    None
                }
            }
        });
        listing
            .as_ref()
            .and_then(|names| names.iter().position(|name| name == file_name))
    }
}
