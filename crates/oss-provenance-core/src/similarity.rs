use std::{fs, path::Path};

use anyhow::Result;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::provenance::ProvenanceResolver;
use crate::store::{ResultStore, SimilarityRecord};

pub const SMALL_FILE_CHARS: usize = 100;
pub const SMALL_FILE_SCORE: f64 = 0.1;

/// Collapse every whitespace run to a single space.
pub fn normalize_whitespace(content: &str) -> String {
    content.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn content_hash(content: &str) -> String {
    let digest = Sha256::digest(normalize_whitespace(content).as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Placeholder originality score; no reference corpus is consulted.
///
/// Files whose trimmed content is shorter than [`SMALL_FILE_CHARS`] score
/// [`SMALL_FILE_SCORE`], everything else scores zero.
pub fn similarity_score(content: &str) -> f64 {
    if content.trim().chars().count() < SMALL_FILE_CHARS {
        SMALL_FILE_SCORE
    } else {
        0.0
    }
}

/// Score every recognised file under the resolver's generated root and upsert the results.
#[instrument(name = "similarity", skip_all, fields(root = %resolver.generated_root().display()))]
pub fn score_generated_tree(
    resolver: &ProvenanceResolver<'_>,
    extensions: &[String],
    store: &ResultStore,
) -> Result<Vec<SimilarityRecord>> {
    let root = resolver.generated_root();
    let mut records = Vec::new();
    if !root.is_dir() {
        warn!(root = %root.display(), "generated directory not found; nothing to score");
        return Ok(records);
    }

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() || !has_extension(entry.path(), extensions) {
            continue;
        }
        match score_file(resolver, entry.path()) {
            Ok(record) => {
                if let Err(err) = store.upsert_similarity(&record) {
                    warn!(file = %record.file, error = %format!("{err:#}"), "failed to store similarity");
                    continue;
                }
                debug!(file = %record.file, score = record.score, model = %record.model, "scored");
                records.push(record);
            }
            Err(err) => warn!(file = %entry.path().display(), error = %err, "failed to analyze file"),
        }
    }

    info!(files = records.len(), "similarity analysis complete");
    Ok(records)
}

fn score_file(resolver: &ProvenanceResolver<'_>, path: &Path) -> std::io::Result<SimilarityRecord> {
    let bytes = fs::read(path)?;
    let content = String::from_utf8_lossy(&bytes);
    let lang = path
        .parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(SimilarityRecord {
        file: path.to_string_lossy().into_owned(),
        score: similarity_score(&content),
        model: resolver.resolve_path(path).backend,
        lang,
        content_hash: Some(content_hash(&content)),
    })
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy())
        .is_some_and(|ext| extensions.iter().any(|known| known == ext.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn short_files_score_point_one() {
        let content = "x".repeat(50);
        assert_eq!(similarity_score(&content), 0.1);
        assert_eq!(similarity_score(&format!("   {}\n\n\n", "y".repeat(99))), 0.1);
    }

    #[test]
    fn larger_files_score_zero() {
        assert_eq!(similarity_score(&"x".repeat(500)), 0.0);
        assert_eq!(similarity_score(&"x".repeat(100)), 0.0);
    }

    #[test]
    fn hash_ignores_whitespace_layout() {
        assert_eq!(
            content_hash("def f():\n    return 1\n"),
            content_hash("def  f():\treturn 1")
        );
        assert_ne!(content_hash("a b"), content_hash("ab"));
        assert_eq!(content_hash("").len(), 64);
    }

    #[test]
    fn scores_tree_and_upserts() {
        let temp = tempfile::tempdir().unwrap();
        let py = temp.path().join("python");
        fs::create_dir_all(&py).unwrap();
        fs::write(py.join("a.py"), "print('hi')\n").unwrap();
        fs::write(py.join("b.py"), "x = 1\n".repeat(40)).unwrap();
        fs::write(py.join("notes.txt"), "ignored").unwrap();

        let store = ResultStore::open_in_memory().unwrap();
        let resolver =
            ProvenanceResolver::positional(temp.path(), vec!["openai".into(), "claude".into()]);
        let exts = vec!["py".to_string(), "go".to_string()];

        let records = score_generated_tree(&resolver, &exts, &store).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].score, 0.1);
        assert_eq!(records[0].model, "openai");
        assert_eq!(records[1].score, 0.0);
        assert_eq!(records[1].model, "claude");
        assert!(records.iter().all(|r| r.lang == "python"));

        score_generated_tree(&resolver, &exts, &store).unwrap();
        assert_eq!(store.similarity_records().unwrap().len(), 2);
    }

    #[test]
    fn missing_root_yields_no_records() {
        let temp = tempfile::tempdir().unwrap();
        let store = ResultStore::open_in_memory().unwrap();
        let resolver = ProvenanceResolver::positional(temp.path().join("absent"), vec![]);
        let records = score_generated_tree(&resolver, &["py".to_string()], &store).unwrap();
        assert!(records.is_empty());
    }

    proptest! {
        #[test]
        fn normalized_text_has_no_whitespace_runs(input in "[a-z \\t\\n]{0,64}") {
            let normalized = normalize_whitespace(&input);
            prop_assert!(!normalized.contains("  "));
            prop_assert!(!normalized.contains('\n'));
            prop_assert_eq!(normalized.trim(), normalized.as_str());
        }
    }
}
