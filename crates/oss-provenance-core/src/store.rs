use std::path::Path;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS similarity (
    file TEXT PRIMARY KEY,
    score REAL NOT NULL,
    model TEXT NOT NULL,
    lang TEXT NOT NULL,
    content_hash TEXT
);

CREATE TABLE IF NOT EXISTS licenses (
    file_path TEXT NOT NULL,
    license_key TEXT NOT NULL,
    license_name TEXT NOT NULL,
    lang TEXT NOT NULL,
    model TEXT NOT NULL,
    score REAL NOT NULL,
    PRIMARY KEY (file_path, license_key)
);

CREATE TABLE IF NOT EXISTS generated_files (
    lang TEXT NOT NULL,
    file_name TEXT NOT NULL,
    path TEXT NOT NULL,
    backend TEXT NOT NULL,
    attempt INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (lang, file_name)
);

CREATE INDEX IF NOT EXISTS idx_licenses_lang_model ON licenses(lang, model);
"#;

/// Placeholder originality score for one generated file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRecord {
    pub file: String,
    pub score: f64,
    pub model: String,
    pub lang: String,
    pub content_hash: Option<String>,
}

/// One license detected in one file, or the `none` sentinel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LicenseDetection {
    pub file_path: String,
    pub license_key: String,
    pub license_name: String,
    pub lang: String,
    pub model: String,
    pub score: f64,
}

/// Provenance tag written when a generated file is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedFileRecord {
    pub lang: String,
    pub file_name: String,
    pub path: String,
    pub backend: String,
    pub attempt: u32,
    pub created_at: String,
}

/// SQLite persistence shared by every pipeline stage.
///
/// Similarity rows are keyed by file and license rows by
/// `(file_path, license_key)`; importing a file replaces its prior license rows.
/// Rows may outlive the files they describe.
pub struct ResultStore {
    conn: Connection,
}

impl ResultStore {
    /// Open or create the store at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open result store at {}", path.display()))?;
        Self::initialize(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("failed to open in-memory store")?;
        Self::initialize(conn)
    }

    fn initialize(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("failed to create result store schema")?;
        Ok(Self { conn })
    }

    pub fn upsert_similarity(&self, record: &SimilarityRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO similarity (file, score, model, lang, content_hash)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(file) DO UPDATE SET
                    score = excluded.score,
                    model = excluded.model,
                    lang = excluded.lang,
                    content_hash = excluded.content_hash",
                params![
                    record.file,
                    record.score,
                    record.model,
                    record.lang,
                    record.content_hash
                ],
            )
            .with_context(|| format!("failed to store similarity for {}", record.file))?;
        Ok(())
    }

    /// Replace every license row of `file_path` with `detections`.
    ///
    /// Repeated keys within one file collapse to a single row holding the highest score.
    pub fn replace_license_detections(
        &self,
        file_path: &str,
        detections: &[LicenseDetection],
    ) -> Result<()> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("failed to begin license transaction")?;
        tx.execute("DELETE FROM licenses WHERE file_path = ?1", params![file_path])?;
        for detection in detections {
            tx.execute(
                "INSERT INTO licenses (file_path, license_key, license_name, lang, model, score)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(file_path, license_key) DO UPDATE SET
                    score = MAX(score, excluded.score)",
                params![
                    detection.file_path,
                    detection.license_key,
                    detection.license_name,
                    detection.lang,
                    detection.model,
                    detection.score
                ],
            )?;
        }
        tx.commit()
            .with_context(|| format!("failed to store licenses for {file_path}"))?;
        Ok(())
    }

    pub fn record_generated(&self, record: &GeneratedFileRecord) -> Result<()> {
        self.conn
            .execute(
                "INSERT OR REPLACE INTO generated_files
                    (lang, file_name, path, backend, attempt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.lang,
                    record.file_name,
                    record.path,
                    record.backend,
                    record.attempt,
                    record.created_at
                ],
            )
            .with_context(|| format!("failed to record provenance for {}", record.path))?;
        Ok(())
    }

    pub fn recorded_backend(&self, lang: &str, file_name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT backend FROM generated_files WHERE lang = ?1 AND file_name = ?2",
                params![lang, file_name],
                |row| row.get(0),
            )
            .optional()
            .context("failed to query recorded provenance")
    }

    pub fn generated_files(&self) -> Result<Vec<GeneratedFileRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT lang, file_name, path, backend, attempt, created_at
             FROM generated_files ORDER BY lang, file_name",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(GeneratedFileRecord {
                lang: row.get(0)?,
                file_name: row.get(1)?,
                path: row.get(2)?,
                backend: row.get(3)?,
                attempt: row.get(4)?,
                created_at: row.get(5)?,
            })
        })?;
        let records = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read generated_files table")?;
        Ok(records)
    }

    pub fn similarity_records(&self) -> Result<Vec<SimilarityRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT file, score, model, lang, content_hash
             FROM similarity ORDER BY lang, model, file",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SimilarityRecord {
                file: row.get(0)?,
                score: row.get(1)?,
                model: row.get(2)?,
                lang: row.get(3)?,
                content_hash: row.get(4)?,
            })
        })?;
        let records = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read similarity table")?;
        Ok(records)
    }

    pub fn license_detections(&self) -> Result<Vec<LicenseDetection>> {
        let mut stmt = self.conn.prepare(
            "SELECT file_path, license_key, license_name, lang, model, score
             FROM licenses ORDER BY lang, model, file_path, license_key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(LicenseDetection {
                file_path: row.get(0)?,
                license_key: row.get(1)?,
                license_name: row.get(2)?,
                lang: row.get(3)?,
                model: row.get(4)?,
                score: row.get(5)?,
            })
        })?;
        let records = rows
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("failed to read licenses table")?;
        Ok(records)
    }
}
