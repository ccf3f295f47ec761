use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::backend::{generate_or_skip, CodeBackend};
use crate::provenance::alternation_pick;
use crate::store::{GeneratedFileRecord, ResultStore};

const LANG_PLACEHOLDER: &str = "{lang}";
const DEFAULT_DELAY: Duration = Duration::from_secs(1);

/// Generation configuration document (`prompts/prompt_spec.yaml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub languages: Vec<String>,
    pub repeat: u32,
    /// Instruction template; `{lang}` is replaced by the language name.
    pub instruction: String,
    /// Extra or overriding language → file extension entries.
    #[serde(default)]
    pub extensions: HashMap<String, String>,
    /// Pause after every attempt, in humantime notation (`"1s"`, `"500ms"`).
    #[serde(default)]
    pub delay: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecValidationError {
    #[error("generation spec must list at least one language")]
    NoLanguages,
    #[error("instruction template must not be blank")]
    EmptyInstruction,
    #[error("no file extension configured for language `{0}`")]
    UnknownExtension(String),
    #[error("invalid delay `{value}`: {reason}")]
    InvalidDelay { value: String, reason: String },
}

fn builtin_extension(lang: &str) -> Option<&'static str> {
    match lang {
        "python" => Some("py"),
        "go" => Some("go"),
        "typescript" => Some("ts"),
        _ => None,
    }
}

impl GenerationSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read generation spec at {}", path.display()))?;
        let spec: Self = serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid generation spec at {}", path.display()))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), SpecValidationError> {
        if self.languages.is_empty() {
            return Err(SpecValidationError::NoLanguages);
        }
        if self.instruction.trim().is_empty() {
            return Err(SpecValidationError::EmptyInstruction);
        }
        for lang in &self.languages {
            if self.extension_for(lang).is_none() {
                return Err(SpecValidationError::UnknownExtension(lang.clone()));
            }
        }
        self.delay()?;
        Ok(())
    }

    pub fn prompt_for(&self, lang: &str) -> String {
        self.instruction.replace(LANG_PLACEHOLDER, lang)
    }

    pub fn extension_for(&self, lang: &str) -> Option<String> {
        self.extensions
            .get(lang)
            .map(|ext| ext.trim_start_matches('.').to_string())
            .or_else(|| builtin_extension(lang).map(str::to_string))
    }

    /// Extensions of every configured language, used to recognise generated files.
    pub fn recognized_extensions(&self) -> Vec<String> {
        let mut exts: Vec<_> = self
            .languages
            .iter()
            .filter_map(|lang| self.extension_for(lang))
            .collect();
        exts.sort();
        exts.dedup();
        exts
    }

    pub fn delay(&self) -> Result<Duration, SpecValidationError> {
        match self.delay.as_deref() {
            None => Ok(DEFAULT_DELAY),
            Some(value) => humantime::parse_duration(value.trim()).map_err(|err| {
                SpecValidationError::InvalidDelay {
                    value: value.to_string(),
                    reason: err.to_string(),
                }
            }),
        }
    }
}

/// Per-language outcome of a generation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LanguageOutcome {
    pub attempted: u32,
    pub generated: u32,
    pub failed: u32,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GenerationSummary {
    pub languages: BTreeMap<String, LanguageOutcome>,
}

impl GenerationSummary {
    pub fn total_generated(&self) -> u32 {
        self.languages.values().map(|o| o.generated).sum()
    }
}

/// Drives backends over languages × repeat count, writing one file per success.
pub struct GenerationDriver<'a> {
    backends: &'a [Box<dyn CodeBackend>],
    output_root: PathBuf,
    delay: Duration,
}

impl<'a> GenerationDriver<'a> {
    pub fn new(
        backends: &'a [Box<dyn CodeBackend>],
        output_root: impl Into<PathBuf>,
        delay: Duration,
    ) -> Self {
        Self {
            backends,
            output_root: output_root.into(),
            delay,
        }
    }

    #[instrument(name = "generate", skip(self, spec, store), fields(languages = spec.languages.len(), repeat = spec.repeat))]
    pub async fn run(&self, spec: &GenerationSpec, store: &ResultStore) -> Result<GenerationSummary> {
        spec.validate()?;
        if self.backends.is_empty() {
            bail!("no code-generation backends configured");
        }
        let ids: Vec<String> = self.backends.iter().map(|b| b.id().to_string()).collect();
        info!(backends = ?ids, "starting generation");
        let mut summary = GenerationSummary::default();

        for lang in &spec.languages {
            let ext = spec
                .extension_for(lang)
                .ok_or_else(|| SpecValidationError::UnknownExtension(lang.clone()))?;
            let prompt = spec.prompt_for(lang);
            let dir = self.output_root.join(lang);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let outcome = summary.languages.entry(lang.clone()).or_default();

            for attempt in 0..spec.repeat {
                outcome.attempted += 1;
                let Some(backend) = alternation_pick(attempt as usize, self.backends) else {
                    bail!("no code-generation backends configured");
                };
                let backend = backend.as_ref();

                match generate_or_skip(backend, &prompt).await {
                    Some(code) => match self.persist(&dir, lang, &ext, attempt, backend.id(), &code, store) {
                        Ok(path) => {
                            info!(
                                lang = %lang,
                                backend = backend.id(),
                                "generated file {}/{}",
                                attempt + 1,
                                spec.repeat
                            );
                            outcome.generated += 1;
                            outcome.files.push(path);
                        }
                        Err(err) => {
                            warn!(lang = %lang, error = %format!("{err:#}"), "failed to write generated file");
                            outcome.failed += 1;
                        }
                    },
                    None => {
                        warn!(
                            lang = %lang,
                            backend = backend.id(),
                            "failed to generate file {}/{}",
                            attempt + 1,
                            spec.repeat
                        );
                        outcome.failed += 1;
                    }
                }

                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
            }
        }

        info!(generated = summary.total_generated(), "generation complete");
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    fn persist(
        &self,
        dir: &Path,
        lang: &str,
        ext: &str,
        attempt: u32,
        backend: &str,
        code: &str,
        store: &ResultStore,
    ) -> Result<PathBuf> {
        let file_name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = dir.join(&file_name);
        fs::write(&path, code).with_context(|| format!("failed to write {}", path.display()))?;

        let record = GeneratedFileRecord {
            lang: lang.to_string(),
            file_name,
            path: path.to_string_lossy().into_owned(),
            backend: backend.to_string(),
            attempt,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(err) = store.record_generated(&record) {
            warn!(path = %path.display(), error = %format!("{err:#}"), "provenance tag not recorded");
        }
        Ok(path)
    }
}
