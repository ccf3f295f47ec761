mod anthropic;
mod ollama;
mod openai;
mod settings;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

pub use anthropic::AnthropicBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use settings::{BackendSettings, CLAUDE_BACKEND_ID, OPENAI_BACKEND_ID};

/// Which pair of backends a run alternates between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Cloud,
    Local,
}

/// Client abstraction over a single code-generation service.
#[async_trait]
pub trait CodeBackend: Send + Sync {
    /// Identifier recorded as the provenance of files this backend produces.
    fn id(&self) -> &str;

    /// Produce raw completion text for the prompt.
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Invoke a backend once, turning every failure into `None`.
///
/// Blank output counts as a failure. No retry is attempted.
pub async fn generate_or_skip(backend: &dyn CodeBackend, prompt: &str) -> Option<String> {
    match backend.complete(prompt).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            warn!(backend = backend.id(), "backend returned empty output");
            None
        }
        Err(err) => {
            warn!(backend = backend.id(), error = %format!("{err:#}"), "backend call failed");
            None
        }
    }
}

/// Build the backend pair for the configured mode, in alternation order.
pub fn build_backends(settings: &BackendSettings) -> Result<Vec<Box<dyn CodeBackend>>> {
    let backends: Vec<Box<dyn CodeBackend>> = match settings.mode {
        BackendMode::Cloud => vec![
            Box::new(OpenAiBackend::new(settings)?),
            Box::new(AnthropicBackend::new(settings)?),
        ],
        BackendMode::Local => vec![
            Box::new(OllamaBackend::new(&settings.ollama_base_url, &settings.local_model_1)?),
            Box::new(OllamaBackend::new(&settings.ollama_base_url, &settings.local_model_2)?),
        ],
    };
    Ok(backends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Fixed(Result<&'static str, &'static str>);

    #[async_trait]
    impl CodeBackend for Fixed {
        fn id(&self) -> &str {
            "fixed"
        }

        async fn complete(&self, _prompt: &str) -> Result<String> {
            match self.0 {
                Ok(text) => Ok(text.to_string()),
                Err(msg) => bail!("{msg}"),
            }
        }
    }

    #[tokio::test]
    async fn passes_through_successful_output_verbatim() {
        let backend = Fixed(Ok("```python\nprint(1)\n```"));
        let out = generate_or_skip(&backend, "prompt").await;
        assert_eq!(out.as_deref(), Some("```python\nprint(1)\n```"));
    }

    #[tokio::test]
    async fn errors_and_blank_output_become_none() {
        assert!(generate_or_skip(&Fixed(Err("quota exceeded")), "p").await.is_none());
        assert!(generate_or_skip(&Fixed(Ok("  \n ")), "p").await.is_none());
    }

    #[test]
    fn builds_pair_in_alternation_order() {
        let settings = BackendSettings::from_map(Default::default());
        let backends = build_backends(&settings).unwrap();
        let ids: Vec<_> = backends.iter().map(|b| b.id().to_string()).collect();
        assert_eq!(ids, settings.backend_ids());
    }
}
