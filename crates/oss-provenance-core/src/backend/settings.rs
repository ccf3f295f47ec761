use std::collections::HashMap;

use super::BackendMode;

pub const OPENAI_BACKEND_ID: &str = "openai";
pub const CLAUDE_BACKEND_ID: &str = "claude";

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_LOCAL_MODEL_1: &str = "codellama:7b";
const DEFAULT_LOCAL_MODEL_2: &str = "deepseek-coder:6.7b";

/// Environment-driven configuration for the code-generation backends.
///
/// This is the single source of backend identifiers: the generation driver
/// and every provenance consumer derive their backend list from
/// [`BackendSettings::backend_ids`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSettings {
    pub mode: BackendMode,
    pub ollama_base_url: String,
    pub local_model_1: String,
    pub local_model_2: String,
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub openai_endpoint: Option<String>,
    pub anthropic_endpoint: Option<String>,
}

impl BackendSettings {
    const USE_LOCAL_ENV: &'static str = "USE_LOCAL_LLM";
    const OLLAMA_URL_ENV: &'static str = "OLLAMA_BASE_URL";
    const LOCAL_MODEL_1_ENV: &'static str = "LOCAL_MODEL_1";
    const LOCAL_MODEL_2_ENV: &'static str = "LOCAL_MODEL_2";
    const OPENAI_KEY_ENV: &'static str = "OPENAI_API_KEY";
    const ANTHROPIC_KEY_ENV: &'static str = "ANTHROPIC_API_KEY";
    const OPENAI_ENDPOINT_ENV: &'static str = "OPENAI_BASE_URL";
    const ANTHROPIC_ENDPOINT_ENV: &'static str = "ANTHROPIC_BASE_URL";

    /// Load settings from environment variables.
    ///
    /// * `USE_LOCAL_LLM`: `true` selects the local Ollama pair (default: cloud pair).
    /// * `OLLAMA_BASE_URL`: Ollama base URL (default: `http://localhost:11434`).
    /// * `LOCAL_MODEL_1` / `LOCAL_MODEL_2`: the two local model names.
    /// * `OPENAI_API_KEY` / `ANTHROPIC_API_KEY`: cloud credentials, only read here.
    ///
    /// Missing credentials are not an error; calls to that backend fail and are skipped.
    pub fn from_env() -> Self {
        Self::from_map(std::env::vars().collect())
    }

    pub fn from_map(vars: HashMap<String, String>) -> Self {
        let non_empty = |key: &str| {
            vars.get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mode = match non_empty(Self::USE_LOCAL_ENV) {
            Some(flag) if flag.eq_ignore_ascii_case("true") => BackendMode::Local,
            _ => BackendMode::Cloud,
        };

        Self {
            mode,
            ollama_base_url: non_empty(Self::OLLAMA_URL_ENV)
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            local_model_1: non_empty(Self::LOCAL_MODEL_1_ENV)
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL_1.to_string()),
            local_model_2: non_empty(Self::LOCAL_MODEL_2_ENV)
                .unwrap_or_else(|| DEFAULT_LOCAL_MODEL_2.to_string()),
            openai_api_key: non_empty(Self::OPENAI_KEY_ENV),
            anthropic_api_key: non_empty(Self::ANTHROPIC_KEY_ENV),
            openai_endpoint: non_empty(Self::OPENAI_ENDPOINT_ENV),
            anthropic_endpoint: non_empty(Self::ANTHROPIC_ENDPOINT_ENV),
        }
    }

    /// Backend identifiers in alternation order for the active mode.
    pub fn backend_ids(&self) -> Vec<String> {
        match self.mode {
            BackendMode::Cloud => vec![OPENAI_BACKEND_ID.to_string(), CLAUDE_BACKEND_ID.to_string()],
            BackendMode::Local => vec![self.local_model_1.clone(), self.local_model_2.clone()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_to_cloud_pair() {
        let settings = BackendSettings::from_map(HashMap::new());
        assert_eq!(settings.mode, BackendMode::Cloud);
        assert_eq!(settings.backend_ids(), vec!["openai", "claude"]);
        assert_eq!(settings.ollama_base_url, "http://localhost:11434");
        assert!(settings.openai_api_key.is_none());
    }

    #[test]
    fn local_flag_selects_local_models() {
        let settings = BackendSettings::from_map(vars(&[
            ("USE_LOCAL_LLM", "TRUE"),
            ("LOCAL_MODEL_1", "llama3:8b"),
        ]));
        assert_eq!(settings.mode, BackendMode::Local);
        assert_eq!(
            settings.backend_ids(),
            vec!["llama3:8b".to_string(), "deepseek-coder:6.7b".to_string()]
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let settings = BackendSettings::from_map(vars(&[
            ("USE_LOCAL_LLM", "false"),
            ("OLLAMA_BASE_URL", "   "),
            ("OPENAI_API_KEY", ""),
        ]));
        assert_eq!(settings.mode, BackendMode::Cloud);
        assert_eq!(settings.ollama_base_url, "http://localhost:11434");
        assert!(settings.openai_api_key.is_none());
    }
}
