use super::{BackendSettings, CodeBackend, CLAUDE_BACKEND_ID};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const DEFAULT_MODEL: &str = "claude-3-opus-20240229";
const MAX_TOKENS: u32 = 4000;
const TEMPERATURE: f32 = 0.2;
const API_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    http: Client,
    url: String,
    api_key: Option<String>,
    model: String,
}

impl AnthropicBackend {
    pub fn new(settings: &BackendSettings) -> Result<Self> {
        let base = settings
            .anthropic_endpoint
            .clone()
            .unwrap_or_else(|| "https://api.anthropic.com".to_string());
        let url = format!("{}/v1/messages", base.trim_end_matches('/'));
        let http = Client::builder()
            .user_agent("oss-provenance/0.3")
            .build()
            .context("failed to build Anthropic HTTP client")?;
        Ok(Self {
            http,
            url,
            api_key: settings.anthropic_api_key.clone(),
            model: DEFAULT_MODEL.to_string(),
        })
    }
}

#[async_trait]
impl CodeBackend for AnthropicBackend {
    fn id(&self) -> &str {
        CLAUDE_BACKEND_ID
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("ANTHROPIC_API_KEY is not set");
        };
        let payload = AnthropicRequest {
            model: self.model.clone(),
            messages: vec![AnthropicMessage {
                role: "user".into(),
                content: prompt.to_string(),
            }],
            max_tokens: MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-api-key", api_key)
            .header("anthropic-version", API_VERSION)
            .json(&payload)
            .send()
            .await
            .context("failed to call Anthropic messages API")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Anthropic API error ({}): {}", status, body);
        }

        let message: AnthropicResponse = response
            .json()
            .await
            .context("failed to parse Anthropic response")?;
        message
            .content
            .into_iter()
            .find_map(|part| part.text)
            .ok_or_else(|| anyhow!("Anthropic response missing message content"))
    }
}

#[derive(Serialize)]
struct AnthropicRequest {
    model: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContent>,
}

#[derive(Deserialize)]
struct AnthropicContent {
    #[serde(rename = "type")]
    _type: String,
    #[serde(default)]
    text: Option<String>,
}
