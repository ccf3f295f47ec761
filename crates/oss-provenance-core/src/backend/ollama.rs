use std::time::Duration;

use super::CodeBackend;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);
const TEMPERATURE: f32 = 0.2;

/// Locally hosted model served by Ollama. The model name doubles as the backend id.
#[derive(Debug, Clone)]
pub struct OllamaBackend {
    http: Client,
    url: String,
    model: String,
}

impl OllamaBackend {
    pub fn new(base_url: &str, model: &str) -> Result<Self> {
        let http = Client::builder()
            .user_agent("oss-provenance/0.3")
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build Ollama HTTP client")?;
        Ok(Self {
            http,
            url: format!("{}/api/generate", base_url.trim_end_matches('/')),
            model: model.to_string(),
        })
    }
}

#[async_trait]
impl CodeBackend for OllamaBackend {
    fn id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let payload = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: TEMPERATURE,
            },
        };

        let response = self
            .http
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("failed to call Ollama with model {}", self.model))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("Ollama API error with model {} ({}): {}", self.model, status, body);
        }

        let generated: GenerateResponse = response
            .json()
            .await
            .context("failed to parse Ollama response")?;
        Ok(generated.response)
    }
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[test]
    fn trims_trailing_slash_from_base_url() {
        let backend = OllamaBackend::new("http://localhost:11434/", "codellama:7b").unwrap();
        assert_eq!(backend.url, "http://localhost:11434/api/generate");
        assert_eq!(backend.id(), "codellama:7b");
    }

    #[tokio::test]
    #[ignore = "requires loopback networking"]
    async fn returns_response_field() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/generate")
                .json_body_partial(r#"{"model":"codellama:7b","stream":false}"#);
            then.status(200)
                .header("content-type", "application/json")
                .body(r#"{"model":"codellama:7b","response":"console.log(1);","done":true}"#);
        });

        let backend = OllamaBackend::new(&server.base_url(), "codellama:7b").unwrap();
        let text = backend.complete("write typescript").await.unwrap();
        assert_eq!(text, "console.log(1);");
        mock.assert();
    }
}
