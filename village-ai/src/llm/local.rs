//! Self-hosted completion endpoint (llama.cpp server and OpenAI-compatible APIs).

use crate::config::GenerationConfig;
use crate::dialogue::{DialogueRequest, GenerationProvider};
use crate::error::{ProviderError, ProviderResult};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Endpoint used when none is configured
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8080/completion";

const STOP_SEQUENCES: [&str; 3] = ["\n\n", "Player:", "Villager:"];

/// Provider for a local completion server. Needs no API key.
pub struct LocalProvider {
    client: reqwest::Client,
    endpoint: String,
    model: Option<String>,
    temperature: f32,
    max_tokens: usize,
}

impl LocalProvider {
    /// Provider posting to `endpoint`
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: None,
            temperature: 0.8,
            max_tokens: 150,
        }
    }

    /// Build from a generation config, defaulting the endpoint
    pub fn from_config(config: &GenerationConfig) -> ProviderResult<Self> {
        let endpoint = config.endpoint.clone().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ProviderError::Configuration(format!(
                "local endpoint must be an http(s) URL, got {endpoint}"
            )));
        }
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            ..Self::new(endpoint)
        })
    }

    /// Endpoint in use
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn to_body<'a>(&'a self, request: &'a DialogueRequest) -> CompletionBody<'a> {
        CompletionBody {
            prompt: &request.prompt,
            model: self.model.as_deref(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            repeat_penalty: 1.1,
            stream: false,
            stop: &STOP_SEQUENCES,
        }
    }
}

/// Pull the generated text out of whichever response shape the server uses.
fn parse_completion(body: &Value) -> ProviderResult<String> {
    let text = body
        .pointer("/choices/0/text")
        .or_else(|| body.get("content"))
        .or_else(|| body.pointer("/data/0/text"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::Parse("unexpected completion response format".to_string()))?;
    if text.trim().is_empty() {
        Err(ProviderError::EmptyResponse)
    } else {
        Ok(text.to_string())
    }
}

#[async_trait]
impl GenerationProvider for LocalProvider {
    async fn generate(&self, request: &DialogueRequest) -> ProviderResult<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&self.to_body(request))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;
        parse_completion(&body)
    }

    fn name(&self) -> &str {
        "local"
    }

    fn is_ready(&self) -> bool {
        !self.endpoint.is_empty()
    }
}

#[derive(Debug, Serialize)]
struct CompletionBody<'a> {
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    temperature: f32,
    max_tokens: usize,
    repeat_penalty: f32,
    stream: bool,
    stop: &'a [&'a str],
}
