//! Anthropic Messages API backend.

use super::{
    render_prompt, BackendError, GenerationBackend, GenerationRequest, GenerationResponse, Usage,
    SYSTEM_PROMPT,
};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

fn default_base_url() -> String {
    "https://api.anthropic.com/v1/messages".to_string()
}

fn default_api_version() -> String {
    "2023-06-01".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

/// Connection settings for [`AnthropicBackend`].
#[derive(Clone, Serialize, Deserialize)]
pub struct AnthropicConfig {
    /// API key sent as `x-api-key`.
    pub api_key: String,
    /// Messages endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Value of the `anthropic-version` header.
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// HTTP request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl AnthropicConfig {
    /// Creates a configuration with default endpoint settings.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: default_base_url(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
        }
    }

    /// Overrides the endpoint.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Loads settings from `ANTHROPIC_API_KEY` and optional
    /// `ANTHROPIC_BASE_URL`, after reading a `.env` file if present.
    ///
    /// # Errors
    ///
    /// Fails when the API key is not set.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .context("Required environment variable 'ANTHROPIC_API_KEY' is not set")?;
        let mut config = Self::new(api_key);
        if let Ok(url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = url;
        }
        Ok(config)
    }
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    message: String,
}

impl MessagesResponse {
    fn into_generation(self) -> Result<GenerationResponse, BackendError> {
        let text: String = self
            .content
            .iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        if text.is_empty() {
            return Err(BackendError::InvalidResponse(
                "response contained no text content".to_string(),
            ));
        }

        let mut response = GenerationResponse::new(text);
        response.model = self.model;
        response.usage = self
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens));
        Ok(response)
    }
}

/// Generation backend over the Anthropic Messages API.
#[derive(Debug, Clone)]
pub struct AnthropicBackend {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicBackend {
    /// Builds a backend with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: AnthropicConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl GenerationBackend for AnthropicBackend {
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError> {
        let prompt = render_prompt(request);
        let body = MessagesRequest {
            model: &request.model_id,
            max_tokens: request.max_output_tokens,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: &prompt,
            }],
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiError>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        let generation = parsed.into_generation()?;

        debug!(
            stage = %request.stage,
            attempt = request.attempt,
            input_tokens = generation.usage.map(|u| u.input_tokens),
            output_tokens = generation.usage.map(|u| u.output_tokens),
            "Anthropic call succeeded"
        );
        Ok(generation)
    }
}
