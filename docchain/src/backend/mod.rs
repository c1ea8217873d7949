//! Generation backend seam.
//!
//! The engine treats the model as an opaque function from a
//! [`GenerationRequest`] to raw text. Prompt formatting and transport are the
//! backend's business; coercion, validation and retry are the adapter's.

mod adapter;
#[cfg(feature = "anthropic")]
mod anthropic;
mod prompt;

pub use adapter::GenerationAdapter;
#[cfg(feature = "anthropic")]
pub use anthropic::{AnthropicBackend, AnthropicConfig};
pub use prompt::{render_prompt, SYSTEM_PROMPT};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Token accounting reported by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens.
    pub input_tokens: u32,
    /// Completion tokens.
    pub output_tokens: u32,
}

impl Usage {
    /// Creates a usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Returns total tokens.
    #[must_use]
    pub const fn total(&self) -> u32 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    /// Adds two usage records.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self {
            input_tokens: self.input_tokens.saturating_add(other.input_tokens),
            output_tokens: self.output_tokens.saturating_add(other.output_tokens),
        }
    }
}

/// Everything a backend needs to generate one stage output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// The run this call belongs to.
    pub run_id: Uuid,
    /// Stage being generated.
    pub stage: String,
    /// Model to use.
    pub model_id: String,
    /// Generation instruction.
    pub intent: String,
    /// Resolved parameters in declaration order.
    pub inputs: Vec<(String, Value)>,
    /// Name of the output contract.
    pub output_contract: String,
    /// JSON description of the output contract.
    pub contract_descriptor: Value,
    /// Output size limit.
    pub max_output_tokens: u32,
    /// 1-based attempt number for this stage.
    pub attempt: usize,
}

impl GenerationRequest {
    /// Looks up a resolved input by parameter name.
    #[must_use]
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// The inputs as a JSON object, for echoing into traces.
    #[must_use]
    pub fn inputs_json(&self) -> Value {
        Value::Object(self.inputs.iter().cloned().collect())
    }
}

/// Raw backend output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResponse {
    /// Raw completion text.
    pub text: String,
    /// Model that actually served the call, if the backend reports it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Token usage, if reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl GenerationResponse {
    /// Creates a response with only text.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            model: None,
            usage: None,
        }
    }

    /// Sets the serving model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets the usage.
    #[must_use]
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }
}

/// A backend failure. Never retried by the engine.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The request never got a response.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with an error status.
    #[error("backend returned status {status}: {message}")]
    Status {
        /// HTTP or service status code.
        status: u16,
        /// Error body or description.
        message: String,
    },
    /// The response could not be understood.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
    /// The backend is misconfigured.
    #[error("backend configuration error: {0}")]
    Config(String),
}

/// The opaque generative model.
///
/// Implementations are shared read-only between concurrent runs.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generates raw output for one stage attempt.
    async fn generate(&self, request: &GenerationRequest) -> Result<GenerationResponse, BackendError>;
}
