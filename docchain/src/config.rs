//! Executor configuration.
//!
//! Model identity, output limits, retry and timeout settings are passed to
//! the executor explicitly; nothing is read from process-wide state during a
//! run.

use crate::pipeline::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Configuration for an [`Executor`](crate::pipeline::Executor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Model identifier passed to the backend.
    #[serde(default = "default_model_id")]
    pub model_id: String,
    /// Output size limit per backend call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    /// Retry policy for contract violations.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-stage timeout in seconds, covering all attempts.
    #[serde(default)]
    pub stage_timeout_secs: Option<u64>,
    /// Whether cancellation interrupts an in-flight backend call.
    #[serde(default)]
    pub interrupt_in_flight: bool,
    /// Maximum concurrent runs in a batch.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

fn default_model_id() -> String {
    "claude-3-haiku-20240307".to_string()
}

fn default_max_output_tokens() -> u32 {
    4000
}

fn default_batch_concurrency() -> usize {
    4
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            model_id: default_model_id(),
            max_output_tokens: default_max_output_tokens(),
            retry: RetryPolicy::default(),
            stage_timeout_secs: None,
            interrupt_in_flight: false,
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl ExecutorConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the model.
    #[must_use]
    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Sets the output size limit.
    #[must_use]
    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-stage timeout.
    #[must_use]
    pub fn with_stage_timeout_secs(mut self, secs: u64) -> Self {
        self.stage_timeout_secs = Some(secs);
        self
    }

    /// Enables interruption of in-flight backend calls on cancellation.
    #[must_use]
    pub fn with_interrupt_in_flight(mut self, interrupt: bool) -> Self {
        self.interrupt_in_flight = interrupt;
        self
    }

    /// Sets the batch concurrency.
    #[must_use]
    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    /// The per-stage timeout as a duration.
    #[must_use]
    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_secs.map(Duration::from_secs)
    }

    /// Loads configuration from `DOCCHAIN_*` environment variables.
    ///
    /// A `.env` file is loaded first if present. Unset variables keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Fails when a variable is set but does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Fails when a variable is present but does not parse.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(model) = lookup("DOCCHAIN_MODEL_ID") {
            config.model_id = model;
        }
        if let Some(tokens) = parse_var(&lookup, "DOCCHAIN_MAX_OUTPUT_TOKENS")? {
            config.max_output_tokens = tokens;
        }
        if let Some(retries) = parse_var(&lookup, "DOCCHAIN_MAX_RETRIES")? {
            config.retry.max_retries = retries;
        }
        if let Some(delay) = parse_var(&lookup, "DOCCHAIN_RETRY_DELAY_MS")? {
            config.retry.base_delay_ms = delay;
        }
        if let Some(timeout) = parse_var(&lookup, "DOCCHAIN_STAGE_TIMEOUT_SECS")? {
            config.stage_timeout_secs = Some(timeout);
        }
        if let Some(interrupt) = parse_var(&lookup, "DOCCHAIN_INTERRUPT_IN_FLIGHT")? {
            config.interrupt_in_flight = interrupt;
        }
        if let Some(concurrency) = parse_var(&lookup, "DOCCHAIN_BATCH_CONCURRENCY")? {
            config.batch_concurrency = concurrency;
        }

        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("Environment variable '{key}' has invalid value '{raw}'"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ExecutorConfig::default();
        assert_eq!(config.model_id, "claude-3-haiku-20240307");
        assert_eq!(config.max_output_tokens, 4000);
        assert_eq!(config.retry.max_retries, 1);
        assert!(config.stage_timeout().is_none());
        assert!(!config.interrupt_in_flight);
        assert_eq!(config.batch_concurrency, 4);
    }

    #[test]
    fn test_builder() {
        let config = ExecutorConfig::new()
            .with_model("claude-3-opus-20240229")
            .with_stage_timeout_secs(30)
            .with_retry(RetryPolicy::no_retry())
            .with_interrupt_in_flight(true);

        assert_eq!(config.model_id, "claude-3-opus-20240229");
        assert_eq!(config.stage_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_retries, 0);
        assert!(config.interrupt_in_flight);
    }

    #[test]
    fn test_deserialize_partial() {
        let config: ExecutorConfig =
            serde_json::from_value(serde_json::json!({"max_output_tokens": 1000})).unwrap();
        assert_eq!(config.max_output_tokens, 1000);
        assert_eq!(config.model_id, default_model_id());
    }

    #[test]
    fn test_from_lookup() {
        let config = ExecutorConfig::from_lookup(lookup(&[
            ("DOCCHAIN_MODEL_ID", "claude-3-sonnet-20240229"),
            ("DOCCHAIN_MAX_RETRIES", "3"),
            ("DOCCHAIN_STAGE_TIMEOUT_SECS", "120"),
            ("DOCCHAIN_INTERRUPT_IN_FLIGHT", "true"),
        ]))
        .unwrap();

        assert_eq!(config.model_id, "claude-3-sonnet-20240229");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.stage_timeout_secs, Some(120));
        assert!(config.interrupt_in_flight);
        assert_eq!(config.batch_concurrency, 4);
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = ExecutorConfig::from_lookup(lookup(&[("DOCCHAIN_MAX_OUTPUT_TOKENS", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("DOCCHAIN_MAX_OUTPUT_TOKENS"));
    }
}
