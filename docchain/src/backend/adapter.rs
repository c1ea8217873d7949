//! Turns bound stage inputs into a validated stage result.

use super::{BackendError, GenerationBackend, GenerationRequest, GenerationResponse, Usage};
use crate::config::ExecutorConfig;
use crate::contracts::{coerce_raw_output, validate, ContractRegistry};
use crate::errors::{DocchainError, GenerationContractFailure};
use crate::events::{EventKind, EventSink, NoOpEventSink, RunEvent};
use crate::observability::{NoOpTraceSink, SpanHandle, SpanRecord, SpanTimer, TraceSink};
use crate::pipeline::{should_retry, RetryDecision, RetryState};
use crate::stages::{StageDefinition, StageResult};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// The single seam between the engine and the generation backend.
///
/// Owns coercion, validation and the retry loop for contract violations.
/// Backend errors are not retried.
#[derive(Clone)]
pub struct GenerationAdapter {
    backend: Arc<dyn GenerationBackend>,
    config: Arc<ExecutorConfig>,
    tracer: Arc<dyn TraceSink>,
    events: Arc<dyn EventSink>,
}

impl GenerationAdapter {
    /// Creates an adapter with no-op tracing and events.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerationBackend>, config: ExecutorConfig) -> Self {
        Self {
            backend,
            config: Arc::new(config),
            tracer: Arc::new(NoOpTraceSink),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the trace sink.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn TraceSink>) -> Self {
        self.tracer = tracer;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Generates and validates the output of `stage`.
    ///
    /// `registry` must hold the stage's output contract and every contract it
    /// nests. The configured stage timeout covers every attempt.
    ///
    /// # Errors
    ///
    /// - [`DocchainError::GenerationContractFailure`] when retries are exhausted
    /// - [`DocchainError::BackendUnavailable`] when the backend fails
    /// - [`DocchainError::StageTimeout`] when the timeout elapses
    pub async fn invoke(
        &self,
        registry: &ContractRegistry,
        run_id: Uuid,
        pipeline: &str,
        stage: &StageDefinition,
        inputs: Vec<(String, Value)>,
    ) -> Result<StageResult, DocchainError> {
        let attempts = self.generate_validated(registry, run_id, pipeline, stage, inputs);
        let Some(limit) = self.config.stage_timeout() else {
            return attempts.await;
        };

        tokio::time::timeout(limit, attempts)
            .await
            .map_err(|_| DocchainError::StageTimeout {
                stage: stage.name.clone(),
                timeout_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            })?
    }

    async fn generate_validated(
        &self,
        registry: &ContractRegistry,
        run_id: Uuid,
        pipeline: &str,
        stage: &StageDefinition,
        inputs: Vec<(String, Value)>,
    ) -> Result<StageResult, DocchainError> {
        let contract = stage.output_contract.as_str();
        let descriptor = registry.descriptor(contract)?;
        let input_echo = Value::Object(inputs.iter().cloned().collect());
        let started_at = Utc::now();

        let mut request = GenerationRequest {
            run_id,
            stage: stage.name.clone(),
            model_id: self.config.model_id.clone(),
            intent: stage.intent.clone(),
            inputs,
            output_contract: contract.to_string(),
            contract_descriptor: descriptor,
            max_output_tokens: self.config.max_output_tokens,
            attempt: 1,
        };
        let mut state = RetryState::new();
        let mut usage: Option<Usage> = None;

        loop {
            let response = self.call_backend(&request, &input_echo).await?;
            if let Some(reported) = response.usage {
                usage = Some(usage.map_or(reported, |total| total.saturating_add(reported)));
            }

            let outcome = coerce_raw_output(contract, &response.text)
                .and_then(|value| validate(registry, contract, &value));

            let violation = match outcome {
                Ok(record) => {
                    return Ok(StageResult {
                        stage: stage.name.clone(),
                        record,
                        model_id: response.model.unwrap_or_else(|| request.model_id.clone()),
                        raw_output: response.text,
                        usage,
                        attempts: request.attempt,
                        started_at,
                        ended_at: Utc::now(),
                    });
                }
                Err(violation) => violation,
            };

            match should_retry(&mut state, &self.config.retry) {
                RetryDecision::Retry(delay) => {
                    debug!(
                        stage = %stage.name,
                        attempt = request.attempt,
                        path = %violation.path,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        "Output violated contract, retrying"
                    );
                    self.events.try_emit(
                        RunEvent::new(EventKind::StageRetrying, run_id, pipeline)
                            .with_stage(stage.name.as_str())
                            .with_data(json!({
                                "attempt": request.attempt,
                                "path": violation.path,
                                "message": violation.message,
                            })),
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    request.attempt += 1;
                }
                RetryDecision::GiveUp => {
                    return Err(GenerationContractFailure {
                        stage: stage.name.clone(),
                        contract: contract.to_string(),
                        attempts: request.attempt,
                        last_raw_output: response.text,
                        violation,
                    }
                    .into());
                }
            }
        }
    }

    async fn call_backend(
        &self,
        request: &GenerationRequest,
        input_echo: &Value,
    ) -> Result<GenerationResponse, DocchainError> {
        let span = OpenSpan::begin(self.tracer.as_ref(), request, input_echo);
        let result = self.backend.generate(request).await;
        span.close(&result);

        result.map_err(|e| DocchainError::BackendUnavailable {
            stage: request.stage.clone(),
            message: e.to_string(),
        })
    }
}

/// A trace span around one backend call.
///
/// Dropping it without [`close`](Self::close) ends the span as interrupted,
/// which happens when a timeout or cancellation drops the call future.
struct OpenSpan<'a> {
    tracer: &'a dyn TraceSink,
    handle: Option<SpanHandle>,
    stage: String,
    model_id: String,
    input_echo: Value,
    timer: SpanTimer,
}

impl<'a> OpenSpan<'a> {
    fn begin(tracer: &'a dyn TraceSink, request: &GenerationRequest, input_echo: &Value) -> Self {
        let handle = match tracer.begin_span(request.run_id, &request.stage) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(stage = %request.stage, error = %e, "Failed to begin trace span");
                None
            }
        };
        Self {
            tracer,
            handle,
            stage: request.stage.clone(),
            model_id: request.model_id.clone(),
            input_echo: input_echo.clone(),
            timer: SpanTimer::start(&request.stage),
        }
    }

    fn close(mut self, result: &Result<GenerationResponse, BackendError>) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let record = match result {
            Ok(response) => SpanRecord {
                output: response.text.clone(),
                usage: response.usage,
                model_id: response
                    .model
                    .clone()
                    .unwrap_or_else(|| self.model_id.clone()),
                ..self.record(None)
            },
            Err(e) => self.record(Some(e.to_string())),
        };
        self.end(handle, record);
    }

    fn record(&self, error: Option<String>) -> SpanRecord {
        SpanRecord {
            output: String::new(),
            input_echo: self.input_echo.clone(),
            usage: None,
            model_id: self.model_id.clone(),
            error,
            duration_ms: self.timer.elapsed_ms(),
        }
    }

    fn end(&self, handle: SpanHandle, record: SpanRecord) {
        if let Err(e) = self.tracer.end_span(handle, record) {
            warn!(stage = %self.stage, error = %e, "Failed to end trace span");
        }
    }
}

impl Drop for OpenSpan<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let record = self.record(Some(INTERRUPTED.to_string()));
            self.end(handle, record);
        }
    }
}

/// Error recorded on spans whose call was dropped before it returned.
const INTERRUPTED: &str = "interrupted before the backend responded";

impl std::fmt::Debug for GenerationAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationAdapter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockGenerationBackend;
    use crate::contracts::{SchemaContract, SchemaField};
    use crate::events::CollectingEventSink;
    use crate::observability::CollectingTraceSink;
    use crate::pipeline::RetryPolicy;
    use crate::testing::FailingTraceSink;
    use std::time::Duration;

    const PIPELINE: &str = "proposal_document";

    fn registry() -> ContractRegistry {
        let registry = ContractRegistry::new();
        registry
            .register(
                SchemaContract::new("Proposal")
                    .field(SchemaField::text("scratch_pad"))
                    .field(SchemaField::text("proposal")),
            )
            .unwrap();
        registry
    }

    fn stage() -> StageDefinition {
        StageDefinition::new("proposal", "Proposal").intent("Generate a proposal")
    }

    fn inputs() -> Vec<(String, Value)> {
        vec![("job_posting".to_string(), json!("posting"))]
    }

    const VALID: &str = r#"{"scratch_pad": "s", "proposal": "p"}"#;
    const MISSING: &str = r#"{"scratch_pad": "s"}"#;

    #[tokio::test]
    async fn test_valid_first_attempt() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .withf(|req| req.attempt == 1 && req.max_output_tokens == 4000)
            .times(1)
            .returning(|_| Ok(GenerationResponse::new(VALID).with_usage(Usage::new(7, 3))));

        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default());
        let result = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap();

        assert_eq!(result.attempts, 1);
        assert_eq!(result.field("proposal"), Some(&json!("p")));
        assert_eq!(result.usage, Some(Usage::new(7, 3)));
        assert_eq!(result.model_id, "claude-3-haiku-20240307");
    }

    #[tokio::test]
    async fn test_retry_then_success_sums_usage() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(2)
            .returning(|req| {
                let text = if req.attempt == 1 { MISSING } else { VALID };
                Ok(GenerationResponse::new(text).with_usage(Usage::new(10, 1)))
            });

        let events = Arc::new(CollectingEventSink::new());
        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default())
            .with_events(events.clone());
        let result = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap();

        assert_eq!(result.attempts, 2);
        assert!(result.was_retried());
        assert_eq!(result.usage, Some(Usage::new(20, 2)));
        let retries = events.of_kind(EventKind::StageRetrying);
        assert_eq!(retries.len(), 1);
        assert_eq!(retries[0].pipeline, PIPELINE);
        assert_eq!(retries[0].stage.as_deref(), Some("proposal"));
        assert_eq!(retries[0].get("attempt"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_with_contract_failure() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(2)
            .returning(|_| Ok(GenerationResponse::new(MISSING)));

        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default());
        let err = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap_err();

        let DocchainError::GenerationContractFailure(failure) = err else {
            panic!("expected contract failure, got {err:?}");
        };
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.violation.path, "proposal");
        assert_eq!(failure.last_raw_output, MISSING);
    }

    #[tokio::test]
    async fn test_backend_error_is_not_retried() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(1)
            .returning(|_| Err(BackendError::Transport("connection refused".to_string())));

        let tracer = Arc::new(CollectingTraceSink::new());
        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default())
            .with_tracer(tracer.clone());
        let err = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap_err();

        assert!(matches!(err, DocchainError::BackendUnavailable { ref stage, .. } if stage == "proposal"));
        let spans = tracer.spans();
        assert_eq!(spans.len(), 1);
        assert!(spans[0].record.as_ref().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_spans_bracket_every_attempt() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(2)
            .returning(|_| Ok(GenerationResponse::new(MISSING).with_usage(Usage::new(1, 2))));

        let tracer = Arc::new(CollectingTraceSink::new());
        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default())
            .with_tracer(tracer.clone());
        let _ = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await;

        let spans = tracer.spans_for("proposal");
        assert_eq!(spans.len(), 2);
        assert_eq!(tracer.open_count(), 0);
        let record = spans[0].record.as_ref().unwrap();
        assert_eq!(record.usage, Some(Usage::new(1, 2)));
        assert_eq!(record.input_echo["job_posting"], "posting");
    }

    #[tokio::test]
    async fn test_trace_failures_are_swallowed() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .returning(|_| Ok(GenerationResponse::new(VALID)));

        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default())
            .with_tracer(Arc::new(FailingTraceSink));
        let result = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_no_retry_policy() {
        let mut mock = MockGenerationBackend::new();
        mock.expect_generate()
            .times(1)
            .returning(|_| Ok(GenerationResponse::new("not json at all")));

        let config = ExecutorConfig::default().with_retry(RetryPolicy::no_retry());
        let adapter = GenerationAdapter::new(Arc::new(mock), config);
        let err = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap_err();
        assert!(err.to_string().contains("1 attempt(s)"));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        struct Slow;

        #[async_trait::async_trait]
        impl GenerationBackend for Slow {
            async fn generate(
                &self,
                _request: &GenerationRequest,
            ) -> Result<GenerationResponse, BackendError> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(GenerationResponse::new(VALID))
            }
        }

        let tracer = Arc::new(CollectingTraceSink::new());
        let config = ExecutorConfig::default().with_stage_timeout_secs(1);
        let adapter = GenerationAdapter::new(Arc::new(Slow), config).with_tracer(tracer.clone());
        let err = adapter.invoke(&registry(), Uuid::new_v4(), PIPELINE, &stage(), inputs()).await.unwrap_err();

        assert!(matches!(err, DocchainError::StageTimeout { timeout_ms: 1000, .. }));
        assert_eq!(tracer.open_count(), 0);
        let spans = tracer.spans_for("proposal");
        assert_eq!(spans.len(), 1);
        assert_eq!(
            spans[0].record.as_ref().unwrap().error.as_deref(),
            Some(INTERRUPTED)
        );
    }

    #[tokio::test]
    async fn test_unknown_contract_is_definition_error() {
        let mock = MockGenerationBackend::new();
        let adapter = GenerationAdapter::new(Arc::new(mock), ExecutorConfig::default());
        let err = adapter
            .invoke(&registry(), Uuid::new_v4(), PIPELINE, &StageDefinition::new("x", "Nope"), Vec::new())
            .await
            .unwrap_err();
        assert!(err.is_definition_error());
    }
}
