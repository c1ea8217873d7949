//! Sequential stage execution.

use super::assemble::{finalize, CombinedResult};
use super::dag::StageGraph;
use super::run::{PipelineInputs, PipelineRun, RunStatus};
use crate::backend::{GenerationAdapter, GenerationBackend};
use crate::cancellation::CancellationToken;
use crate::config::ExecutorConfig;
use crate::errors::DocchainError;
use crate::events::{EventKind, EventSink, NoOpEventSink, RunEvent};
use crate::observability::TraceSink;
use crate::stages::StageDefinition;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Runs stage graphs against a generation backend.
///
/// Stages of one run execute strictly one after another. An executor is
/// cheap to clone and may drive many runs at once; they share the backend,
/// trace sink and event sink.
#[derive(Clone)]
pub struct Executor {
    adapter: GenerationAdapter,
    events: Arc<dyn EventSink>,
}

impl Executor {
    /// Creates an executor with no-op tracing and events.
    #[must_use]
    pub fn new(backend: Arc<dyn GenerationBackend>, config: ExecutorConfig) -> Self {
        Self {
            adapter: GenerationAdapter::new(backend, config),
            events: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the trace sink used around backend calls.
    #[must_use]
    pub fn with_tracer(mut self, tracer: Arc<dyn TraceSink>) -> Self {
        self.adapter = self.adapter.with_tracer(tracer);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.adapter = self.adapter.with_events(Arc::clone(&events));
        self.events = events;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        self.adapter.config()
    }

    /// Executes `graph` to a terminal run.
    pub async fn execute(&self, graph: &StageGraph, inputs: PipelineInputs) -> PipelineRun {
        self.execute_with_cancel(graph, inputs, &CancellationToken::new())
            .await
    }

    /// Executes `graph`, checking `token` before every stage.
    ///
    /// With `interrupt_in_flight` set, a cancellation also aborts the backend
    /// call in progress. Otherwise the current stage finishes first.
    pub async fn execute_with_cancel(
        &self,
        graph: &StageGraph,
        inputs: PipelineInputs,
        token: &CancellationToken,
    ) -> PipelineRun {
        let mut run = PipelineRun::new(graph.name(), inputs);
        let run_id = run.run_id();

        info!(pipeline = graph.name(), %run_id, stages = graph.stage_count(), "Pipeline started");
        self.emit(
            EventKind::PipelineStarted,
            &run,
            None,
            json!({ "stages": graph.execution_order() }),
        );

        if let Err(err) = check_inputs(graph, &run) {
            self.fail(&mut run, err);
            return run;
        }

        for stage in graph.stages() {
            if token.is_cancelled() {
                self.cancel(&mut run, token, &stage.name);
                return run;
            }

            let bound = match bind_inputs(&run, stage) {
                Ok(bound) => bound,
                Err(err) => {
                    self.fail(&mut run, err);
                    return run;
                }
            };

            let null_inputs: Vec<&str> = bound
                .iter()
                .filter(|(_, value)| value.is_null())
                .map(|(name, _)| name.as_str())
                .collect();
            debug!(pipeline = graph.name(), stage = %stage.name, ?null_inputs, "Dispatching stage");
            self.emit(
                EventKind::StageStarted,
                &run,
                Some(stage.name.as_str()),
                json!({ "null_inputs": null_inputs }),
            );

            let registry = graph.registry();
            let outcome = if self.config().interrupt_in_flight {
                tokio::select! {
                    result = self.adapter.invoke(registry, run_id, graph.name(), stage, bound) => Some(result),
                    () = token.cancelled() => None,
                }
            } else {
                Some(self.adapter.invoke(registry, run_id, graph.name(), stage, bound).await)
            };

            match outcome {
                None => {
                    self.cancel(&mut run, token, &stage.name);
                    return run;
                }
                Some(Err(err)) => {
                    self.emit(
                        EventKind::StageFailed,
                        &run,
                        Some(stage.name.as_str()),
                        json!({ "error": err.to_string() }),
                    );
                    self.fail(&mut run, err);
                    return run;
                }
                Some(Ok(result)) => {
                    self.emit(
                        EventKind::StageCompleted,
                        &run,
                        Some(stage.name.as_str()),
                        json!({
                            "attempts": result.attempts,
                            "duration_ms": result.duration_ms(),
                        }),
                    );
                    for entry in run.record(result, stage.supersedes()) {
                        self.emit(
                            EventKind::ArtifactSuperseded,
                            &run,
                            Some(stage.name.as_str()),
                            json!({
                                "artifact": entry.artifact,
                                "field": entry.field,
                            }),
                        );
                    }
                }
            }
        }

        run.complete();
        info!(pipeline = graph.name(), %run_id, "Pipeline completed");
        self.emit(
            EventKind::PipelineCompleted,
            &run,
            None,
            json!({ "stages": run.results().len() }),
        );
        run
    }

    /// Executes `graph` and assembles the combined result.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing stage, or
    /// [`DocchainError::Cancelled`].
    pub async fn run(
        &self,
        graph: &StageGraph,
        inputs: PipelineInputs,
    ) -> Result<CombinedResult, DocchainError> {
        self.run_with_cancel(graph, inputs, &CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run), observing `token`.
    ///
    /// # Errors
    ///
    /// See [`run`](Self::run).
    pub async fn run_with_cancel(
        &self,
        graph: &StageGraph,
        inputs: PipelineInputs,
        token: &CancellationToken,
    ) -> Result<CombinedResult, DocchainError> {
        let run = self.execute_with_cancel(graph, inputs, token).await;
        match run.status() {
            RunStatus::Failed(err) => Err(err.clone()),
            RunStatus::Cancelled(reason) => Err(DocchainError::Cancelled {
                reason: reason.clone(),
            }),
            RunStatus::Running | RunStatus::Completed => finalize(&run),
        }
    }

    /// Runs `graph` once per input set, at most `batch_concurrency` at a time.
    ///
    /// Results are returned in input order.
    pub async fn run_batch(
        &self,
        graph: &StageGraph,
        batch: Vec<PipelineInputs>,
    ) -> Vec<Result<CombinedResult, DocchainError>> {
        let limit = self.config().batch_concurrency.max(1);
        stream::iter(batch)
            .map(|inputs| self.run(graph, inputs))
            .buffered(limit)
            .collect()
            .await
    }

    fn emit(&self, kind: EventKind, run: &PipelineRun, stage: Option<&str>, data: Value) {
        let mut event = RunEvent::new(kind, run.run_id(), run.pipeline()).with_data(data);
        event.stage = stage.map(str::to_string);
        self.events.try_emit(event);
    }

    fn fail(&self, run: &mut PipelineRun, err: DocchainError) {
        warn!(
            pipeline = run.pipeline(),
            run_id = %run.run_id(),
            stage = err.stage().unwrap_or("-"),
            error = %err,
            "Pipeline failed"
        );
        self.emit(
            EventKind::PipelineFailed,
            run,
            err.stage(),
            json!({ "error": err.to_string() }),
        );
        run.fail(err);
    }

    fn cancel(&self, run: &mut PipelineRun, token: &CancellationToken, next_stage: &str) {
        let reason = token.reason().unwrap_or_else(|| "cancelled".to_string());
        info!(pipeline = run.pipeline(), stage = next_stage, %reason, "Pipeline cancelled");
        self.emit(
            EventKind::PipelineCancelled,
            run,
            Some(next_stage),
            json!({ "reason": reason }),
        );
        run.cancel(reason);
    }
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("adapter", &self.adapter)
            .finish_non_exhaustive()
    }
}

fn check_inputs(graph: &StageGraph, run: &PipelineRun) -> Result<(), DocchainError> {
    for stage in graph.stages() {
        if let Some(key) = stage.input_keys().into_iter().find(|k| !run.inputs().contains(k)) {
            return Err(DocchainError::MissingInput {
                stage: stage.name.clone(),
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn bind_inputs(
    run: &PipelineRun,
    stage: &StageDefinition,
) -> Result<Vec<(String, Value)>, DocchainError> {
    stage
        .params
        .iter()
        .map(|param| Ok((param.name.clone(), run.resolve(&stage.name, &param.binding)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ContractRegistry, SchemaContract, SchemaField};
    use crate::events::CollectingEventSink;
    use crate::stages::InputBinding;
    use crate::testing::ScriptedBackend;
    use pretty_assertions::assert_eq;

    fn graph() -> StageGraph {
        let registry = ContractRegistry::new();
        registry
            .register(SchemaContract::new("Note").field(SchemaField::text("text")))
            .unwrap();
        StageGraph::from_definitions(
            "notes",
            vec![
                StageDefinition::new("draft", "Note").bind_input("topic"),
                StageDefinition::new("polish", "Note").bind_artifact("draft"),
            ],
            Arc::new(registry),
        )
        .unwrap()
    }

    fn backend() -> Arc<ScriptedBackend> {
        Arc::new(
            ScriptedBackend::new()
                .respond("draft", r#"{"text": "first"}"#)
                .respond("polish", r#"{"text": "second"}"#),
        )
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        let events = Arc::new(CollectingEventSink::new());
        let executor =
            Executor::new(backend(), ExecutorConfig::default()).with_events(events.clone());

        let run = executor
            .execute(&graph(), PipelineInputs::new().with("topic", "rust"))
            .await;

        assert!(run.is_completed());
        assert_eq!(
            events.event_types(),
            vec![
                "pipeline.started",
                "stage.started",
                "stage.completed",
                "stage.started",
                "stage.completed",
                "pipeline.completed",
            ]
        );
        let started = &events.events()[1];
        assert_eq!(started.pipeline, "notes");
        assert_eq!(started.stage.as_deref(), Some("draft"));
        assert_eq!(started.run_id, run.run_id());
        assert_eq!(started.get("null_inputs"), Some(&json!([])));
        assert!(events.events().iter().all(|e| e.run_id == run.run_id()));
    }

    #[tokio::test]
    async fn test_missing_input_fails_before_any_call() {
        let backend = backend();
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let err = executor.run(&graph(), PipelineInputs::new()).await.unwrap_err();

        assert!(matches!(
            err,
            DocchainError::MissingInput { ref stage, ref key } if stage == "draft" && key == "topic"
        ));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_stage_failure_halts_run() {
        let backend = Arc::new(ScriptedBackend::new().respond("draft", "no json here"));
        let events = Arc::new(CollectingEventSink::new());
        let executor = Executor::new(backend.clone(), ExecutorConfig::default())
            .with_events(events.clone());

        let run = executor
            .execute(&graph(), PipelineInputs::new().with("topic", "rust"))
            .await;

        assert!(matches!(run.error(), Some(DocchainError::GenerationContractFailure(_))));
        assert!(run.results().is_empty());
        assert_eq!(backend.calls_for("polish"), 0);
        assert_eq!(events.of_kind(EventKind::StageRetrying).len(), 1);
        let failed = events.of_kind(EventKind::PipelineFailed);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].stage.as_deref(), Some("draft"));
        assert!(failed[0].get("error").is_some());
    }

    #[tokio::test]
    async fn test_run_passes_current_artifact_forward() {
        let backend = backend();
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let combined = executor
            .run(&graph(), PipelineInputs::new().with("topic", "rust"))
            .await
            .unwrap();

        assert_eq!(combined.value("polish"), Some(&json!({"text": "second"})));
        let polish = &backend.requests_for("polish")[0];
        assert_eq!(polish.input("draft"), Some(&json!({"text": "first"})));
    }

    #[tokio::test]
    async fn test_stage_started_lists_null_inputs() {
        let registry = ContractRegistry::new();
        registry
            .register(
                SchemaContract::new("Draft")
                    .field(SchemaField::text("text"))
                    .field(SchemaField::text("summary").optional()),
            )
            .unwrap();
        let graph = StageGraph::from_definitions(
            "drafts",
            vec![
                StageDefinition::new("draft", "Draft").bind_input("topic"),
                StageDefinition::new("review", "Draft")
                    .bind("text", InputBinding::artifact_field("draft", "text"))
                    .bind("summary", InputBinding::artifact_field("draft", "summary")),
            ],
            Arc::new(registry),
        )
        .unwrap();
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("draft", r#"{"text": "first"}"#)
                .respond("review", r#"{"text": "second"}"#),
        );
        let events = Arc::new(CollectingEventSink::new());
        let executor = Executor::new(backend.clone(), ExecutorConfig::default())
            .with_events(events.clone());

        let run = executor
            .execute(&graph, PipelineInputs::new().with("topic", "rust"))
            .await;

        assert!(run.is_completed());
        let started: Vec<_> = events
            .of_kind(EventKind::StageStarted)
            .into_iter()
            .filter(|e| e.stage.as_deref() == Some("review"))
            .collect();
        assert_eq!(started[0].get("null_inputs"), Some(&json!(["summary"])));
        assert_eq!(backend.requests_for("review")[0].input("summary"), Some(&Value::Null));
    }
}
