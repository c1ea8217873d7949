//! End-to-end tests for pipeline building and execution.

#[cfg(test)]
mod tests {
    use crate::backend::GenerationRequest;
    use crate::cancellation::CancellationToken;
    use crate::config::ExecutorConfig;
    use crate::contracts::{validate, ContractRegistry, SchemaContract, SchemaField};
    use crate::errors::{codes, DocchainError};
    use crate::observability::CollectingTraceSink;
    use crate::pipeline::{
        Executor, PipelineBuilder, PipelineInputs, RetryPolicy, RunStatus, StageGraph,
    };
    use crate::stages::{InputBinding, StageDefinition};
    use crate::testing::{
        revision_backend, revision_graph, text_registry, FailingTraceSink, FnBackend,
        ScriptedBackend,
    };
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn definition_code(err: &DocchainError) -> Option<&str> {
        match err {
            DocchainError::Definition(e) => e.code(),
            DocchainError::CyclicDependency(e) => Some(e.error_info.code.as_str()),
            _ => None,
        }
    }

    fn topic_graph() -> StageGraph {
        PipelineBuilder::new("topic", text_registry().unwrap())
            .stage(StageDefinition::new("a", "Text").bind_input("topic"))
            .unwrap()
            .stage(StageDefinition::new("b", "Text").bind_artifact("a"))
            .unwrap()
            .build()
            .unwrap()
    }

    #[test]
    fn test_every_stage_runs_after_its_references() {
        let registry = text_registry().unwrap();
        let graph = PipelineBuilder::new("wide", registry)
            .stage(StageDefinition::new("s1", "Text"))
            .unwrap()
            .stage(StageDefinition::new("s2", "Text"))
            .unwrap()
            .stage(StageDefinition::new("s3", "Text").bind_artifact("s2"))
            .unwrap()
            .stage(
                StageDefinition::new("s4", "Text")
                    .bind_artifact("s1")
                    .bind("s3_text", InputBinding::artifact_field("s3", "text")),
            )
            .unwrap()
            .stage(
                StageDefinition::new("rev", "TextRevision")
                    .bind_artifact("s1")
                    .bind_artifact("s4")
                    .revises("s1", "a")
                    .revises("s4", "b"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("s5", "Text")
                    .bind_artifact("s1")
                    .bind("raw", InputBinding::original("s4")),
            )
            .unwrap()
            .build()
            .unwrap();

        let order = graph.execution_order();
        assert_eq!(order.len(), 6);
        for stage in &order {
            let position = order.iter().position(|s| s == stage).unwrap();
            for dep in graph.dependencies_of(stage) {
                let dep_position = order.iter().position(|s| *s == dep).unwrap();
                assert!(dep_position < position, "{dep} must run before {stage}");
            }
        }
        assert!(graph.dependencies_of("s5").contains(&"rev"));
    }

    #[tokio::test]
    async fn test_cycle_fails_before_any_backend_call() {
        let backend = Arc::new(ScriptedBackend::new().respond("a", r#"{"text": "x"}"#));
        let _executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let err = StageGraph::from_definitions(
            "cyclic",
            vec![
                StageDefinition::new("a", "Text").bind_artifact("c"),
                StageDefinition::new("b", "Text").bind_artifact("a"),
                StageDefinition::new("c", "Text").bind_artifact("b"),
            ],
            text_registry().unwrap(),
        )
        .unwrap_err();

        let DocchainError::CyclicDependency(cycle) = &err else {
            panic!("expected a cycle, got {err:?}");
        };
        let mut stages = cycle.stages();
        stages.sort_unstable();
        assert_eq!(stages, vec!["a", "b", "c"]);
        assert!(err.is_definition_error());
        assert_eq!(backend.call_count(), 0);
    }

    #[test]
    fn test_record_validates_against_own_contract() {
        let registry = text_registry().unwrap();
        let value = json!({"a": {"text": "one"}, "b": {"text": "two"}});

        let record = validate(&registry, "TextRevision", &value).unwrap();
        let again = validate(&registry, "TextRevision", record.value()).unwrap();

        assert_eq!(record, again);
    }

    #[tokio::test]
    async fn test_revision_supersedes_without_destroying() {
        let executor = Executor::new(Arc::new(revision_backend()), ExecutorConfig::default());
        let graph = revision_graph().unwrap();

        let run = executor.execute(&graph, PipelineInputs::new()).await;

        assert!(run.is_completed());
        assert_eq!(run.original("a").unwrap().value(), &json!({"text": "x"}));
        assert_eq!(run.original("b").unwrap().value(), &json!({"text": "xy"}));
        assert_eq!(run.current("a"), Some(&json!({"text": "X"})));
        assert_eq!(run.current("b"), Some(&json!({"text": "XY"})));
        assert_eq!(run.revised_by("a"), Some("c"));
    }

    #[tokio::test]
    async fn test_combined_result_holds_revised_artifacts() {
        let executor = Executor::new(Arc::new(revision_backend()), ExecutorConfig::default());
        let combined = executor
            .run(&revision_graph().unwrap(), PipelineInputs::new())
            .await
            .unwrap();

        let names: Vec<&str> = combined.artifacts().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let revised_a = combined.value("c").unwrap()["a"].clone();
        assert_eq!(combined.value("a"), Some(&revised_a));
        assert_ne!(combined.value("a"), Some(&json!({"text": "x"})));
        assert_eq!(combined.artifact("b").unwrap().revised_by.as_deref(), Some("c"));
    }

    #[tokio::test]
    async fn test_later_stage_reads_revised_artifact() {
        let registry = text_registry().unwrap();
        let graph = PipelineBuilder::new("after", registry)
            .stage(StageDefinition::new("a", "Text"))
            .unwrap()
            .stage(StageDefinition::new("b", "Text").bind_artifact("a"))
            .unwrap()
            .stage(
                StageDefinition::new("c", "TextRevision")
                    .bind_artifact("a")
                    .bind_artifact("b")
                    .revises("a", "a"),
            )
            .unwrap()
            .stage(
                StageDefinition::new("d", "Text")
                    .bind("current", InputBinding::artifact_field("a", "text"))
                    .bind("first", InputBinding::original_field("a", "text")),
            )
            .unwrap()
            .build()
            .unwrap();

        let backend = Arc::new(FnBackend::json(|req: &GenerationRequest| {
            match req.stage.as_str() {
                "d" => json!({"text": format!("{}|{}", req.input("current").unwrap(), req.input("first").unwrap())}),
                _ => revision_like(req),
            }
        }));
        let executor = Executor::new(backend, ExecutorConfig::default());
        let combined = executor.run(&graph, PipelineInputs::new()).await.unwrap();

        assert_eq!(combined.value("d"), Some(&json!({"text": "\"X\"|\"x\""})));
        assert!(combined.artifact("b").unwrap().revised_by.is_none());
    }

    fn revision_like(req: &GenerationRequest) -> serde_json::Value {
        match req.stage.as_str() {
            "a" => json!({"text": "x"}),
            "b" => json!({"text": "xy"}),
            _ => json!({"a": {"text": "X"}, "b": {"text": "XY"}}),
        }
    }

    #[tokio::test]
    async fn test_out_of_order_definition_rejected_at_build_time() {
        let backend = Arc::new(ScriptedBackend::new());
        let _executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let err = PipelineBuilder::new("ordered", text_registry().unwrap())
            .stage(StageDefinition::new("b", "Text").bind_artifact("a"))
            .unwrap_err();
        assert_eq!(definition_code(&err), Some(codes::ORDER));

        let err = StageGraph::from_definitions(
            "ordered",
            vec![
                StageDefinition::new("b", "Text").bind_artifact("a"),
                StageDefinition::new("a", "Text"),
            ],
            text_registry().unwrap(),
        )
        .unwrap_err();
        assert_eq!(definition_code(&err), Some(codes::ORDER));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_field_twice_aborts_with_contract_failure() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("a", r#"{"body": "no text field"}"#)
                .respond("b", r#"{"text": "never reached"}"#),
        );
        let executor = Executor::new(
            backend.clone(),
            ExecutorConfig::default().with_retry(RetryPolicy::new().with_max_retries(1)),
        );

        let err = executor
            .run(&topic_graph(), PipelineInputs::new().with("topic", "rust"))
            .await
            .unwrap_err();

        let DocchainError::GenerationContractFailure(failure) = err else {
            panic!("expected contract failure, got {err:?}");
        };
        assert_eq!(failure.stage, "a");
        assert_eq!(failure.attempts, 2);
        assert_eq!(failure.violation.path, "text");
        assert_eq!(backend.calls_for("a"), 2);
        assert_eq!(backend.calls_for("b"), 0);
    }

    #[tokio::test]
    async fn test_identical_runs_are_byte_identical() {
        let executor = Executor::new(Arc::new(revision_backend()), ExecutorConfig::default());
        let graph = revision_graph().unwrap();

        let first = executor.run(&graph, PipelineInputs::new()).await.unwrap();
        let second = executor.run(&graph, PipelineInputs::new()).await.unwrap();

        assert_eq!(first.to_json(), second.to_json());
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let backend = Arc::new(ScriptedBackend::new().respond("a", r#"{"text": "x"}"#));
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());
        let token = CancellationToken::new();
        token.cancel("user aborted");

        let err = executor
            .run_with_cancel(&topic_graph(), PipelineInputs::new().with("topic", "t"), &token)
            .await
            .unwrap_err();

        assert!(matches!(err, DocchainError::Cancelled { ref reason } if reason == "user aborted"));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_cancel_lets_in_flight_stage_finish() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("a", r#"{"text": "x"}"#)
                .respond("b", r#"{"text": "y"}"#)
                .with_delay(Duration::from_millis(200)),
        );
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());
        let token = CancellationToken::new();
        let graph = topic_graph();

        let (run, ()) = tokio::join!(
            executor.execute_with_cancel(&graph, PipelineInputs::new().with("topic", "t"), &token),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel("stop");
            }
        );

        assert!(matches!(run.status(), RunStatus::Cancelled(reason) if reason == "stop"));
        assert_eq!(run.results().len(), 1);
        assert_eq!(backend.calls_for("b"), 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_in_flight_call() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("a", r#"{"text": "x"}"#)
                .with_delay(Duration::from_secs(30)),
        );
        let tracer = Arc::new(CollectingTraceSink::new());
        let executor = Executor::new(
            backend.clone(),
            ExecutorConfig::default().with_interrupt_in_flight(true),
        )
        .with_tracer(tracer.clone());
        let token = CancellationToken::new();
        let graph = topic_graph();

        let (run, ()) = tokio::join!(
            executor.execute_with_cancel(&graph, PipelineInputs::new().with("topic", "t"), &token),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                token.cancel("stop");
            }
        );

        assert!(matches!(run.status(), RunStatus::Cancelled(_)));
        assert!(run.results().is_empty());
        assert_eq!(tracer.spans_for("a").len(), 1);
        assert_eq!(tracer.open_count(), 0);
    }

    #[tokio::test]
    async fn test_stage_timeout_fails_run() {
        let backend = Arc::new(
            ScriptedBackend::new()
                .respond("a", r#"{"text": "x"}"#)
                .with_delay(Duration::from_secs(30)),
        );
        let tracer = Arc::new(CollectingTraceSink::new());
        let executor = Executor::new(backend, ExecutorConfig::default().with_stage_timeout_secs(1))
            .with_tracer(tracer.clone());

        let err = executor
            .run(&topic_graph(), PipelineInputs::new().with("topic", "t"))
            .await
            .unwrap_err();

        assert!(matches!(err, DocchainError::StageTimeout { ref stage, .. } if stage == "a"));
        assert_eq!(tracer.open_count(), 0);
        assert!(tracer.spans()[0].record.as_ref().unwrap().error.is_some());
    }

    #[tokio::test]
    async fn test_batch_preserves_input_order() {
        let backend = Arc::new(FnBackend::json(|req: &GenerationRequest| {
            let topic = req
                .input("topic")
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .or_else(|| req.input("a").map(|a| a["text"].to_string()))
                .unwrap_or_default();
            json!({"text": topic})
        }));
        let executor = Executor::new(
            backend.clone(),
            ExecutorConfig::default().with_batch_concurrency(2),
        );

        let results = executor
            .run_batch(
                &topic_graph(),
                vec![
                    PipelineInputs::new().with("topic", "one"),
                    PipelineInputs::new(),
                    PipelineInputs::new().with("topic", "three"),
                ],
            )
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().value("a"), Some(&json!({"text": "one"})));
        assert!(matches!(results[1], Err(DocchainError::MissingInput { .. })));
        assert_eq!(results[2].as_ref().unwrap().value("a"), Some(&json!({"text": "three"})));
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_spans_cover_every_backend_call() {
        let tracer = Arc::new(CollectingTraceSink::new());
        let executor = Executor::new(Arc::new(revision_backend()), ExecutorConfig::default())
            .with_tracer(tracer.clone());

        executor
            .run(&revision_graph().unwrap(), PipelineInputs::new())
            .await
            .unwrap();

        assert_eq!(tracer.spans().len(), 3);
        assert_eq!(tracer.open_count(), 0);
        assert_eq!(tracer.spans_for("c").len(), 1);
    }

    #[tokio::test]
    async fn test_failing_tracer_never_aborts_run() {
        let executor = Executor::new(Arc::new(revision_backend()), ExecutorConfig::default())
            .with_tracer(Arc::new(FailingTraceSink));

        let result = executor
            .run(&revision_graph().unwrap(), PipelineInputs::new())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_nested_contract_in_stage_output() {
        let registry = Arc::new(ContractRegistry::new());
        let graph = PipelineBuilder::new("nested", registry)
            .contract(SchemaContract::new("Step").field(SchemaField::text("title")))
            .unwrap()
            .contract(
                SchemaContract::new("Plan")
                    .field(SchemaField::text("goal"))
                    .field(SchemaField::list("steps", crate::contracts::FieldKind::record("Step"))),
            )
            .unwrap()
            .stage(StageDefinition::new("plan", "Plan").bind("goal", InputBinding::literal("ship")))
            .unwrap()
            .build()
            .unwrap();

        let backend = Arc::new(ScriptedBackend::new().respond(
            "plan",
            "Here you go:\n```json\n{\"goal\": \"ship\", \"steps\": [{\"title\": \"build\"}, {\"title\": 2}]}\n```",
        ));
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());
        let combined = executor.run(&graph, PipelineInputs::new()).await.unwrap();

        assert_eq!(combined.value("plan").unwrap()["steps"][1]["title"], "2");
        assert_eq!(backend.requests()[0].input("goal"), Some(&json!("ship")));
    }
}
