//! Small ready-made graphs for tests and benchmarks.

use serde_json::{json, Value};
use std::sync::Arc;

use super::FnBackend;
use crate::backend::GenerationRequest;
use crate::contracts::{ContractRegistry, SchemaContract, SchemaField};
use crate::errors::DocchainError;
use crate::pipeline::StageGraph;
use crate::stages::StageDefinition;

/// Registry with `Text {text}` and `TextRevision {a: Text, b: Text}`.
pub fn text_registry() -> Result<Arc<ContractRegistry>, DocchainError> {
    let registry = ContractRegistry::new();
    registry
        .register_all([
            SchemaContract::new("Text").field(SchemaField::text("text")),
            SchemaContract::new("TextRevision")
                .field(SchemaField::record("a", "Text"))
                .field(SchemaField::record("b", "Text")),
        ])?;
    Ok(Arc::new(registry))
}

/// Three stages: `a`, then `b` binding `a`, then revision `c` binding both
/// and superseding both.
pub fn revision_graph() -> Result<StageGraph, DocchainError> {
    StageGraph::from_definitions(
        "revision",
        vec![
            StageDefinition::new("a", "Text").intent("Write a first text"),
            StageDefinition::new("b", "Text")
                .intent("Extend the text")
                .bind_artifact("a"),
            StageDefinition::new("c", "TextRevision")
                .intent("Revise both texts")
                .bind_artifact("a")
                .bind_artifact("b")
                .revises("a", "a")
                .revises("b", "b"),
        ],
        text_registry()?,
    )
}

/// Deterministic backend for [`revision_graph`].
///
/// `a` writes `x`, `b` appends `y` to `a`, `c` upper-cases both.
#[must_use]
pub fn revision_backend() -> FnBackend {
    FnBackend::json(|request: &GenerationRequest| match request.stage.as_str() {
        "a" => json!({"text": "x"}),
        "b" => json!({"text": format!("{}y", text_of(request, "a"))}),
        "c" => json!({
            "a": {"text": text_of(request, "a").to_uppercase()},
            "b": {"text": text_of(request, "b").to_uppercase()},
        }),
        _ => Value::Null,
    })
}

fn text_of(request: &GenerationRequest, input: &str) -> String {
    request
        .input(input)
        .and_then(|v| v.get("text"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
