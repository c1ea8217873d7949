//! Pipeline builder with validation.

use super::StageGraph;
use crate::contracts::{ContractRegistry, SchemaContract};
use crate::errors::{codes, ContractErrorInfo, CycleDetectedError, DocchainError, PipelineValidationError};
use crate::stages::StageDefinition;
use std::sync::Arc;

/// Builder for creating validated pipelines.
///
/// Stages are added in definition order and may only bind stages added
/// before them. The full graph checks run again in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Contracts available to the stages.
    registry: Arc<ContractRegistry>,
    /// Stage definitions in insertion order.
    stages: Vec<StageDefinition>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder over `registry`.
    #[must_use]
    pub fn new(name: impl Into<String>, registry: Arc<ContractRegistry>) -> Self {
        Self {
            name: name.into(),
            registry,
            stages: Vec::new(),
        }
    }

    /// Registers a contract with the builder's registry.
    ///
    /// # Errors
    ///
    /// Returns an error if the contract is malformed or conflicts with an
    /// existing one.
    pub fn contract(self, contract: SchemaContract) -> Result<Self, DocchainError> {
        self.registry.register(contract)?;
        Ok(self)
    }

    /// Adds a stage to the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails (unknown or later stage, cycle, etc.)
    pub fn stage(mut self, definition: StageDefinition) -> Result<Self, DocchainError> {
        self.add_stage(definition)?;
        Ok(self)
    }

    /// Adds a stage definition.
    ///
    /// # Errors
    ///
    /// Returns an error if validation fails.
    pub fn add_stage(&mut self, definition: StageDefinition) -> Result<(), DocchainError> {
        definition.validate()?;

        if self.stages.iter().any(|s| s.name == definition.name) {
            return Err(PipelineValidationError::coded(
                codes::DUPLICATE_STAGE,
                format!("Stage '{}' is defined more than once", definition.name),
            )
            .with_stages(vec![definition.name.clone()])
            .into());
        }

        let mut referenced = definition.dependencies();
        referenced.extend(definition.supersedes().iter().map(|s| s.artifact.as_str()));
        for dep in referenced {
            if dep == definition.name {
                return Err(CycleDetectedError::new(vec![dep.to_string(), dep.to_string()]).into());
            }
            if !self.stages.iter().any(|s| s.name == dep) {
                return Err(PipelineValidationError::new(format!(
                    "Stage '{}' references stage '{}' which is not defined before it",
                    definition.name, dep
                ))
                .with_stages(vec![definition.name.clone(), dep.to_string()])
                .with_error_info(
                    ContractErrorInfo::new(codes::ORDER, format!("Dependency '{dep}' not yet defined"))
                        .with_context_entry("stage", definition.name.as_str())
                        .with_default_hint(),
                )
                .into());
            }
        }

        self.stages.push(definition);
        Ok(())
    }

    /// Builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the builder has no stages or the graph fails
    /// validation.
    pub fn build(self) -> Result<StageGraph, DocchainError> {
        StageGraph::from_definitions(self.name, self.stages, self.registry)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::SchemaField;

    fn builder() -> PipelineBuilder {
        PipelineBuilder::new("test", Arc::new(ContractRegistry::new()))
            .contract(SchemaContract::new("Note").field(SchemaField::text("text")))
            .unwrap()
    }

    fn code(err: DocchainError) -> String {
        match err {
            DocchainError::Definition(e) => e.code().unwrap_or_default().to_string(),
            DocchainError::CyclicDependency(e) => e.error_info.code,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_builder_creation() {
        let builder = builder();
        assert_eq!(builder.name(), "test");
        assert_eq!(builder.stage_count(), 0);
    }

    #[test]
    fn test_builder_with_dependencies() {
        let graph = builder()
            .stage(StageDefinition::new("stage1", "Note").bind_input("topic"))
            .unwrap()
            .stage(StageDefinition::new("stage2", "Note").bind_artifact("stage1"))
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(graph.stage_count(), 2);
        assert_eq!(graph.execution_order(), vec!["stage1", "stage2"]);
    }

    #[test]
    fn test_builder_rejects_reference_to_later_stage() {
        let err = builder()
            .stage(StageDefinition::new("b", "Note").bind_artifact("a"))
            .unwrap_err();

        assert_eq!(code(err), codes::ORDER);
    }

    #[test]
    fn test_builder_self_reference_is_cycle() {
        let err = builder()
            .stage(StageDefinition::new("a", "Note").bind_artifact("a"))
            .unwrap_err();

        assert_eq!(code(err), codes::CYCLE);
    }

    #[test]
    fn test_builder_duplicate_stage() {
        let err = builder()
            .stage(StageDefinition::new("a", "Note"))
            .unwrap()
            .stage(StageDefinition::new("a", "Note"))
            .unwrap_err();

        assert_eq!(code(err), codes::DUPLICATE_STAGE);
    }

    #[test]
    fn test_builder_empty_build() {
        let err = builder().build().unwrap_err();
        assert_eq!(code(err), codes::EMPTY);
    }

    #[test]
    fn test_builder_contract_conflict() {
        let err = builder()
            .contract(SchemaContract::new("Note").field(SchemaField::text("other")))
            .unwrap_err();
        assert_eq!(code(err), codes::CONTRACT_CONFLICT);
    }
}
