//! Stage definitions.
//!
//! A stage is one unit of generation work: an intent string, a set of named
//! parameters bound to values, and the contract its output must satisfy.
//! Stages carry no behavior of their own; the executor interprets them.

mod result;

pub use result::StageResult;

use crate::errors::{codes, PipelineValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// Where a stage parameter takes its value from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum InputBinding {
    /// A caller-supplied initial input.
    Input {
        /// Initial input key.
        key: String,
    },
    /// A constant.
    Literal {
        /// The constant value.
        value: Value,
    },
    /// The current value of another stage's artifact, following revisions.
    Artifact {
        /// Producing stage.
        stage: String,
        /// Field of the artifact, or the whole record when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
    /// The original output of another stage, ignoring revisions.
    Original {
        /// Producing stage.
        stage: String,
        /// Field of the output, or the whole record when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },
}

impl InputBinding {
    /// Binds a caller-supplied initial input.
    #[must_use]
    pub fn input(key: impl Into<String>) -> Self {
        Self::Input { key: key.into() }
    }

    /// Binds a constant.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Binds the whole current artifact of `stage`.
    #[must_use]
    pub fn artifact(stage: impl Into<String>) -> Self {
        Self::Artifact {
            stage: stage.into(),
            field: None,
        }
    }

    /// Binds one field of the current artifact of `stage`.
    ///
    /// A field the artifact does not carry, such as an omitted optional
    /// field, binds as `null`. The stage-started event lists such params
    /// under `null_inputs`.
    #[must_use]
    pub fn artifact_field(stage: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Artifact {
            stage: stage.into(),
            field: Some(field.into()),
        }
    }

    /// Binds the whole original output of `stage`.
    #[must_use]
    pub fn original(stage: impl Into<String>) -> Self {
        Self::Original {
            stage: stage.into(),
            field: None,
        }
    }

    /// Binds one field of the original output of `stage`.
    ///
    /// An absent field binds as `null`, as with
    /// [`artifact_field`](Self::artifact_field).
    #[must_use]
    pub fn original_field(stage: impl Into<String>, field: impl Into<String>) -> Self {
        Self::Original {
            stage: stage.into(),
            field: Some(field.into()),
        }
    }

    /// The stage this binding depends on, if any.
    #[must_use]
    pub fn referenced_stage(&self) -> Option<&str> {
        match self {
            Self::Artifact { stage, .. } | Self::Original { stage, .. } => Some(stage),
            Self::Input { .. } | Self::Literal { .. } => None,
        }
    }

    /// The referenced field, if the binding selects one.
    #[must_use]
    pub fn referenced_field(&self) -> Option<&str> {
        match self {
            Self::Artifact { field, .. } | Self::Original { field, .. } => field.as_deref(),
            Self::Input { .. } | Self::Literal { .. } => None,
        }
    }
}

/// A named stage parameter and its binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageParam {
    /// Parameter name as presented to the backend.
    pub name: String,
    /// Value source.
    pub binding: InputBinding,
}

/// One artifact replaced by a revision stage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Supersession {
    /// The stage whose artifact is superseded.
    pub artifact: String,
    /// The revision output field holding the replacement.
    pub field: String,
}

/// What a stage does with its output.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageKind {
    /// Produces a new artifact.
    #[default]
    Generate,
    /// Produces a new artifact and supersedes earlier ones.
    Revise {
        /// Artifacts replaced by fields of this stage's output.
        supersedes: Vec<Supersession>,
    },
}

/// Declarative description of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageDefinition {
    /// Unique stage name, also the name of its artifact.
    pub name: String,
    /// Parameters in declaration order.
    pub params: Vec<StageParam>,
    /// Generation instruction.
    pub intent: String,
    /// Output contract name.
    pub output_contract: String,
    /// Stage kind.
    #[serde(default)]
    pub kind: StageKind,
}

impl StageDefinition {
    /// Creates a generate stage with no parameters.
    #[must_use]
    pub fn new(name: impl Into<String>, output_contract: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            intent: String::new(),
            output_contract: output_contract.into(),
            kind: StageKind::Generate,
        }
    }

    /// Sets the generation instruction.
    #[must_use]
    pub fn intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = intent.into();
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn bind(mut self, param: impl Into<String>, binding: InputBinding) -> Self {
        self.params.push(StageParam {
            name: param.into(),
            binding,
        });
        self
    }

    /// Adds a parameter bound to the initial input of the same name.
    #[must_use]
    pub fn bind_input(self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.bind(key.clone(), InputBinding::input(key))
    }

    /// Adds a parameter bound to the whole current artifact of the same name.
    #[must_use]
    pub fn bind_artifact(self, stage: impl Into<String>) -> Self {
        let stage = stage.into();
        self.bind(stage.clone(), InputBinding::artifact(stage))
    }

    /// Marks this stage as revising `artifact` with its output field `field`.
    #[must_use]
    pub fn revises(mut self, artifact: impl Into<String>, field: impl Into<String>) -> Self {
        let entry = Supersession {
            artifact: artifact.into(),
            field: field.into(),
        };
        match &mut self.kind {
            StageKind::Revise { supersedes } => supersedes.push(entry),
            StageKind::Generate => {
                self.kind = StageKind::Revise {
                    supersedes: vec![entry],
                };
            }
        }
        self
    }

    /// Returns true for revision stages.
    #[must_use]
    pub fn is_revision(&self) -> bool {
        matches!(self.kind, StageKind::Revise { .. })
    }

    /// Artifacts superseded by this stage.
    #[must_use]
    pub fn supersedes(&self) -> &[Supersession] {
        match &self.kind {
            StageKind::Revise { supersedes } => supersedes,
            StageKind::Generate => &[],
        }
    }

    /// Stages referenced by bindings, deduplicated in first-use order.
    #[must_use]
    pub fn dependencies(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.params
            .iter()
            .filter_map(|p| p.binding.referenced_stage())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Initial input keys referenced by bindings.
    #[must_use]
    pub fn input_keys(&self) -> Vec<&str> {
        self.params
            .iter()
            .filter_map(|p| match &p.binding {
                InputBinding::Input { key } => Some(key.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Checks the definition in isolation, without looking at other stages.
    ///
    /// # Errors
    ///
    /// Returns an `INVALID_STAGE` error for empty names, duplicate parameters,
    /// or duplicated supersession entries.
    pub fn validate(&self) -> Result<(), PipelineValidationError> {
        let invalid = |message: String| {
            PipelineValidationError::coded(codes::INVALID_STAGE, message)
                .with_stages(vec![self.name.clone()])
        };

        if self.name.trim().is_empty() {
            return Err(PipelineValidationError::coded(
                codes::INVALID_STAGE,
                "Stage name cannot be empty",
            ));
        }
        if self.output_contract.trim().is_empty() {
            return Err(invalid(format!(
                "Stage '{}' does not declare an output contract",
                self.name
            )));
        }

        let mut params = HashSet::new();
        for param in &self.params {
            if !params.insert(param.name.as_str()) {
                return Err(invalid(format!(
                    "Stage '{}' declares parameter '{}' more than once",
                    self.name, param.name
                )));
            }
        }

        let mut artifacts = HashSet::new();
        let mut fields = HashSet::new();
        for entry in self.supersedes() {
            if entry.artifact == self.name {
                return Err(invalid(format!(
                    "Revision stage '{}' cannot supersede its own artifact",
                    self.name
                )));
            }
            if !artifacts.insert(entry.artifact.as_str()) || !fields.insert(entry.field.as_str()) {
                return Err(invalid(format!(
                    "Revision stage '{}' lists artifact '{}' or field '{}' more than once",
                    self.name, entry.artifact, entry.field
                )));
            }
        }
        Ok(())
    }
}
