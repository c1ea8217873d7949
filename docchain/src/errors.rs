//! Error types for the docchain engine.
//!
//! Definition-time problems (unknown stages, cycles, malformed contracts) are
//! reported before any backend call. Run-time problems carry the stage and
//! contract that failed so a run never has to be replayed to diagnose it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for docchain operations.
#[derive(Debug, Clone, Error)]
pub enum DocchainError {
    /// A stage graph or contract definition is malformed.
    #[error("{0}")]
    Definition(#[from] PipelineValidationError),

    /// The stage graph contains a reference cycle.
    #[error("{0}")]
    CyclicDependency(#[from] CycleDetectedError),

    /// A value does not conform to its declared contract.
    #[error("{0}")]
    SchemaViolation(#[from] SchemaViolation),

    /// A stage exhausted its validation retries.
    #[error("{0}")]
    GenerationContractFailure(#[from] GenerationContractFailure),

    /// The generation backend itself failed or was unreachable.
    #[error("Backend unavailable for stage '{stage}': {message}")]
    BackendUnavailable {
        /// The stage being generated.
        stage: String,
        /// The backend's failure description.
        message: String,
    },

    /// A stage did not finish within the configured timeout.
    #[error("Stage '{stage}' timed out after {timeout_ms}ms")]
    StageTimeout {
        /// The stage that timed out.
        stage: String,
        /// The timeout that elapsed.
        timeout_ms: u64,
    },

    /// A stage binds an initial input the caller did not supply.
    #[error("Stage '{stage}' requires initial input '{key}' which was not supplied")]
    MissingInput {
        /// The stage declaring the binding.
        stage: String,
        /// The missing input key.
        key: String,
    },

    /// `finalize` was called on a run that did not complete.
    #[error("Pipeline '{pipeline}' is incomplete (status: {status})")]
    IncompletePipeline {
        /// The pipeline name.
        pipeline: String,
        /// The run status at the time of the call.
        status: String,
    },

    /// The run was cancelled by the caller.
    #[error("Pipeline cancelled: {reason}")]
    Cancelled {
        /// The cancellation reason.
        reason: String,
    },

    /// A completed artifact could not be decoded into its typed view.
    #[error("Artifact '{artifact}' could not be decoded: {message}")]
    Decode {
        /// The artifact name.
        artifact: String,
        /// The decoding failure.
        message: String,
    },
}

impl DocchainError {
    /// Returns the stage this error is attributed to, if any.
    #[must_use]
    pub fn stage(&self) -> Option<&str> {
        match self {
            Self::GenerationContractFailure(err) => Some(&err.stage),
            Self::BackendUnavailable { stage, .. }
            | Self::StageTimeout { stage, .. }
            | Self::MissingInput { stage, .. } => Some(stage),
            Self::Definition(err) => err.stages.first().map(String::as_str),
            _ => None,
        }
    }

    /// Returns true for errors raised while building a graph, before execution.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(self, Self::Definition(_) | Self::CyclicDependency(_))
    }
}

/// Metadata about a contract error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONTRACT-004-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Falls back to the catalogued suggestion for this code.
    #[must_use]
    pub fn with_default_hint(self) -> Self {
        match ContractSuggestions::get(&self.code) {
            Some(hint) if self.fix_hint.is_none() => self.with_fix_hint(hint),
            _ => self,
        }
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a pipeline or contract definition is invalid.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PipelineValidationError {
    /// The error message.
    pub message: String,
    /// The stages involved in the error.
    pub stages: Vec<String>,
    /// Optional contract error info.
    pub error_info: Option<ContractErrorInfo>,
}

impl PipelineValidationError {
    /// Creates a new pipeline validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stages: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the stages involved.
    #[must_use]
    pub fn with_stages(mut self, stages: Vec<String>) -> Self {
        self.stages = stages;
        self
    }

    /// Sets the contract error info.
    #[must_use]
    pub fn with_error_info(mut self, info: ContractErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Shorthand for an error with a catalogued code.
    #[must_use]
    pub fn coded(code: &str, message: impl Into<String>) -> Self {
        let message = message.into();
        let info = ContractErrorInfo::new(code, message.clone()).with_default_hint();
        Self::new(message).with_error_info(info)
    }

    /// Returns the error code, if one was attached.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when a cycle is detected in the stage graph.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of stages forming the cycle, first stage repeated at the end.
    pub cycle_path: Vec<String>,
    /// Contract error info.
    pub error_info: ContractErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let info = ContractErrorInfo::new(
            codes::CYCLE,
            format!("Pipeline contains a dependency cycle: {}", cycle_path.join(" -> ")),
        )
        .with_default_hint();

        Self {
            cycle_path,
            error_info: info,
        }
    }

    /// Returns the distinct stages participating in the cycle.
    #[must_use]
    pub fn stages(&self) -> Vec<&str> {
        let mut stages: Vec<&str> = self.cycle_path.iter().map(String::as_str).collect();
        if stages.len() > 1 && stages.first() == stages.last() {
            stages.pop();
        }
        stages
    }
}

/// A value failed validation against a contract.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Schema violation in contract '{contract}' at '{path}': {message}")]
pub struct SchemaViolation {
    /// The root contract being validated.
    pub contract: String,
    /// Dotted path of the offending field (`$` for the root).
    pub path: String,
    /// What was wrong.
    pub message: String,
}

impl SchemaViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        contract: impl Into<String>,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            contract: contract.into(),
            path: path.into(),
            message: message.into(),
        }
    }
}

/// A stage could not produce a conforming output within its retry bound.
#[derive(Debug, Clone, Error)]
#[error(
    "Stage '{stage}' failed contract '{contract}' after {attempts} attempt(s): {violation}"
)]
pub struct GenerationContractFailure {
    /// The failing stage.
    pub stage: String,
    /// The stage's output contract.
    pub contract: String,
    /// Number of backend calls made.
    pub attempts: usize,
    /// The raw backend output of the last attempt.
    pub last_raw_output: String,
    /// The violation from the last attempt.
    pub violation: SchemaViolation,
}

/// Stable error codes attached to definition errors.
pub mod codes {
    /// Dependency cycle.
    pub const CYCLE: &str = "CONTRACT-004-CYCLE";
    /// Reference to a stage that does not exist.
    pub const MISSING_DEP: &str = "CONTRACT-004-MISSING_DEP";
    /// Reference to a stage that is defined later.
    pub const ORDER: &str = "CONTRACT-004-ORDER";
    /// Two stages share a name.
    pub const DUPLICATE_STAGE: &str = "CONTRACT-004-DUPLICATE";
    /// No stages.
    pub const EMPTY: &str = "CONTRACT-004-EMPTY";
    /// Malformed stage definition.
    pub const INVALID_STAGE: &str = "CONTRACT-004-INVALID";
    /// A binding names a field the referenced contract lacks.
    pub const UNKNOWN_FIELD: &str = "CONTRACT-004-UNKNOWN_FIELD";
    /// Reference to an unregistered contract.
    pub const UNKNOWN_CONTRACT: &str = "CONTRACT-005-UNKNOWN_CONTRACT";
    /// Malformed contract.
    pub const INVALID_CONTRACT: &str = "CONTRACT-005-INVALID";
    /// Contract re-registered with a different shape.
    pub const CONTRACT_CONFLICT: &str = "CONTRACT-005-CONFLICT";
    /// Revision output does not mirror the revised artifact.
    pub const REVISION_SHAPE: &str = "CONTRACT-006-REVISION";
}

/// Provides default suggestions for common contract error codes.
pub struct ContractSuggestions;

impl ContractSuggestions {
    /// Gets a suggestion for a given error code.
    #[must_use]
    pub fn get(code: &str) -> Option<&'static str> {
        match code {
            codes::CYCLE => Some(
                "Check your stage bindings for circular references. \
                 A stage may only bind outputs of stages that run before it.",
            ),
            codes::MISSING_DEP => Some(
                "Ensure all bindings reference stages that exist in the pipeline. \
                 Check for typos in stage names.",
            ),
            codes::ORDER => {
                Some("Define the referenced stage before the stage that binds its output.")
            }
            codes::DUPLICATE_STAGE => Some("Give every stage a unique name."),
            codes::EMPTY => Some("Add at least one stage to the pipeline before building."),
            codes::UNKNOWN_FIELD => {
                Some("Bind only fields declared by the referenced stage's output contract.")
            }
            codes::UNKNOWN_CONTRACT => Some(
                "Register the contract before referencing it. Nested contracts must be \
                 registered before the contracts that embed them.",
            ),
            codes::CONTRACT_CONFLICT => {
                Some("Rename one of the contracts or make the definitions identical.")
            }
            codes::REVISION_SHAPE => Some(
                "A revision field must be a record of the same contract as the artifact it \
                 supersedes.",
            ),
            _ => None,
        }
    }
}
