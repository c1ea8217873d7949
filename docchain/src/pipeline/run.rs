//! Run state: the append-only record of one pipeline execution.

use crate::errors::{codes, DocchainError, PipelineValidationError};
use crate::stages::{InputBinding, StageResult, Supersession};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use uuid::Uuid;

/// Caller-supplied initial inputs, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineInputs(BTreeMap<String, Value>);

impl PipelineInputs {
    /// Creates an empty input set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an input.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Inserts an input, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    /// Looks up an input.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Returns true if `key` was supplied.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of inputs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no inputs.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for PipelineInputs {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Lifecycle status of a run.
#[derive(Debug, Clone)]
pub enum RunStatus {
    /// Stages are still being dispatched.
    Running,
    /// Every stage produced a validated output.
    Completed,
    /// A stage failed; the run halted.
    Failed(DocchainError),
    /// The caller cancelled the run.
    Cancelled(String),
}

impl RunStatus {
    /// Short status label.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed(_) => "failed",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// Returns true once the run can no longer change.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ArtifactPointer {
    Original(usize),
    Revised { result: usize, field: String },
}

/// One execution of a stage graph.
///
/// Results are appended by the executor only and never modified. A revision
/// rebinds the artifact pointer instead of replacing the original result.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    run_id: Uuid,
    pipeline: String,
    inputs: PipelineInputs,
    results: Vec<StageResult>,
    by_stage: HashMap<String, usize>,
    current: HashMap<String, ArtifactPointer>,
    revised_by: HashMap<String, String>,
    status: RunStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    pub(crate) fn new(pipeline: impl Into<String>, inputs: PipelineInputs) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            inputs,
            results: Vec::new(),
            by_stage: HashMap::new(),
            current: HashMap::new(),
            revised_by: HashMap::new(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// The run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// The initial inputs.
    #[must_use]
    pub fn inputs(&self) -> &PipelineInputs {
        &self.inputs
    }

    /// Stage results in execution order.
    #[must_use]
    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    /// The run status.
    #[must_use]
    pub fn status(&self) -> &RunStatus {
        &self.status
    }

    /// Returns true if every stage completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self.status, RunStatus::Completed)
    }

    /// The failure, if the run failed.
    #[must_use]
    pub fn error(&self) -> Option<&DocchainError> {
        match &self.status {
            RunStatus::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// When the run started.
    #[must_use]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the run reached a terminal status.
    #[must_use]
    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// The never-superseded result of `stage`.
    #[must_use]
    pub fn original(&self, stage: &str) -> Option<&StageResult> {
        self.by_stage.get(stage).map(|&i| &self.results[i])
    }

    /// The current value of an artifact, following any revision.
    #[must_use]
    pub fn current(&self, stage: &str) -> Option<&Value> {
        match self.current.get(stage)? {
            ArtifactPointer::Original(i) => Some(self.results[*i].value()),
            ArtifactPointer::Revised { result, field } => self.results[*result].field(field),
        }
    }

    /// The stage whose output supersedes `stage`, if any.
    #[must_use]
    pub fn revised_by(&self, stage: &str) -> Option<&str> {
        self.revised_by.get(stage).map(String::as_str)
    }

    /// Resolves one binding against the inputs and results so far.
    ///
    /// Field bindings to a field the output lacks resolve to `null`.
    pub(crate) fn resolve(&self, stage: &str, binding: &InputBinding) -> Result<Value, DocchainError> {
        let select = |value: &Value, field: Option<&String>| match field {
            Some(name) => value.get(name).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        };

        match binding {
            InputBinding::Input { key } => {
                self.inputs
                    .get(key)
                    .cloned()
                    .ok_or_else(|| DocchainError::MissingInput {
                        stage: stage.to_string(),
                        key: key.clone(),
                    })
            }
            InputBinding::Literal { value } => Ok(value.clone()),
            InputBinding::Artifact { stage: source, field } => self
                .current(source)
                .map(|value| select(value, field.as_ref()))
                .ok_or_else(|| not_produced(stage, source)),
            InputBinding::Original { stage: source, field } => self
                .original(source)
                .map(|result| select(result.value(), field.as_ref()))
                .ok_or_else(|| not_produced(stage, source)),
        }
    }

    /// Appends a result and rebinds the artifacts it supersedes.
    ///
    /// Returns the supersessions that took effect. An optional revision field
    /// left empty keeps the original pointer.
    pub(crate) fn record(
        &mut self,
        result: StageResult,
        supersedes: &[Supersession],
    ) -> Vec<Supersession> {
        let index = self.results.len();
        let stage = result.stage.clone();

        let applied: Vec<Supersession> = supersedes
            .iter()
            .filter(|entry| result.field(&entry.field).is_some_and(|v| !v.is_null()))
            .cloned()
            .collect();

        self.results.push(result);
        self.by_stage.insert(stage.clone(), index);
        self.current.insert(stage.clone(), ArtifactPointer::Original(index));

        for entry in &applied {
            self.current.insert(
                entry.artifact.clone(),
                ArtifactPointer::Revised {
                    result: index,
                    field: entry.field.clone(),
                },
            );
            self.revised_by.insert(entry.artifact.clone(), stage.clone());
        }
        applied
    }

    pub(crate) fn complete(&mut self) {
        self.finish(RunStatus::Completed);
    }

    pub(crate) fn fail(&mut self, error: DocchainError) {
        self.finish(RunStatus::Failed(error));
    }

    pub(crate) fn cancel(&mut self, reason: impl Into<String>) {
        self.finish(RunStatus::Cancelled(reason.into()));
    }

    fn finish(&mut self, status: RunStatus) {
        if !self.status.is_terminal() {
            self.status = status;
            self.ended_at = Some(Utc::now());
        }
    }
}

fn not_produced(stage: &str, source: &str) -> DocchainError {
    PipelineValidationError::coded(
        codes::MISSING_DEP,
        format!("Stage '{stage}' binds '{source}' which has not produced output"),
    )
    .with_stages(vec![stage.to_string(), source.to_string()])
    .into()
}
