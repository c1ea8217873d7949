//! Pipeline lifecycle events.
//!
//! The executor reports progress through an [`EventSink`] as [`RunEvent`]s.
//! Every event names its run and pipeline; stage-level events also name the
//! stage. Kind-specific details travel in [`RunEvent::data`].

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Event types emitted by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run began.
    #[serde(rename = "pipeline.started")]
    PipelineStarted,
    /// A stage was dispatched.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// A stage produced a validated output.
    #[serde(rename = "stage.completed")]
    StageCompleted,
    /// A stage output violated its contract and will be regenerated.
    #[serde(rename = "stage.retrying")]
    StageRetrying,
    /// A stage failed and the run is aborting.
    #[serde(rename = "stage.failed")]
    StageFailed,
    /// A revision rebound an artifact pointer.
    #[serde(rename = "artifact.superseded")]
    ArtifactSuperseded,
    /// Every stage completed.
    #[serde(rename = "pipeline.completed")]
    PipelineCompleted,
    /// The run aborted with an error.
    #[serde(rename = "pipeline.failed")]
    PipelineFailed,
    /// The run was cancelled.
    #[serde(rename = "pipeline.cancelled")]
    PipelineCancelled,
}

impl EventKind {
    /// The wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PipelineStarted => "pipeline.started",
            Self::StageStarted => "stage.started",
            Self::StageCompleted => "stage.completed",
            Self::StageRetrying => "stage.retrying",
            Self::StageFailed => "stage.failed",
            Self::ArtifactSuperseded => "artifact.superseded",
            Self::PipelineCompleted => "pipeline.completed",
            Self::PipelineFailed => "pipeline.failed",
            Self::PipelineCancelled => "pipeline.cancelled",
        }
    }

    /// Returns true for events that end a run.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::PipelineCompleted | Self::PipelineFailed | Self::PipelineCancelled
        )
    }

    /// Returns true for events that report a failure.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::StageFailed | Self::PipelineFailed)
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lifecycle event of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    /// Event type.
    pub kind: EventKind,
    /// The run that emitted it.
    pub run_id: Uuid,
    /// Pipeline name.
    pub pipeline: String,
    /// Stage the event concerns, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    /// Kind-specific details, `null` when there are none.
    #[serde(default)]
    pub data: Value,
    /// Emission time.
    pub at: DateTime<Utc>,
}

impl RunEvent {
    /// Creates an event with no stage and no data.
    #[must_use]
    pub fn new(kind: EventKind, run_id: Uuid, pipeline: impl Into<String>) -> Self {
        Self {
            kind,
            run_id,
            pipeline: pipeline.into(),
            stage: None,
            data: Value::Null,
            at: Utc::now(),
        }
    }

    /// Sets the stage.
    #[must_use]
    pub fn with_stage(mut self, stage: impl Into<String>) -> Self {
        self.stage = Some(stage.into());
        self
    }

    /// Sets the details.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Looks up one detail field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }
}
