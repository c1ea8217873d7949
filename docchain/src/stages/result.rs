//! The record of one completed stage.

use crate::backend::Usage;
use crate::contracts::ValidatedRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of a stage that passed validation.
///
/// Results are immutable once created and owned by the run that produced
/// them. Revisions never touch a result; they rebind the artifact pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageResult {
    /// Stage name.
    pub stage: String,
    /// The validated output.
    pub record: ValidatedRecord,
    /// Raw backend text of the accepted attempt.
    pub raw_output: String,
    /// Model that produced the output.
    pub model_id: String,
    /// Token usage summed over all attempts, when reported.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Number of backend calls made, including the accepted one.
    pub attempts: usize,
    /// When the first attempt started.
    pub started_at: DateTime<Utc>,
    /// When the accepted attempt was validated.
    pub ended_at: DateTime<Utc>,
}

impl StageResult {
    /// The validated output value.
    #[must_use]
    pub fn value(&self) -> &Value {
        self.record.value()
    }

    /// A top-level field of the output.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.record.field(name)
    }

    /// Returns the duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.ended_at - self.started_at).num_milliseconds()
    }

    /// Returns true if the stage needed more than one attempt.
    #[must_use]
    pub fn was_retried(&self) -> bool {
        self.attempts > 1
    }
}
