//! Final assembly of a completed run.

use super::run::{PipelineRun, RunStatus};
use crate::contracts::{decode_value, ContractRecord};
use crate::errors::DocchainError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};

/// The current value of one artifact in a combined result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Artifact (stage) name.
    pub name: String,
    /// Contract the value conforms to.
    pub contract: String,
    /// The revision stage that superseded the original, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_by: Option<String>,
    /// The current value.
    pub value: Value,
}

/// Immutable aggregate of every artifact's current value.
///
/// Contains no run id or timestamps, so identical stage outputs give an
/// identical result and fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombinedResult {
    pipeline: String,
    artifacts: Vec<Artifact>,
}

impl CombinedResult {
    /// The pipeline name.
    #[must_use]
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    /// Artifacts in execution order.
    #[must_use]
    pub fn artifacts(&self) -> &[Artifact] {
        &self.artifacts
    }

    /// Looks up an artifact by name.
    #[must_use]
    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }

    /// The current value of an artifact.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.artifact(name).map(|a| &a.value)
    }

    /// Decodes an artifact into the type mirroring its contract.
    ///
    /// # Errors
    ///
    /// Returns [`DocchainError::Decode`] when the artifact is absent, belongs
    /// to another contract, or does not fit `T`.
    pub fn decode<T: ContractRecord>(&self, name: &str) -> Result<T, DocchainError> {
        let decode_error = |message: String| DocchainError::Decode {
            artifact: name.to_string(),
            message,
        };
        let artifact = self
            .artifact(name)
            .ok_or_else(|| decode_error("artifact not present in result".to_string()))?;
        if artifact.contract != T::CONTRACT {
            return Err(decode_error(format!(
                "artifact conforms to '{}', expected '{}'",
                artifact.contract,
                T::CONTRACT
            )));
        }
        decode_value(name, &artifact.value)
    }

    /// Canonical JSON form. Object keys are sorted, so the output is
    /// byte-stable for equal results.
    #[must_use]
    pub fn to_json(&self) -> String {
        let artifacts: Vec<Value> = self
            .artifacts
            .iter()
            .map(|a| {
                json!({
                    "name": a.name,
                    "contract": a.contract,
                    "revised_by": a.revised_by,
                    "value": a.value,
                })
            })
            .collect();
        json!({ "pipeline": self.pipeline, "artifacts": artifacts }).to_string()
    }

    /// SHA-256 hex digest of [`to_json`](Self::to_json).
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.to_json().as_bytes()))
    }
}

/// Assembles the combined result of a completed run.
///
/// # Errors
///
/// Returns [`DocchainError::IncompletePipeline`] unless the run completed.
pub fn finalize(run: &PipelineRun) -> Result<CombinedResult, DocchainError> {
    if !matches!(run.status(), RunStatus::Completed) {
        return Err(DocchainError::IncompletePipeline {
            pipeline: run.pipeline().to_string(),
            status: run.status().label().to_string(),
        });
    }

    let artifacts = run
        .results()
        .iter()
        .map(|result| Artifact {
            name: result.stage.clone(),
            contract: result.record.contract().to_string(),
            revised_by: run.revised_by(&result.stage).map(str::to_string),
            value: run
                .current(&result.stage)
                .cloned()
                .unwrap_or_else(|| result.value().clone()),
        })
        .collect();

    Ok(CombinedResult {
        pipeline: run.pipeline().to_string(),
        artifacts,
    })
}
