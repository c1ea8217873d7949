//! Job information extraction.
//!
//! Five independent stages read the same job description and each extract
//! one facet: skills, business mission, role value, industry and an MVP idea.

use crate::contracts::{ContractRecord, ContractRegistry, FieldKind, SchemaContract, SchemaField};
use crate::errors::DocchainError;
use crate::pipeline::{CombinedResult, Executor, PipelineBuilder, PipelineInputs, StageGraph};
use crate::stages::StageDefinition;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the job information pipeline.
pub const PIPELINE_NAME: &str = "job_information";

/// Input key holding the job description.
pub const JOB_DESCRIPTION: &str = "job_description";

/// Allowed values of [`JobSkill::skill_type`].
pub const SKILL_TYPES: [&str; 3] = ["SOFT SKILL", "TECHNICAL", "BUSINESS"];

/// One skill mentioned by a job description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSkill {
    /// One of [`SKILL_TYPES`].
    pub skill_type: String,
    /// Name of the skill.
    pub skill_name: String,
    /// Sentence where the skill was found.
    pub reference: String,
}

impl ContractRecord for JobSkill {
    const CONTRACT: &'static str = "JobSkill";
}

/// Skills extracted from a job description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSkills {
    /// The extracted skills.
    pub job_skills: Vec<JobSkill>,
}

impl ContractRecord for JobSkills {
    const CONTRACT: &'static str = "JobSkills";
}

/// The company's goal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessMission {
    /// The goal.
    pub company_goal: String,
    /// Where the goal was found or inferred from.
    pub goal_reference: String,
}

impl ContractRecord for BusinessMission {
    const CONTRACT: &'static str = "BusinessMission";
}

/// Value the role brings to the company.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleValue {
    /// The value.
    pub role_value: String,
    /// Where the value was found or inferred from.
    pub value_reference: String,
}

impl ContractRecord for RoleValue {
    const CONTRACT: &'static str = "RoleValue";
}

/// Industry the business operates in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Industry {
    /// The industry.
    pub industry: String,
}

impl ContractRecord for Industry {
    const CONTRACT: &'static str = "Industry";
}

/// MVP a candidate could build for the posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvpIdea {
    /// The idea.
    pub idea: String,
}

impl ContractRecord for MvpIdea {
    const CONTRACT: &'static str = "MvpIdea";
}

/// Typed view of a completed job information run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct JobInformation {
    pub job_skills: JobSkills,
    pub business_mission: BusinessMission,
    pub role_value: RoleValue,
    pub industry: Industry,
    pub mvp: MvpIdea,
}

impl JobInformation {
    /// Decodes every artifact of a job information run.
    ///
    /// # Errors
    ///
    /// Returns [`DocchainError::Decode`] when an artifact is missing or
    /// malformed.
    pub fn from_combined(result: &CombinedResult) -> Result<Self, DocchainError> {
        Ok(Self {
            job_skills: result.decode("job_skills")?,
            business_mission: result.decode("business_mission")?,
            role_value: result.decode("role_value")?,
            industry: result.decode("industry")?,
            mvp: result.decode("mvp")?,
        })
    }
}

/// Contracts used by the pipeline, `JobSkill` before the list that holds it.
#[must_use]
pub fn contracts() -> Vec<SchemaContract> {
    vec![
        SchemaContract::new("JobSkill")
            .field(SchemaField::choice("skill_type", SKILL_TYPES).describe("Type of skill"))
            .field(SchemaField::text("skill_name").describe("Name of the skill"))
            .field(
                SchemaField::text("reference")
                    .describe("Sentence or paragraph where this skill was found in the text"),
            ),
        SchemaContract::new("JobSkills").field(
            SchemaField::list("job_skills", FieldKind::record("JobSkill"))
                .describe("Skills found in the job description"),
        ),
        SchemaContract::new("BusinessMission")
            .field(SchemaField::text("company_goal").describe("Goal of the company"))
            .field(
                SchemaField::text("goal_reference")
                    .describe("Sentence or paragraph the goal was taken or inferred from"),
            ),
        SchemaContract::new("RoleValue")
            .field(
                SchemaField::text("role_value")
                    .describe("Value the role would provide to the company if hired"),
            )
            .field(
                SchemaField::text("value_reference")
                    .describe("Sentence or paragraph the value was taken or inferred from"),
            ),
        SchemaContract::new("Industry").field(
            SchemaField::text("industry").describe("Industry the business operates in"),
        ),
        SchemaContract::new("MvpIdea")
            .field(SchemaField::text("idea").describe("MVP idea a candidate could build")),
    ]
}

/// Stage definitions; each binds only the job description.
#[must_use]
pub fn stage_definitions() -> Vec<StageDefinition> {
    let stage = |name: &str, contract: &str, intent: &str| {
        StageDefinition::new(name, contract)
            .intent(intent)
            .bind_input(JOB_DESCRIPTION)
    };
    vec![
        stage("job_skills", "JobSkills", "Extract skills from the job description."),
        stage(
            "business_mission",
            "BusinessMission",
            "Extract or infer the goal of the company.",
        ),
        stage(
            "role_value",
            "RoleValue",
            "Extract or infer the value the role would provide to the company if hired.",
        ),
        stage(
            "industry",
            "Industry",
            "Infer the industry the business operates in based on the job description.",
        ),
        stage(
            "mvp",
            "MvpIdea",
            "Generate an MVP idea that a candidate could build based on the job description.",
        ),
    ]
}

/// Registers the contracts with `registry` and resolves the stage graph.
///
/// # Errors
///
/// Fails when a contract conflicts with one already registered.
pub fn build_pipeline(registry: Arc<ContractRegistry>) -> Result<StageGraph, DocchainError> {
    let mut builder = PipelineBuilder::new(PIPELINE_NAME, registry);
    for contract in contracts() {
        builder = builder.contract(contract)?;
    }
    for stage in stage_definitions() {
        builder.add_stage(stage)?;
    }
    builder.build()
}

/// Extracts job information from one description.
///
/// # Errors
///
/// Returns the error of the failing stage.
pub async fn run_job_info(
    executor: &Executor,
    job_description: &str,
) -> Result<JobInformation, DocchainError> {
    let graph = build_pipeline(Arc::new(ContractRegistry::new()))?;
    let inputs = PipelineInputs::new().with(JOB_DESCRIPTION, job_description);
    let combined = executor.run(&graph, inputs).await?;
    JobInformation::from_combined(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExecutorConfig;
    use crate::testing::ScriptedBackend;
    use pretty_assertions::assert_eq;

    const SKILLS: &str = r#"{"job_skills": [
        {"skill_type": "TECHNICAL", "skill_name": "Rust", "reference": "Rust required"},
        {"skill_type": "SOFT SKILL", "skill_name": "Writing", "reference": "clear writer"}
    ]}"#;

    fn backend(skills: &str) -> ScriptedBackend {
        ScriptedBackend::new()
            .respond("job_skills", skills)
            .respond(
                "business_mission",
                r#"{"company_goal": "ship tools", "goal_reference": "we ship"}"#,
            )
            .respond(
                "role_value",
                r#"{"role_value": "faster releases", "value_reference": "speed"}"#,
            )
            .respond("industry", r#"{"industry": "software"}"#)
            .respond("mvp", r#"{"idea": "a release dashboard"}"#)
    }

    #[test]
    fn test_stages_are_independent() {
        let graph = build_pipeline(Arc::new(ContractRegistry::new())).unwrap();
        assert_eq!(graph.stage_count(), 5);
        for stage in graph.execution_order() {
            assert!(graph.dependencies_of(stage).is_empty());
        }
        assert_eq!(
            graph.required_inputs().into_iter().collect::<Vec<_>>(),
            vec![JOB_DESCRIPTION]
        );
    }

    #[tokio::test]
    async fn test_run_job_info_decodes_every_facet() {
        let backend = Arc::new(backend(SKILLS));
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let info = run_job_info(&executor, "We need Rust.").await.unwrap();

        assert_eq!(info.job_skills.job_skills.len(), 2);
        assert_eq!(info.job_skills.job_skills[0].skill_name, "Rust");
        assert_eq!(info.industry.industry, "software");
        assert_eq!(info.mvp.idea, "a release dashboard");
        assert_eq!(backend.call_count(), 5);
    }

    #[tokio::test]
    async fn test_unknown_skill_type_fails_the_run() {
        let backend = Arc::new(backend(
            r#"{"job_skills": [{"skill_type": "HOBBY", "skill_name": "x", "reference": "y"}]}"#,
        ));
        let executor = Executor::new(backend.clone(), ExecutorConfig::default());

        let err = run_job_info(&executor, "posting").await.unwrap_err();
        assert!(matches!(
            err,
            DocchainError::GenerationContractFailure(ref failure) if failure.stage == "job_skills"
        ));
        assert_eq!(backend.calls_for("industry"), 0);
    }
}
