//! Scoring of skill extraction against job descriptions.
//!
//! Each labeled example goes through two single-stage pipelines. The
//! extraction executor pulls skills out of the description, then the grading
//! executor, usually backed by a stronger model, answers whether every
//! extracted skill actually appears in that description.

use crate::contracts::{ContractRecord, ContractRegistry, SchemaContract, SchemaField};
use crate::documents::job_info::{self, JobSkill, JobSkills, JOB_DESCRIPTION};
use crate::errors::{codes, DocchainError, PipelineValidationError};
use crate::pipeline::{Executor, PipelineBuilder, PipelineInputs, StageGraph};
use crate::stages::{InputBinding, StageDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

/// Question put to the grading model.
pub const CONTAINS_QUESTION: &str =
    "Are all of the assessed_skills contained within the job description?";

/// Answer of the grading model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentAnswer {
    /// Reasoning behind the answer.
    pub reasoning: String,
    /// `YES` or `NO`.
    pub answer: String,
}

impl AssessmentAnswer {
    /// True when the answer is `YES`.
    #[must_use]
    pub fn is_yes(&self) -> bool {
        self.answer == "YES"
    }
}

impl ContractRecord for AssessmentAnswer {
    const CONTRACT: &'static str = "AssessmentAnswer";
}

/// One job description with its reference skill labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledExample {
    /// The job description.
    pub job_description: String,
    /// Reference labels. Kept for reporting; the score does not use them.
    #[serde(default)]
    pub skills: Vec<String>,
}

impl LabeledExample {
    /// Creates an example without labels.
    #[must_use]
    pub fn new(job_description: impl Into<String>) -> Self {
        Self {
            job_description: job_description.into(),
            skills: Vec::new(),
        }
    }
}

/// Result of grading one example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeOutcome {
    /// Position of the example in the input.
    pub index: usize,
    /// Skills the extraction model produced.
    pub extracted: Vec<JobSkill>,
    /// The grading model's answer.
    pub assessment: AssessmentAnswer,
}

impl GradeOutcome {
    /// True when the grader answered `YES`.
    #[must_use]
    pub fn passed(&self) -> bool {
        self.assessment.is_yes()
    }
}

/// Aggregate over a set of examples.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeReport {
    /// Number of `YES` answers.
    pub score: usize,
    /// Number of examples graded.
    pub total: usize,
    /// Per-example outcomes in input order.
    pub outcomes: Vec<GradeOutcome>,
}

impl GradeReport {
    /// `score / total`, or 0 for an empty report.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.score as f64 / self.total as f64
        }
    }
}

impl std::fmt::Display for GradeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.score, self.total)
    }
}

/// Runs extraction and grading over labeled examples.
#[derive(Debug)]
pub struct SkillGrader {
    extractor: Executor,
    grader: Executor,
    extraction: StageGraph,
    grading: StageGraph,
}

impl SkillGrader {
    /// Creates a grader from the extraction and grading executors.
    ///
    /// # Errors
    ///
    /// Fails only if the built-in graphs do not resolve.
    pub fn new(extractor: Executor, grader: Executor) -> Result<Self, DocchainError> {
        let registry = Arc::new(ContractRegistry::new());
        Ok(Self {
            extractor,
            grader,
            extraction: extraction_graph(Arc::clone(&registry))?,
            grading: grading_graph(registry)?,
        })
    }

    /// Grades one example.
    ///
    /// # Errors
    ///
    /// Returns the error of whichever stage failed.
    pub async fn grade_one(
        &self,
        index: usize,
        example: &LabeledExample,
    ) -> Result<GradeOutcome, DocchainError> {
        let inputs = PipelineInputs::new().with(JOB_DESCRIPTION, example.job_description.as_str());
        let extracted = self
            .extractor
            .run(&self.extraction, inputs)
            .await?
            .decode::<JobSkills>("job_skills")?
            .job_skills;

        let assessed = serde_json::to_string(&extracted).map_err(|e| DocchainError::Decode {
            artifact: "job_skills".to_string(),
            message: e.to_string(),
        })?;
        let inputs = PipelineInputs::new()
            .with("assessed_skills", assessed)
            .with("assessment_job_description", example.job_description.as_str());
        let assessment = self
            .grader
            .run(&self.grading, inputs)
            .await?
            .decode::<AssessmentAnswer>("grade_skills")?;

        debug!(index, answer = %assessment.answer, skills = extracted.len(), "Graded example");
        Ok(GradeOutcome {
            index,
            extracted,
            assessment,
        })
    }

    /// Grades every example in order.
    ///
    /// # Errors
    ///
    /// Stops at the first example whose extraction or grading fails.
    pub async fn grade(&self, examples: &[LabeledExample]) -> Result<GradeReport, DocchainError> {
        let mut outcomes = Vec::with_capacity(examples.len());
        for (index, example) in examples.iter().enumerate() {
            outcomes.push(self.grade_one(index, example).await?);
        }

        let score = outcomes.iter().filter(|o| o.passed()).count();
        let report = GradeReport {
            score,
            total: outcomes.len(),
            outcomes,
        };
        info!(score = report.score, total = report.total, "Skill grading finished");
        Ok(report)
    }
}

/// The `AssessmentAnswer` contract.
#[must_use]
pub fn assessment_contract() -> SchemaContract {
    SchemaContract::new("AssessmentAnswer")
        .describe("Answer to assessment")
        .field(SchemaField::text("reasoning"))
        .field(SchemaField::choice("answer", ["YES", "NO"]).describe(
            "Yes or No. ALL of the skills need to be present in the job description to be yes.",
        ))
}

fn extraction_graph(registry: Arc<ContractRegistry>) -> Result<StageGraph, DocchainError> {
    let mut builder = PipelineBuilder::new("skill_extraction", registry);
    for contract in job_info::contracts()
        .into_iter()
        .filter(|c| c.name == JobSkill::CONTRACT || c.name == JobSkills::CONTRACT)
    {
        builder = builder.contract(contract)?;
    }
    let extract = take_stage(job_info::stage_definitions(), "job_skills")?;
    builder.stage(extract)?.build()
}

fn take_stage(stages: Vec<StageDefinition>, name: &str) -> Result<StageDefinition, DocchainError> {
    stages
        .into_iter()
        .find(|stage| stage.name == name)
        .ok_or_else(|| {
            PipelineValidationError::coded(
                codes::MISSING_DEP,
                format!("stage '{name}' is not defined"),
            )
            .with_stages(vec![name.to_string()])
            .into()
        })
}

fn grading_graph(registry: Arc<ContractRegistry>) -> Result<StageGraph, DocchainError> {
    PipelineBuilder::new("skill_grading", registry)
        .contract(assessment_contract())?
        .stage(
            StageDefinition::new("grade_skills", "AssessmentAnswer")
                .intent("Grade the presence of skills in a description.")
                .bind_input("assessed_skills")
                .bind_input("assessment_job_description")
                .bind("assessment_question", InputBinding::literal(CONTAINS_QUESTION)),
        )?
        .build()
}
