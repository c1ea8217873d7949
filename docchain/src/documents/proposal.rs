//! Proposal document pipeline.
//!
//! Six stages turn a job posting and a resume into a client-facing document:
//! a proposal, a proof-of-concept plan, an MVP plan, a review report, a
//! revision pass over the first three, and a final document assembled from
//! the revised texts.

use crate::contracts::{ContractRecord, ContractRegistry, SchemaContract, SchemaField};
use crate::errors::DocchainError;
use crate::pipeline::{CombinedResult, Executor, PipelineBuilder, PipelineInputs, StageGraph};
use crate::stages::{InputBinding, StageDefinition};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Name of the proposal pipeline.
pub const PIPELINE_NAME: &str = "proposal_document";

/// Default time budget for the proof of concept.
pub const DEFAULT_TIME_TO_DELIVER: &str = "12 hours";

/// Default time constraint for MVP development.
pub const DEFAULT_TIME_CONSTRAINT: &str = "20 hours per week 2 months";

/// Initial inputs of the proposal pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalInputs {
    /// The job posting text.
    pub job_posting: String,
    /// The candidate's resume.
    pub resume: String,
    /// Time available to deliver the proof of concept.
    pub time_to_deliver: String,
    /// Time constraint for building the MVP.
    pub time_constraint: String,
}

impl ProposalInputs {
    /// Creates inputs with the default time budgets.
    #[must_use]
    pub fn new(job_posting: impl Into<String>, resume: impl Into<String>) -> Self {
        Self {
            job_posting: job_posting.into(),
            resume: resume.into(),
            time_to_deliver: DEFAULT_TIME_TO_DELIVER.to_string(),
            time_constraint: DEFAULT_TIME_CONSTRAINT.to_string(),
        }
    }

    /// Sets the proof-of-concept time budget.
    #[must_use]
    pub fn with_time_to_deliver(mut self, time: impl Into<String>) -> Self {
        self.time_to_deliver = time.into();
        self
    }

    /// Sets the MVP time constraint.
    #[must_use]
    pub fn with_time_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.time_constraint = constraint.into();
        self
    }
}

impl From<ProposalInputs> for PipelineInputs {
    fn from(inputs: ProposalInputs) -> Self {
        PipelineInputs::new()
            .with("job_posting", inputs.job_posting)
            .with("resume", inputs.resume)
            .with("time_to_deliver", inputs.time_to_deliver)
            .with("time_constraint", inputs.time_constraint)
    }
}

/// Proposal with a title heading followed by the proposal content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Working notes.
    pub scratch_pad: String,
    /// The proposal text.
    pub proposal: String,
}

impl ContractRecord for Proposal {
    const CONTRACT: &'static str = "Proposal";
}

/// Proof-of-concept plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Poc {
    /// Working notes.
    pub scratch_pad: String,
    /// Timeline as a bulleted task list.
    pub poc_plan: String,
}

impl ContractRecord for Poc {
    const CONTRACT: &'static str = "Poc";
}

/// Minimum viable product plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mvp {
    /// Working notes.
    pub scratch_pad: String,
    /// The MVP idea.
    pub mvp_idea: String,
    /// Weekly phased plan.
    pub mvp: String,
}

impl ContractRecord for Mvp {
    const CONTRACT: &'static str = "Mvp";
}

/// Review of the proposal, plans and posting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Working notes.
    pub scratch_pad: String,
    /// The report text.
    pub report: String,
}

impl ContractRecord for Report {
    const CONTRACT: &'static str = "Report";
}

/// Revised versions of the proposal and both plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    /// Revised proposal.
    pub revised_proposal: Proposal,
    /// Revised proof-of-concept plan.
    pub revised_poc: Poc,
    /// Revised MVP plan.
    pub revised_mvp: Mvp,
}

impl ContractRecord for Revision {
    const CONTRACT: &'static str = "Revision";
}

/// The polished stakeholder document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalDocument {
    /// The document text.
    pub final_document: String,
}

impl ContractRecord for FinalDocument {
    const CONTRACT: &'static str = "FinalDocument";
}

/// Typed view of a completed proposal run.
///
/// `proposal`, `poc` and `mvp` hold the current values, which are the
/// revised texts whenever the revision stage produced them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDocument {
    /// Current proposal.
    pub proposal: Proposal,
    /// Current proof-of-concept plan.
    pub poc: Poc,
    /// Current MVP plan.
    pub mvp: Mvp,
    /// Review report.
    pub report: Report,
    /// Output of the revision stage.
    pub revision: Revision,
    /// Final document.
    pub final_document: FinalDocument,
}

impl ProposalDocument {
    /// Decodes every artifact of a proposal run.
    ///
    /// # Errors
    ///
    /// Returns [`DocchainError::Decode`] when an artifact is missing or
    /// malformed.
    pub fn from_combined(result: &CombinedResult) -> Result<Self, DocchainError> {
        Ok(Self {
            proposal: result.decode("proposal")?,
            poc: result.decode("poc")?,
            mvp: result.decode("mvp")?,
            report: result.decode("report")?,
            revision: result.decode("revision")?,
            final_document: result.decode("final_document")?,
        })
    }
}

/// Contracts used by the proposal pipeline, nested ones first.
#[must_use]
pub fn contracts() -> Vec<SchemaContract> {
    vec![
        SchemaContract::new("Proposal")
            .describe("Proposal in the structure # Title, then the proposal content")
            .field(SchemaField::text("scratch_pad"))
            .field(SchemaField::text("proposal")),
        SchemaContract::new("Poc")
            .describe("Proof of concept plan, professionally structured")
            .field(SchemaField::text("scratch_pad"))
            .field(
                SchemaField::text("poc_plan")
                    .describe("Proof of concept timeline as a bulleted task list"),
            ),
        SchemaContract::new("Mvp")
            .describe("Minimum viable product plan, professionally structured")
            .field(SchemaField::text("scratch_pad"))
            .field(
                SchemaField::text("mvp_idea")
                    .describe("MVP idea that is clearly defined based on the job posting"),
            )
            .field(SchemaField::text("mvp").describe(
                "Minimum viable product plan with a timeline for each phase, broken down \
                 weekly, that respects the time constraint",
            )),
        SchemaContract::new("Report")
            .describe("Detailed report, professionally structured")
            .field(SchemaField::text("scratch_pad"))
            .field(SchemaField::text("report").describe(
                "Comprehensive and detailed report based on the proposal, job posting, \
                 proof of concept plan and MVP schedule",
            )),
        SchemaContract::new("Revision")
            .describe("Revisions, professionally structured")
            .field(
                SchemaField::record("revised_proposal", "Proposal")
                    .describe("Revision of the original proposal based on the detailed report"),
            )
            .field(
                SchemaField::record("revised_poc", "Poc")
                    .describe("Revision of the original POC based on the detailed report"),
            )
            .field(
                SchemaField::record("revised_mvp", "Mvp")
                    .describe("Revision of the original MVP based on the detailed report"),
            ),
        SchemaContract::new("FinalDocument")
            .describe("Polished final document, professionally structured")
            .field(SchemaField::text("final_document").describe(
                "Polished final document that only structures the revised proposal, POC plan \
                 and MVP schedule. It is shared with project stakeholders, so it must be \
                 well organized, clearly written and professionally formatted",
            )),
    ]
}

/// Stage definitions in definition order.
#[must_use]
pub fn stage_definitions() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("proposal", "Proposal")
            .intent("Generate a proposal for technical contract work.")
            .bind_input("job_posting")
            .bind_input("resume"),
        StageDefinition::new("poc", "Poc")
            .intent("Generate a proof of concept plan.")
            .bind_input("job_posting")
            .bind_input("resume")
            .bind_artifact("proposal")
            .bind_input("time_to_deliver"),
        StageDefinition::new("mvp", "Mvp")
            .intent("Generate a minimum viable product plan.")
            .bind_input("job_posting")
            .bind_artifact("proposal")
            .bind_input("time_constraint")
            .bind("poc_plan", InputBinding::artifact("poc")),
        StageDefinition::new("report", "Report")
            .intent(
                "Generate a comprehensive and detailed report based on the information from \
                 the following components: proposal, job posting, proof of concept plan, \
                 MVP schedule.",
            )
            .bind_input("job_posting")
            .bind_artifact("proposal")
            .bind("poc_plan", InputBinding::artifact("poc"))
            .bind_artifact("mvp"),
        StageDefinition::new("revision", "Revision")
            .intent(
                "Generate revisions for the following: proposal, proof of concept plan, MVP \
                 schedule. Use the information from the detailed report and each of the \
                 originals.",
            )
            .bind_artifact("proposal")
            .bind("poc_plan", InputBinding::artifact("poc"))
            .bind_artifact("mvp")
            .bind_artifact("report")
            .revises("proposal", "revised_proposal")
            .revises("poc", "revised_poc")
            .revises("mvp", "revised_mvp"),
        StageDefinition::new("final_document", "FinalDocument")
            .intent(
                "Generate the final document, only structuring the following: revised \
                 proposal, revised proof of concept plan, revised MVP schedule, and job \
                 posting.",
            )
            .bind_input("job_posting")
            .bind("proposal", InputBinding::artifact_field("proposal", "proposal"))
            .bind("poc_plan", InputBinding::artifact_field("poc", "poc_plan"))
            .bind("mvp", InputBinding::artifact_field("mvp", "mvp")),
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

/// Runs the proposal pipeline end to end.
///
/// # Errors
///
/// Returns the error of the failing stage; no partial result is produced.
pub async fn run_pipeline(
    executor: &Executor,
    inputs: ProposalInputs,
) -> Result<CombinedResult, DocchainError> {
    let graph = build_pipeline(Arc::new(ContractRegistry::new()))?;
    executor.run(&graph, inputs.into()).await
}
