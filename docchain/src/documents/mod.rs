//! Ready-made document pipelines.
//!
//! - [`proposal`]: proposal, plans, review, revision and final document
//! - [`job_info`]: independent facets extracted from a job description

pub mod job_info;
pub mod proposal;

pub use job_info::{run_job_info, JobInformation};
pub use proposal::{run_pipeline, ProposalDocument, ProposalInputs};
