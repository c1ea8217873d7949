//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipeline builder with validation
//! - Stage graph resolution and ordering
//! - The sequential executor and its run state
//! - Final assembly of a combined result
//! - Retry policy for contract violations

mod assemble;
mod builder;
mod dag;
mod executor;
mod retry;
mod run;

#[cfg(test)]
mod integration_tests;

pub use assemble::{finalize, Artifact, CombinedResult};
pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use executor::Executor;
pub use retry::{
    should_retry, BackoffStrategy, JitterStrategy, RetryDecision, RetryPolicy, RetryState,
};
pub use run::{PipelineInputs, PipelineRun, RunStatus};
