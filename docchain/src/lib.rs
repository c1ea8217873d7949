//! # Docchain
//!
//! Staged generation pipelines with typed output contracts.
//!
//! Docchain turns a handful of text inputs into a multi-section document by
//! running an ordered chain of generation stages, with support for:
//!
//! - **Schema contracts**: every stage output is validated against a named,
//!   structurally-checked record shape, with bounded retries
//! - **Dependency resolution**: stage graphs are checked for unknown
//!   references, cycles and ordering before any backend call
//! - **Revision passes**: a revision stage supersedes earlier artifacts
//!   without destroying their original values
//! - **Deterministic assembly**: a completed run folds into an immutable
//!   combined result with a stable fingerprint
//! - **Observability**: per-call trace spans and lifecycle events
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use docchain::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(ContractRegistry::new());
//! let graph = PipelineBuilder::new("notes", registry)
//!     .contract(SchemaContract::new("Note").field(SchemaField::text("text")))?
//!     .stage(StageDefinition::new("draft", "Note").bind_input("topic"))?
//!     .stage(StageDefinition::new("polish", "Note").bind_artifact("draft"))?
//!     .build()?;
//!
//! let executor = Executor::new(backend, ExecutorConfig::default());
//! let result = executor
//!     .run(&graph, PipelineInputs::new().with("topic", "rust"))
//!     .await?;
//! println!("{}", result.to_json());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod cancellation;
pub mod config;
pub mod contracts;
pub mod documents;
pub mod errors;
pub mod events;
pub mod grading;
pub mod observability;
pub mod pipeline;
pub mod stages;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BackendError, GenerationAdapter, GenerationBackend, GenerationRequest,
        GenerationResponse, Usage,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::ExecutorConfig;
    pub use crate::contracts::{
        ContractRecord, ContractRegistry, FieldKind, SchemaContract, SchemaField,
        ValidatedRecord,
    };
    pub use crate::errors::{
        ContractErrorInfo, CycleDetectedError, DocchainError, GenerationContractFailure,
        PipelineValidationError, SchemaViolation,
    };
    pub use crate::events::{EventKind, EventSink, LoggingEventSink, NoOpEventSink, RunEvent};
    pub use crate::observability::{LoggingTraceSink, NoOpTraceSink, TraceSink};
    pub use crate::pipeline::{
        CombinedResult, Executor, PipelineBuilder, PipelineInputs, PipelineRun, RetryPolicy,
        RunStatus, StageGraph,
    };
    pub use crate::stages::{InputBinding, StageDefinition, StageResult};
}
