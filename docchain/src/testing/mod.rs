//! Testing utilities for docchain pipelines.
//!
//! This module provides:
//! - Stub generation backends that need no network
//! - A trace sink that always fails
//! - Fixture graphs

mod fixtures;
mod mocks;

pub use fixtures::{revision_backend, revision_graph, text_registry};
pub use mocks::{FailingTraceSink, FnBackend, ScriptedBackend};
