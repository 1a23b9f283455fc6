//! Validation, planning and execution for Stepflow workflows.
//!
//! This crate defines the collaborator traits (`CodeSandbox`,
//! `TextGenerator`, `HttpExecutor`) that the infrastructure layer
//! implements. It never depends on `stepflow-infra` or any network crate.

pub mod workflow;

pub use workflow::engine::{LoadedWorkflow, WorkflowEngine};
pub use workflow::definition::WorkflowError;
