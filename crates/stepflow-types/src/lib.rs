//! Shared domain types for Stepflow.
//!
//! This crate contains the data model used across the Stepflow workspace:
//! the workflow document (`WorkflowDefinition`), validation reports,
//! execution results and the engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, indexmap, chrono, thiserror.

pub mod config;
pub mod error;
pub mod execution;
pub mod validation;
pub mod workflow;
