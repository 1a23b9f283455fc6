//! Infrastructure layer for Stepflow.
//!
//! Contains implementations of the collaborator traits defined in
//! `stepflow-core`: the boa JavaScript sandbox, the reqwest HTTP client and
//! the Anthropic text generator, plus config loading and engine wiring.

pub mod config;
pub mod engine;
pub mod http;
pub mod llm;
pub mod sandbox;

pub use engine::{build_engine, load_workflow_dir};
