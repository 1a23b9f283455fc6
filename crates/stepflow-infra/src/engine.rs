//! Live engine wiring and the workflow directory loader.
//!
//! `build_engine` plugs the concrete collaborators (boa sandbox, reqwest
//! client, Anthropic generator) into a core `WorkflowEngine`, the same way
//! every binary entry point needs them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepflow_core::WorkflowEngine;
use stepflow_core::workflow::definition::{WorkflowError, discover_workflow_files, read_workflow_file};
use stepflow_core::workflow::step_runner::StepRunner;
use stepflow_types::config::EngineConfig;

use crate::http::ReqwestHttpExecutor;
use crate::llm::AnthropicGenerator;
use crate::sandbox::JsSandbox;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A `WorkflowEngine` with all live collaborators.
pub fn build_engine(config: &EngineConfig) -> Result<WorkflowEngine, BuildError> {
    let generator = AnthropicGenerator::from_env(&config.llm)?;
    let runner = StepRunner::new(config.timeouts.clone())
        .with_sandbox(Arc::new(JsSandbox::new(config.sandbox.clone())))
        .with_http(Arc::new(ReqwestHttpExecutor::new(config.max_http_response_bytes)?))
        .with_generator(Arc::new(generator));
    Ok(WorkflowEngine::new(runner, config))
}

/// Outcome of loading a workflow directory.
#[derive(Debug, Default)]
pub struct DirectoryLoad {
    /// Registered workflow names, in file order.
    pub loaded: Vec<String>,
    /// Files that could not be read or failed validation.
    pub failed: Vec<(PathBuf, String)>,
}

/// Load every `*.yaml` / `*.yml` file in `dir` into `engine`.
///
/// A file that fails is logged and skipped; only an unreadable directory is
/// an error.
pub fn load_workflow_dir(engine: &WorkflowEngine, dir: &Path) -> Result<DirectoryLoad, WorkflowError> {
    let mut report = DirectoryLoad::default();
    for path in discover_workflow_files(dir)? {
        match read_workflow_file(&path).and_then(|text| engine.load_workflow(&text)) {
            Ok(loaded) => {
                tracing::info!(path = %path.display(), workflow = loaded.name.as_str(), "loaded workflow file");
                report.loaded.push(loaded.name);
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping workflow file");
                report.failed.push((path, e.to_string()));
            }
        }
    }
    Ok(report)
}
