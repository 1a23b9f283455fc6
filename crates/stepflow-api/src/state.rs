//! Application state shared by CLI commands and REST API handlers.
//!
//! AppState pins the core `WorkflowEngine` to the live infra collaborators
//! (boa sandbox, reqwest client, Anthropic generator).

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use stepflow_core::WorkflowEngine;
use stepflow_infra::config::{default_config_path, load_engine_config};
use stepflow_infra::{build_engine, load_workflow_dir};
use stepflow_types::config::EngineConfig;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<WorkflowEngine>,
    pub config: Arc<EngineConfig>,
}

impl AppState {
    /// Load configuration (explicit path, else the default location) and
    /// wire the engine.
    pub async fn init(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match config_path {
            Some(path) => path.to_path_buf(),
            None => default_config_path(),
        };
        let config = load_engine_config(&path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?;
        tracing::debug!(path = %path.display(), "engine configuration loaded");
        Self::from_config(config)
    }

    pub fn from_config(config: EngineConfig) -> anyhow::Result<Self> {
        let engine = build_engine(&config).context("Failed to build workflow engine")?;
        Ok(Self {
            engine: Arc::new(engine),
            config: Arc::new(config),
        })
    }

    /// Register every workflow file in `dir`; bad files are reported, not fatal.
    pub fn load_dir(&self, dir: &Path) -> anyhow::Result<stepflow_infra::engine::DirectoryLoad> {
        load_workflow_dir(&self.engine, dir)
            .with_context(|| format!("Failed to read workflow directory {}", dir.display()))
    }
}
