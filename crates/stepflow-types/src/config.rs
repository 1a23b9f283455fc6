//! Engine configuration types.
//!
//! `EngineConfig` mirrors `stepflow.toml`. Every field has a default, so an
//! empty file (or no file at all) yields a working engine.

use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many finished runs the execution history keeps.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Fixed delay between retry attempts, in milliseconds.
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Largest response body an `http` step will read.
    #[serde(default = "default_max_http_response_bytes")]
    pub max_http_response_bytes: usize,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub sandbox: SandboxLimits,

    #[serde(default)]
    pub llm: LlmSettings,
}

fn default_history_limit() -> usize {
    100
}

fn default_max_http_response_bytes() -> usize {
    10 * 1024 * 1024
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            retry_delay_ms: 0,
            max_http_response_bytes: default_max_http_response_bytes(),
            timeouts: TimeoutConfig::default(),
            sandbox: SandboxLimits::default(),
            llm: LlmSettings::default(),
        }
    }
}

/// Default per-step timeouts, used when a step config has no `timeout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_code_ms")]
    pub code_ms: u64,
    #[serde(default = "default_http_ms")]
    pub http_ms: u64,
    #[serde(default = "default_llm_ms")]
    pub llm_ms: u64,
}

fn default_code_ms() -> u64 {
    30_000
}

fn default_http_ms() -> u64 {
    30_000
}

fn default_llm_ms() -> u64 {
    120_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            code_ms: default_code_ms(),
            http_ms: default_http_ms(),
            llm_ms: default_llm_ms(),
        }
    }
}

/// Resource limits for the code sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    #[serde(default = "default_max_code_bytes")]
    pub max_code_bytes: usize,
    /// Upper bound on the estimated size of injected bindings plus code,
    /// checked before the script runs. Heap growth at run time is not
    /// measured.
    #[serde(default = "default_memory_limit_bytes")]
    pub memory_limit_bytes: usize,
    #[serde(default = "default_loop_iteration_limit")]
    pub loop_iteration_limit: u64,
    #[serde(default = "default_recursion_limit")]
    pub recursion_limit: usize,
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
}

fn default_max_code_bytes() -> usize {
    64 * 1024
}

fn default_memory_limit_bytes() -> usize {
    32 * 1024 * 1024
}

fn default_loop_iteration_limit() -> u64 {
    10_000_000
}

fn default_recursion_limit() -> usize {
    512
}

fn default_max_output_bytes() -> usize {
    1024 * 1024
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: default_max_code_bytes(),
            memory_limit_bytes: default_memory_limit_bytes(),
            loop_iteration_limit: default_loop_iteration_limit(),
            recursion_limit: default_recursion_limit(),
            max_output_bytes: default_max_output_bytes(),
        }
    }
}

/// Text-generation collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Environment variable holding the Anthropic API key. When unset the
    /// `llm` step runs in fallback mode.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model used when a step names none the provider accepts.
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_key_env() -> String {
    "ANTHROPIC_API_KEY".to_string()
}

fn default_base_url() -> String {
    "https://api.anthropic.com".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            default_model: default_model(),
            max_tokens: default_max_tokens(),
        }
    }
}
