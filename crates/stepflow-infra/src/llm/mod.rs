//! Text generation for `llm` steps.

pub mod anthropic;
pub mod types;

pub use anthropic::AnthropicGenerator;
