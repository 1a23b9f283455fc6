//! Code execution for `code` steps.

pub mod js;

pub use js::{JsSandbox, SandboxError};
