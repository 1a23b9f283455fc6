//! Workflow engine core: validation, planning and execution.
//!
//! - `definition` -- YAML parsing, the engine error taxonomy, file discovery
//! - `schema` / `semantic` / `lint` -- the three validation passes
//! - `validator` -- the combined pipeline producing a `ValidationResult`
//! - `dag` -- dependency graph, cycle detection, execution order
//! - `template` -- `${path}` reference resolution
//! - `expression` -- JEXL evaluator for condition steps
//! - `inputs` -- caller input checks and defaults
//! - `context` -- per-run execution state
//! - `step_runner` -- per-type step handlers and collaborator traits
//! - `policy` -- fail/skip/retry/fallback decisions
//! - `executor` -- sequential run loop
//! - `registry` / `engine` -- named definitions, history and the facade

pub mod context;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod executor;
pub mod expression;
pub mod inputs;
pub mod lint;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod semantic;
pub mod step_runner;
pub mod template;
pub mod validator;
