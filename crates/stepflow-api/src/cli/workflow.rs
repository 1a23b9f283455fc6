//! CLI workflow subcommands: validate, run and list.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use stepflow_core::WorkflowError;
use stepflow_types::execution::{ExecutionResult, RunStatus, StepStatus};
use stepflow_types::validation::ValidationResult;

use crate::state::AppState;

/// Output switches shared by every workflow subcommand.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// Merge `--inputs-json` and repeated `--input key=value` flags.
///
/// A value that parses as JSON (`42`, `true`, `[1,2]`, `"quoted"`) is used
/// as JSON; anything else is taken as a plain string.
pub fn parse_inputs(pairs: &[String], inputs_json: Option<&str>) -> Result<Map<String, Value>> {
    let mut inputs = match inputs_json {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("--inputs-json is not valid JSON")? {
            Value::Object(map) => map,
            _ => bail!("--inputs-json must be a JSON object"),
        },
        None => Map::new(),
    };

    for pair in pairs {
        let Some((key, raw)) = pair.split_once('=') else {
            bail!("invalid input '{pair}': expected KEY=VALUE");
        };
        let key = key.trim();
        if key.is_empty() {
            bail!("invalid input '{pair}': empty key");
        }
        let value = serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }

    Ok(inputs)
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(state: &AppState, file: &Path, out: Output) -> Result<()> {
    let text = read_file(file).await?;
    let report = state.engine.validate(&text);

    if out.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !out.quiet {
        print_report(file, &report);
    }

    if !report.valid {
        bail!("{} has {} validation error(s)", file.display(), report.errors.len());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

pub async fn handle_run(
    state: &AppState,
    file: &Path,
    pairs: &[String],
    inputs_json: Option<&str>,
    out: Output,
) -> Result<()> {
    let inputs = parse_inputs(pairs, inputs_json)?;
    let text = read_file(file).await?;

    let loaded = match state.engine.load_workflow(&text) {
        Ok(loaded) => loaded,
        Err(WorkflowError::Validation(report)) => {
            if out.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !out.quiet {
                print_report(file, &report);
            }
            bail!("{} failed validation", file.display());
        }
        Err(e) => return Err(e).with_context(|| format!("Failed to load {}", file.display())),
    };

    if !out.json && !out.quiet {
        for warning in &loaded.warnings {
            println!("  {} {}", style("!").yellow().bold(), warning.message);
        }
    }

    // Ctrl+C cancels the run; the partial result is still printed.
    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });
    let outcome = state
        .engine
        .run_with_cancellation(&loaded.name, inputs, token)
        .await;
    watcher.abort();

    let result = outcome.with_context(|| format!("Failed to run workflow '{}'", loaded.name))?;

    if out.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !out.quiet {
        print_execution(&result);
    }

    match result.status {
        RunStatus::Completed => Ok(()),
        RunStatus::Failed => bail!(
            "workflow '{}' failed: {}",
            result.workflow_name,
            result.error.as_deref().unwrap_or("unknown error")
        ),
        RunStatus::Cancelled => bail!("workflow '{}' was cancelled", result.workflow_name),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn handle_list(state: &AppState, dir: &Path, out: Output) -> Result<()> {
    let report = state.load_dir(dir)?;

    let mut rows = Vec::new();
    for name in state.engine.list_workflows() {
        let definition = state.engine.get_workflow_detail(&name)?;
        rows.push(definition);
    }

    if out.json {
        let failed: Vec<Value> = report
            .failed
            .iter()
            .map(|(path, error)| serde_json::json!({"path": path.display().to_string(), "error": error}))
            .collect();
        let workflows: Vec<Value> = rows
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.metadata.name,
                    "version": d.metadata.version,
                    "description": d.metadata.description,
                    "steps": d.workflow.steps.len(),
                    "inputs": d.inputs.keys().collect::<Vec<_>>(),
                })
            })
            .collect();
        let body = serde_json::json!({"workflows": workflows, "failed": failed});
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    if rows.is_empty() {
        println!();
        println!("  No workflows found in {}", style(dir.display()).cyan());
    } else {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Name").fg(Color::Cyan),
                Cell::new("Version"),
                Cell::new("Steps"),
                Cell::new("Inputs"),
                Cell::new("Description"),
            ]);
        for d in &rows {
            let inputs = d.inputs.keys().cloned().collect::<Vec<_>>().join(", ");
            table.add_row(vec![
                Cell::new(&d.metadata.name),
                Cell::new(&d.metadata.version),
                Cell::new(d.workflow.steps.len()),
                Cell::new(if inputs.is_empty() { "-".to_string() } else { inputs }),
                Cell::new(&d.metadata.description),
            ]);
        }
        println!();
        println!("{table}");
    }

    for (path, error) in &report.failed {
        println!("  {} {}: {}", style("✗").red(), path.display(), style(error).dim());
    }
    println!();
    Ok(())
}

// ---------------------------------------------------------------------------
// Rendering helpers
// ---------------------------------------------------------------------------

async fn read_file(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))
}

fn print_report(file: &Path, report: &ValidationResult) {
    println!();
    if report.valid {
        println!(
            "  {} {} is valid",
            style("✓").green().bold(),
            style(file.display()).cyan()
        );
    } else {
        println!(
            "  {} {} is invalid",
            style("✗").red().bold(),
            style(file.display()).cyan()
        );
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Code").fg(Color::Cyan),
                Cell::new("Severity"),
                Cell::new("Location"),
                Cell::new("Message"),
            ]);
        for e in &report.errors {
            let location = match (&e.path, e.line) {
                (Some(path), _) => path.clone(),
                (None, Some(line)) => format!("line {line}"),
                (None, None) => "-".to_string(),
            };
            table.add_row(vec![
                Cell::new(&e.code).fg(Color::Red),
                Cell::new(e.severity),
                Cell::new(location),
                Cell::new(&e.message),
            ]);
        }
        println!("{table}");
    }

    for w in &report.warnings {
        println!("  {} [{}] {}", style("!").yellow().bold(), w.code, w.message);
        if let Some(suggestion) = &w.suggestion {
            println!("      {}", style(suggestion).dim());
        }
    }
    println!();
}

fn format_step_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Completed => Cell::new(status).fg(Color::Green),
        StepStatus::Failed => Cell::new(status).fg(Color::Red),
        StepStatus::Skipped => Cell::new(status).fg(Color::DarkGrey),
    }
}

fn print_execution(result: &ExecutionResult) {
    let status = match result.status {
        RunStatus::Completed => style(result.status.to_string()).green().bold(),
        RunStatus::Failed => style(result.status.to_string()).red().bold(),
        RunStatus::Cancelled => style(result.status.to_string()).yellow().bold(),
    };
    println!();
    println!(
        "  Workflow '{}' {} in {}ms",
        style(&result.workflow_name).cyan(),
        status,
        result.execution_time_ms
    );
    println!("  Execution: {}", style(&result.execution_id).dim());

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Duration"),
            Cell::new("Retries"),
            Cell::new("Error"),
        ]);
    for (id, step) in &result.step_results {
        let error = match (&step.error, &step.fallback_step) {
            (Some(error), _) => error.clone(),
            (None, Some(fallback)) => format!("recovered by '{fallback}'"),
            (None, None) => String::new(),
        };
        table.add_row(vec![
            Cell::new(id),
            format_step_status(step.status),
            Cell::new(format!("{}ms", step.duration_ms)),
            Cell::new(step.retry_count),
            Cell::new(error),
        ]);
    }
    println!("{table}");

    if !result.outputs.is_empty() {
        println!("  Outputs:");
        for (name, value) in &result.outputs {
            println!("    {} = {}", style(name).bold(), value);
        }
    }
    if let Some(error) = &result.error {
        println!("  {} {}", style("Error:").red().bold(), error);
    }
    let failed = result.failed_steps();
    if !failed.is_empty() {
        println!("  {} {}", style("Failed steps:").red(), failed.join(", "));
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_inputs_types_values() {
        let inputs = parse_inputs(&pairs(&["n=42", "flag=true", "name=alice", "list=[1,2]"]), None).unwrap();
        assert_eq!(inputs["n"], json!(42));
        assert_eq!(inputs["flag"], json!(true));
        assert_eq!(inputs["name"], json!("alice"));
        assert_eq!(inputs["list"], json!([1, 2]));
    }

    #[test]
    fn test_parse_inputs_keeps_equals_in_value() {
        let inputs = parse_inputs(&pairs(&["query=a=b"]), None).unwrap();
        assert_eq!(inputs["query"], json!("a=b"));
    }

    #[test]
    fn test_pairs_override_json_object() {
        let inputs = parse_inputs(&pairs(&["x=2"]), Some(r#"{"x": 1, "y": "keep"}"#)).unwrap();
        assert_eq!(inputs["x"], json!(2));
        assert_eq!(inputs["y"], json!("keep"));
    }

    #[test]
    fn test_parse_inputs_rejects_malformed() {
        let err = parse_inputs(&pairs(&["novalue"]), None).unwrap_err();
        assert!(err.to_string().contains("expected KEY=VALUE"), "got: {err}");

        let err = parse_inputs(&pairs(&["=1"]), None).unwrap_err();
        assert!(err.to_string().contains("empty key"), "got: {err}");

        let err = parse_inputs(&[], Some("[1, 2]")).unwrap_err();
        assert!(err.to_string().contains("must be a JSON object"), "got: {err}");
    }

    const GREETING: &str = r#"
metadata:
  name: greeting
  description: Builds a greeting from a name
  version: 1.0.0
inputs:
  name:
    type: string
    required: true
workflow:
  steps:
    - id: start
      type: start
    - id: end
      type: end
      depends_on: [start]
outputs:
  who:
    source: "${name}"
"#;

    fn quiet() -> Output {
        Output { json: false, quiet: true }
    }

    fn state() -> AppState {
        AppState::from_config(stepflow_types::config::EngineConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_run_file_registers_and_completes() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("greeting.yaml");
        std::fs::write(&file, GREETING).unwrap();

        let state = state();
        handle_run(&state, &file, &pairs(&["name=ada"]), None, quiet()).await.unwrap();

        let history = state.engine.get_execution_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].outputs["who"], json!("ada"));
    }

    #[tokio::test]
    async fn test_run_with_missing_input_fails() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("greeting.yaml");
        std::fs::write(&file, GREETING).unwrap();

        let err = handle_run(&state(), &file, &[], None, quiet()).await.unwrap_err();
        assert!(format!("{err:#}").contains("missing required input 'name'"), "got: {err:#}");
    }

    #[tokio::test]
    async fn test_validate_reports_invalid_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let file = tmp.path().join("bad.yaml");
        std::fs::write(&file, GREETING.replace("depends_on: [start]", "depends_on: [nowhere]")).unwrap();

        let err = handle_validate(&state(), &file, quiet()).await.unwrap_err();
        assert!(err.to_string().contains("validation error"), "got: {err}");
    }

    #[tokio::test]
    async fn test_list_loads_directory() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(tmp.path().join("greeting.yaml"), GREETING).unwrap();

        let state = state();
        handle_list(&state, tmp.path(), quiet()).await.unwrap();
        assert_eq!(state.engine.list_workflows(), vec!["greeting"]);
    }
}
