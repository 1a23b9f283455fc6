//! CLI command definitions for the `stepflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Validate and run YAML workflows.
#[derive(Parser)]
#[command(name = "stepflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to the engine configuration file.
    #[arg(long, global = true, env = "STEPFLOW_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow file and print the report.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Load a workflow file and run it once.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Input value as key=value (repeatable). Values that parse as JSON
        /// are used as JSON, anything else as a string.
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// All inputs as one JSON object. `--input` entries override its keys.
        #[arg(long, value_name = "JSON")]
        inputs_json: Option<String>,
    },

    /// List the workflows found in a directory.
    #[command(alias = "ls")]
    List {
        /// Directory containing workflow YAML files.
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Start the REST API server.
    Serve {
        /// Directory of workflows to load at startup.
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Port to listen on.
        #[arg(short, long, default_value = "3000")]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_collects_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "stepflow", "run", "flow.yaml", "--input", "a=1", "-i", "b=two", "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, inputs, inputs_json } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(inputs, vec!["a=1", "b=two"]);
                assert!(inputs_json.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["stepflow", "serve", "-vv"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Serve { dir, port, host } => {
                assert!(dir.is_none());
                assert_eq!(port, 3000);
                assert_eq!(host, "127.0.0.1");
            }
            _ => panic!("expected serve"),
        }
    }
}
