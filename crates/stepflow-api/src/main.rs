//! Stepflow CLI and REST API entry point.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, loads the engine configuration, then dispatches to
//! the appropriate command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;
use clap_complete::generate;

use cli::workflow::Output;
use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = stepflow_observe::filter_for_verbosity(cli.verbose, cli.quiet);
    if let Err(e) = stepflow_observe::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    stepflow_observe::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // Shell completions don't need app state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepflow", &mut std::io::stdout());
        return Ok(());
    }

    let state = AppState::init(cli.config.as_deref()).await?;
    let out = Output {
        json: cli.json,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Validate { file } => {
            cli::workflow::handle_validate(&state, &file, out).await?;
        }

        Commands::Run {
            file,
            inputs,
            inputs_json,
        } => {
            cli::workflow::handle_run(&state, &file, &inputs, inputs_json.as_deref(), out).await?;
        }

        Commands::List { dir } => {
            cli::workflow::handle_list(&state, &dir, out).await?;
        }

        Commands::Serve { dir, port, host } => {
            if let Some(dir) = &dir {
                let report = state.load_dir(dir)?;
                if !cli.quiet {
                    println!(
                        "  {} Loaded {} workflow(s) from {}",
                        console::style("*").green().bold(),
                        report.loaded.len(),
                        console::style(dir.display()).cyan()
                    );
                    for (path, error) in &report.failed {
                        println!("  {} {}: {}", console::style("✗").red(), path.display(), error);
                    }
                }
            }

            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Stepflow API listening on {}",
                    console::style("⚡").bold(),
                    console::style(format!("http://{addr}/api/v1")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }
            tracing::info!(
                addr = addr.as_str(),
                history_limit = state.config.history_limit,
                "REST API started"
            );

            let router = http::router::build_router(state);

            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
        }

        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
