//! Stepflow CLI and REST API entry point.
//!
//! Binary name: `stepflow`
//!
//! Parses CLI arguments, initializes tracing and application state, then
//! dispatches to the command handler or starts the REST API server.

mod cli;
mod http;
mod state;

use clap::Parser;

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info,stepflow_core=debug,stepflow_infra=debug",
        _ => "trace",
    };
    if let Err(e) = stepflow_observe::tracing_setup::init_tracing(filter, cli.otel) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli).await;
    stepflow_observe::tracing_setup::shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    // File validation needs no database.
    if let Commands::Validate { file } = &cli.command {
        return cli::workflow::validate(file, cli.json);
    }

    let state = AppState::init().await?;

    match cli.command {
        Commands::Validate { .. } => Ok(()),

        Commands::Publish { file } => cli::workflow::publish(&state, &file, cli.json).await,

        Commands::NewVersion { workflow_id, out } => {
            cli::workflow::new_version(&state, workflow_id, out.as_deref(), cli.json).await
        }

        Commands::Workflows { status } => {
            cli::workflow::list(&state, status.as_deref(), cli.json).await
        }

        Commands::Run {
            workflow_id,
            input,
            detach,
        } => {
            cli::execution::run(
                &state,
                workflow_id,
                input.as_deref(),
                detach,
                cli.json,
                cli.quiet,
            )
            .await
        }

        Commands::Show { execution_id } => {
            cli::execution::show(&state, execution_id, cli.json).await
        }

        Commands::List { workflow_id, limit } => {
            cli::execution::list(&state, workflow_id, limit, cli.json).await
        }

        Commands::Serve { port, host } => serve(state, &host, port).await,
    }
}

/// Run the REST API until Ctrl+C or SIGTERM.
async fn serve(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let recovered = state.engine.recover_interrupted().await?;
    if !recovered.is_empty() {
        println!(
            "  {} Resuming {} interrupted execution(s)",
            console::style("↻").bold(),
            recovered.len()
        );
    }

    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    println!(
        "  {} stepflow API listening on {}",
        console::style("⚡").bold(),
        console::style(format!("http://{addr}")).cyan()
    );
    println!("  {}", console::style("Press Ctrl+C to stop").dim());

    let router = http::router::build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    println!("\n  Server stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "failed to install SIGTERM handler");
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
