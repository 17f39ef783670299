//! CLI command definitions for the `stepflow` binary.
//!
//! Uses clap derive macros. Definition commands read YAML/JSON files;
//! execution commands take UUIDs printed by earlier commands.

pub mod execution;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Define, publish and run multi-step workflows.
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

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true, env = "STEPFLOW_OTEL")]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check a workflow file without storing it.
    Validate {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// Validate, publish and store a workflow file.
    Publish {
        /// Path to a YAML or JSON workflow file.
        file: PathBuf,
    },

    /// Create a new draft version of a stored workflow.
    #[command(name = "new-version")]
    NewVersion {
        /// Workflow UUID to branch from.
        workflow_id: Uuid,

        /// Also write the draft to this file for editing.
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// List stored workflow definitions.
    #[command(alias = "ls")]
    Workflows {
        /// Only show definitions in this status (draft, published, archived).
        #[arg(long)]
        status: Option<String>,
    },

    /// Run a published workflow.
    Run {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// JSON input for the execution.
        #[arg(long, short)]
        input: Option<String>,

        /// Return as soon as the execution is accepted.
        #[arg(long)]
        detach: bool,
    },

    /// Show an execution with its step history.
    Show {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// List recent executions of a workflow.
    List {
        /// Workflow UUID.
        workflow_id: Uuid,

        /// Maximum number of executions to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },

    /// Start the REST API server.
    Serve {
        /// Port to listen on.
        #[arg(long, default_value = "3000")]
        port: u16,

        /// Host address to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
}
