//! Execution subcommands: run, show, list.

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use serde_json::Value;
use uuid::Uuid;

use stepflow_core::workflow::ExecutionSummary;
use stepflow_types::event::ExecutionEvent;
use stepflow_types::execution::ExecutionStatus;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Run a published workflow.
///
/// Without `detach` the command streams step progress and waits for a
/// terminal state; a failed or cancelled execution exits non-zero. With
/// `detach` it returns once the execution is accepted, and anything left
/// unfinished is picked up by the next `stepflow serve`.
pub async fn run(
    state: &AppState,
    workflow_id: Uuid,
    input: Option<&str>,
    detach: bool,
    json: bool,
    quiet: bool,
) -> Result<()> {
    let input: Value = match input {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON input")?,
        None => Value::Object(serde_json::Map::new()),
    };

    if detach {
        let execution_id = state.engine.execute(workflow_id, input).await?;
        if json {
            let out = serde_json::json!({ "execution_id": execution_id, "status": "accepted" });
            println!("{}", serde_json::to_string_pretty(&out)?);
        } else if !quiet {
            println!();
            println!(
                "  {} Accepted execution {}",
                style("*").green().bold(),
                style(execution_id).cyan()
            );
            println!(
                "  Check progress: {}",
                style(format!("stepflow show {execution_id}")).dim()
            );
            println!();
        }
        return Ok(());
    }

    let progress = (!json && !quiet).then(|| {
        let mut events = state.engine.events().subscribe();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                print_progress(&event);
            }
        })
    });

    let execution = state.engine.run(workflow_id, input).await?;
    if let Some(handle) = progress {
        handle.abort();
    }

    let summary = ExecutionSummary::from(&execution);
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else if !quiet {
        print_summary(&summary);
    }

    match summary.status {
        ExecutionStatus::Completed => Ok(()),
        status => bail!(
            "execution {} {}: {}",
            summary.id,
            status,
            summary.error.as_deref().unwrap_or("no error recorded")
        ),
    }
}

fn print_progress(event: &ExecutionEvent) {
    match event {
        ExecutionEvent::StepCompleted {
            step_id,
            attempt,
            duration_ms,
            ..
        } => println!(
            "  {} {step_id} (attempt {attempt}, {duration_ms}ms)",
            style("✓").green()
        ),
        ExecutionEvent::StepFailed {
            step_id,
            attempt,
            error,
            ..
        } => println!(
            "  {} {step_id} (attempt {attempt}): {}",
            style("✗").red(),
            style(error).dim()
        ),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Show
// ---------------------------------------------------------------------------

/// Show one execution with its step history.
pub async fn show(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    let summary = state.engine.get_execution(execution_id).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print_summary(&summary);
    }
    Ok(())
}

fn status_color(status: ExecutionStatus) -> Color {
    match status {
        ExecutionStatus::Completed => Color::Green,
        ExecutionStatus::Failed => Color::Red,
        ExecutionStatus::Cancelled => Color::Yellow,
        ExecutionStatus::Running => Color::Cyan,
        ExecutionStatus::Pending => Color::DarkGrey,
    }
}

fn print_summary(summary: &ExecutionSummary) {
    println!();
    println!(
        "  Execution {} of workflow {} (v{})",
        style(summary.id).cyan(),
        summary.workflow_id,
        summary.workflow_version
    );
    let status = match summary.status {
        ExecutionStatus::Completed => style(summary.status.to_string()).green(),
        ExecutionStatus::Failed => style(summary.status.to_string()).red(),
        ExecutionStatus::Cancelled => style(summary.status.to_string()).yellow(),
        _ => style(summary.status.to_string()).cyan(),
    };
    println!("  Status: {status}");
    if let Some(error) = &summary.error {
        match &summary.failed_step_id {
            Some(step) => println!("  Error ({step}): {error}"),
            None => println!("  Error: {error}"),
        }
    }
    if let (Some(started), Some(completed)) = (summary.started_at, summary.completed_at) {
        println!(
            "  Duration: {}ms",
            (completed - started).num_milliseconds().max(0)
        );
    }

    if !summary.step_results.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Attempt"),
                Cell::new("Result"),
                Cell::new("Duration"),
                Cell::new("Error"),
            ]);
        for r in &summary.step_results {
            let (label, color) = if r.success {
                ("ok", Color::Green)
            } else {
                ("failed", Color::Red)
            };
            table.add_row(vec![
                Cell::new(&r.step_id),
                Cell::new(r.attempt),
                Cell::new(label).fg(color),
                Cell::new(format!("{}ms", r.duration_ms)),
                Cell::new(r.error.as_ref().map(|e| e.message.as_str()).unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }

    if let Some(output) = &summary.output {
        println!();
        println!("  Output:");
        let pretty = serde_json::to_string_pretty(output).unwrap_or_else(|_| output.to_string());
        for line in pretty.lines() {
            println!("    {line}");
        }
    }
    println!();
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List recent executions of one workflow.
pub async fn list(state: &AppState, workflow_id: Uuid, limit: u32, json: bool) -> Result<()> {
    let executions = state.engine.list_executions(workflow_id, limit).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&executions)?);
        return Ok(());
    }

    if executions.is_empty() {
        println!();
        println!("  No executions for workflow {workflow_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Execution").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Steps run"),
            Cell::new("Created"),
            Cell::new("Error"),
        ]);

    for e in &executions {
        table.add_row(vec![
            Cell::new(e.id),
            Cell::new(e.status).fg(status_color(e.status)),
            Cell::new(e.step_results.len()),
            Cell::new(e.created_at.format("%Y-%m-%d %H:%M:%S")),
            Cell::new(e.error.as_deref().unwrap_or("")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}
