//! Workflow definition subcommands: validate, publish, new-version, list.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use stepflow_core::repository::workflow::DefinitionRepository;
use stepflow_core::workflow::definition::{WorkflowError, load_workflow_file, save_workflow_file};
use stepflow_types::workflow::{DefinitionError, DefinitionStatus, WorkflowDefinition};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Check a workflow file against every publish-time rule.
pub fn validate(file: &Path, json: bool) -> Result<()> {
    let issues = match load_workflow_file(file) {
        Ok(def) => match def.validate() {
            Ok(()) => {
                report_valid(&def, json)?;
                return Ok(());
            }
            Err(DefinitionError::Validation(issues)) => issues,
            Err(e) => return Err(e.into()),
        },
        Err(WorkflowError::Definition(DefinitionError::Validation(issues))) => issues,
        Err(e) => {
            return Err(e).with_context(|| format!("failed to load {}", file.display()));
        }
    };

    if json {
        let out = serde_json::json!({ "valid": false, "issues": issues });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} {} is not valid:",
            style("✗").red().bold(),
            style(file.display()).cyan()
        );
        for issue in &issues {
            println!("    - {issue}");
        }
        println!();
    }
    bail!("{} validation issue(s) in {}", issues.len(), file.display())
}

fn report_valid(def: &WorkflowDefinition, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "valid": true,
            "name": def.name(),
            "version": def.version(),
            "steps": def.steps().len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!();
        println!(
            "  {} Workflow '{}' is valid ({} steps)",
            style("✓").green().bold(),
            style(def.name()).cyan(),
            def.steps().len()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Publish
// ---------------------------------------------------------------------------

/// Load a workflow file, publish it if it is still a draft, and store it.
pub async fn publish(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let mut def = load_workflow_file(file)
        .with_context(|| format!("failed to load {}", file.display()))?;
    if !def.is_published() {
        def.publish()?;
    }

    state
        .repo
        .save_definition(&def)
        .await
        .context("failed to save workflow")?;

    tracing::info!(workflow_id = %def.id(), version = def.version(), "workflow published");

    if json {
        println!("{}", serde_json::to_string_pretty(&definition_json(&def))?);
    } else {
        println!();
        println!(
            "  {} Published '{}' v{}",
            style("*").green().bold(),
            style(def.name()).cyan(),
            def.version()
        );
        println!("  ID: {}", def.id());
        println!("  Steps: {}", def.steps().len());
        println!();
        println!(
            "  Run it with: {}",
            style(format!("stepflow run {}", def.id())).dim()
        );
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// New version
// ---------------------------------------------------------------------------

/// Branch a stored definition into a new draft version.
pub async fn new_version(
    state: &AppState,
    workflow_id: Uuid,
    out: Option<&Path>,
    json: bool,
) -> Result<()> {
    let current = state
        .repo
        .get_definition(&workflow_id)
        .await
        .context("failed to look up workflow")?
        .with_context(|| format!("workflow {workflow_id} not found"))?;

    let draft = current.create_new_version()?;
    state
        .repo
        .save_definition(&draft)
        .await
        .context("failed to save new version")?;

    if let Some(path) = out {
        save_workflow_file(path, &draft)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }

    if json {
        let mut value = definition_json(&draft);
        value["previous_id"] = serde_json::json!(current.id());
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!();
        println!(
            "  {} Created draft '{}' v{} from v{}",
            style("*").green().bold(),
            style(draft.name()).cyan(),
            draft.version(),
            current.version()
        );
        println!("  ID: {}", draft.id());
        if let Some(path) = out {
            println!("  Written to: {}", path.display());
            println!(
                "  Publish with: {}",
                style(format!("stepflow publish {}", path.display())).dim()
            );
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List stored definitions, newest first.
pub async fn list(state: &AppState, status: Option<&str>, json: bool) -> Result<()> {
    let status = status.map(parse_status).transpose()?;
    let defs = state
        .repo
        .list_definitions(status)
        .await
        .context("failed to list workflows")?;

    if json {
        let out: Vec<_> = defs.iter().map(definition_json).collect();
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows stored.");
        println!(
            "  Publish one with: {}",
            style("stepflow publish <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Status"),
            Cell::new("Steps"),
            Cell::new("Updated"),
        ]);

    for d in &defs {
        let status_color = match d.status() {
            DefinitionStatus::Published => Color::Green,
            DefinitionStatus::Draft => Color::Yellow,
            DefinitionStatus::Archived => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(d.id()),
            Cell::new(d.name()),
            Cell::new(d.version()),
            Cell::new(d.status()).fg(status_color),
            Cell::new(d.steps().len()),
            Cell::new(d.updated_at().format("%Y-%m-%d %H:%M")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn parse_status(raw: &str) -> Result<DefinitionStatus> {
    serde_json::from_value(serde_json::Value::String(raw.to_ascii_lowercase()))
        .with_context(|| format!("unknown status '{raw}' (expected draft, published or archived)"))
}

fn definition_json(def: &WorkflowDefinition) -> serde_json::Value {
    serde_json::json!({
        "id": def.id(),
        "name": def.name(),
        "version": def.version(),
        "status": def.status(),
        "steps": def.steps().len(),
        "updated_at": def.updated_at().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("Published").unwrap(), DefinitionStatus::Published);
        assert_eq!(parse_status("draft").unwrap(), DefinitionStatus::Draft);
        assert!(parse_status("live").is_err());
    }

    #[test]
    fn test_validate_reports_issues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.yaml");
        std::fs::write(&path, "name: empty\nsteps: []\n").unwrap();

        let err = validate(&path, true).unwrap_err();
        assert!(err.to_string().contains("validation issue"));
    }

    #[test]
    fn test_validate_accepts_good_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.yaml");
        std::fs::write(
            &path,
            "name: ok\nsteps:\n  - id: step_wait\n    name: Wait\n    type: delay\n    config:\n      duration_ms: 10\n",
        )
        .unwrap();

        validate(&path, true).unwrap();
    }
}
