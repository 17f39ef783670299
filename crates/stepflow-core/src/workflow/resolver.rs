//! Variable resolution for step configuration.
//!
//! `resolve` walks a JSON config tree and expands template fragments in
//! string leaves against an expression context:
//!
//! - `{{ expr }}` is evaluated and spliced into the surrounding text.
//! - A string that consists of exactly one `${{ expr }}` is replaced by the
//!   evaluated value with its JSON type intact. Embedded `${{ }}` fragments
//!   are spliced as text like `{{ }}`.
//!
//! Resolution is pure: no context mutation, no I/O. The engine calls it again
//! on every attempt so retries see the context as it is at that moment.

use serde_json::{Map, Value};
use stepflow_types::workflow::{StepConfig, StepDefinition};

use super::expression::{ExpressionError, WorkflowEvaluator};
use super::registry::StepError;

/// Expand every template fragment in `config` against `context`.
///
/// Object keys are left untouched. A fragment that fails to evaluate, or
/// evaluates to null, fails the whole resolution.
pub fn resolve(config: &Value, context: &Value) -> Result<Value, ExpressionError> {
    let evaluator = WorkflowEvaluator::new();
    resolve_with(&evaluator, config, context)
}

/// Resolve a step's config into a step ready for dispatch.
///
/// `parallel` steps come back unchanged: the parallel executor resolves each
/// sub-step on its own, so a bad template fails only that sub-step.
pub fn resolve_step(step: &StepDefinition, context: &Value) -> Result<StepDefinition, StepError> {
    if matches!(step.config, StepConfig::Parallel(_)) {
        return Ok(step.clone());
    }
    let raw = step
        .config
        .to_value()
        .map_err(|e| StepError::Config(e.to_string()))?;
    let resolved = resolve(&raw, context)?;
    let config = StepConfig::from_value(step.step_type(), resolved).map_err(|e| {
        StepError::Config(format!("resolved config of '{}' is invalid: {e}", step.id))
    })?;

    let mut resolved_step = step.clone();
    resolved_step.config = config;
    Ok(resolved_step)
}

fn resolve_with(
    evaluator: &WorkflowEvaluator,
    value: &Value,
    context: &Value,
) -> Result<Value, ExpressionError> {
    match value {
        Value::String(s) => resolve_string(evaluator, s, context),
        Value::Array(items) => items
            .iter()
            .map(|item| resolve_with(evaluator, item, context))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), resolve_with(evaluator, item, context)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn resolve_string(
    evaluator: &WorkflowEvaluator,
    template: &str,
    context: &Value,
) -> Result<Value, ExpressionError> {
    if let Some(expression) = whole_typed_expression(template) {
        return evaluator.evaluate_defined(expression, context);
    }
    if !template.contains("{{") {
        return Ok(Value::String(template.to_string()));
    }

    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find("{{") {
        let Some(close_offset) = rest[open + 2..].find("}}") else {
            break;
        };
        let close = open + 2 + close_offset;

        let prefix = &rest[..open];
        out.push_str(prefix.strip_suffix('$').unwrap_or(prefix));

        let expression = rest[open + 2..close].trim();
        let value = evaluator.evaluate_defined(expression, context)?;
        out.push_str(&value_to_text(&value));

        rest = &rest[close + 2..];
    }
    out.push_str(rest);

    Ok(Value::String(out))
}

/// The inner expression when the whole string is a single `${{ expr }}`.
fn whole_typed_expression(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("${{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Render a value for splicing into text.
///
/// Integral floats print without a fraction since JEXL arithmetic always
/// yields floats (`{{ input.count * 2 }}` renders `14`, not `14.0`).
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < 1e15 => {
                format!("{}", f as i64)
            }
            _ => n.to_string(),
        },
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}
