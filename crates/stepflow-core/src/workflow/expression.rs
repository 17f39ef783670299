//! JEXL expression evaluator for templates, transforms, and conditions.
//!
//! Wraps `jexl_eval::Evaluator` with pre-registered standard transforms.
//!
//! **Security note:** Context values are always passed as the evaluation
//! context, NEVER interpolated into expression strings.
//!
//! The evaluator is cheap to build and is created per call site rather than
//! shared, so it never has to cross an `.await`.

use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur during expression evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExpressionError {
    #[error("expression `{expression}` failed: {reason}")]
    EvalFailed { expression: String, reason: String },

    #[error("expression `{0}` resolved to null")]
    Unresolved(String),

    #[error("invalid context: {0}")]
    InvalidContext(String),
}

// ---------------------------------------------------------------------------
// WorkflowEvaluator
// ---------------------------------------------------------------------------

/// JEXL expression evaluator with standard transforms pre-registered.
///
/// Used for:
/// - `{{ expr }}` / `${{ expr }}` template fragments in step config
/// - `transform` step expressions (e.g. `steps.step_fetch.body.items|length`)
/// - `conditional` step conditions
pub struct WorkflowEvaluator {
    evaluator: jexl_eval::Evaluator<'static>,
}

impl WorkflowEvaluator {
    /// Create a new evaluator with all standard transforms registered.
    pub fn new() -> Self {
        let evaluator = jexl_eval::Evaluator::new()
            // String transforms
            .with_transform("lower", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_lowercase()))
            })
            .with_transform("upper", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.to_uppercase()))
            })
            .with_transform("trim", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(s.trim()))
            })
            .with_transform("split", |args: &[Value]| {
                let s = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let delimiter = args.get(1).and_then(|v| v.as_str()).unwrap_or(",");
                let parts: Vec<&str> = s.split(delimiter).collect();
                Ok(json!(parts))
            })
            // String search transforms
            .with_transform("contains", |args: &[Value]| {
                let subject = args.first().cloned().unwrap_or(Value::Null);
                let needle = args.get(1).cloned().unwrap_or(Value::Null);
                let found = match (&subject, &needle) {
                    (Value::String(s), Value::String(n)) => s.contains(n.as_str()),
                    (Value::Array(items), n) => items.contains(n),
                    (Value::Object(map), Value::String(key)) => map.contains_key(key),
                    _ => false,
                };
                Ok(json!(found))
            })
            .with_transform("startsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let prefix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.starts_with(prefix)))
            })
            .with_transform("endsWith", |args: &[Value]| {
                let subject = args.first().and_then(|v| v.as_str()).unwrap_or("");
                let suffix = args.get(1).and_then(|v| v.as_str()).unwrap_or("");
                Ok(json!(subject.ends_with(suffix)))
            })
            // Length works on strings, arrays, and objects
            .with_transform("length", |args: &[Value]| {
                let len = match args.first() {
                    Some(Value::String(s)) => s.chars().count(),
                    Some(Value::Array(a)) => a.len(),
                    Some(Value::Object(o)) => o.len(),
                    _ => 0,
                };
                Ok(json!(len as f64))
            })
            .with_transform("not", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(!Self::value_to_bool(&val)))
            })
            // Serialize any value to its JSON text
            .with_transform("json", |args: &[Value]| {
                let val = args.first().cloned().unwrap_or(Value::Null);
                Ok(json!(val.to_string()))
            });

        Self { evaluator }
    }

    /// Evaluate an expression and return the raw JSON value.
    ///
    /// The `context` must be a JSON object.
    pub fn evaluate_value(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        if !context.is_object() {
            return Err(ExpressionError::InvalidContext(
                "context must be a JSON object".to_string(),
            ));
        }

        self.evaluator
            .eval_in_context(expression, context)
            .map_err(|e| ExpressionError::EvalFailed {
                expression: expression.to_string(),
                reason: e.to_string(),
            })
    }

    /// Evaluate an expression, treating a null result as an unresolved reference.
    pub fn evaluate_defined(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<Value, ExpressionError> {
        match self.evaluate_value(expression, context)? {
            Value::Null => Err(ExpressionError::Unresolved(expression.to_string())),
            value => Ok(value),
        }
    }

    /// Evaluate an expression to a boolean using JavaScript-like truthiness.
    pub fn evaluate_bool(
        &self,
        expression: &str,
        context: &Value,
    ) -> Result<bool, ExpressionError> {
        let result = self.evaluate_value(expression, context)?;
        Ok(Self::value_to_bool(&result))
    }

    /// Coerce a JSON value to boolean using JavaScript-like truthiness.
    pub fn value_to_bool(value: &Value) -> bool {
        match value {
            Value::Bool(b) => *b,
            Value::Null => false,
            Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(_) | Value::Object(_) => true,
        }
    }
}

impl Default for WorkflowEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
