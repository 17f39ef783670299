//! `transform` steps: pure expression evaluation over the context.

use serde_json::{Map, Value};
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};

use crate::workflow::expression::WorkflowEvaluator;
use crate::workflow::registry::{StepContext, StepError, StepExecutor, StepFuture};

/// Evaluates `expression` and returns `{ <output_key>: value }`.
pub struct TransformExecutor;

impl TransformExecutor {
    fn run(step: &StepDefinition, context: &StepContext) -> Result<Value, StepError> {
        let StepConfig::Transform(config) = &step.config else {
            return Err(StepError::mismatch(step, StepType::Transform));
        };
        let value = WorkflowEvaluator::new().evaluate_defined(&config.expression, &context.data)?;

        let mut output = Map::with_capacity(1);
        output.insert(config.output_key.clone(), value);
        Ok(Value::Object(output))
    }
}

impl StepExecutor for TransformExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(std::future::ready(Self::run(step, context)))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use stepflow_types::workflow::TransformConfig;
    use uuid::Uuid;

    use super::*;

    fn step(expression: &str, output_key: &str) -> StepDefinition {
        StepDefinition::new(
            "step_shape",
            "Shape",
            StepConfig::Transform(TransformConfig {
                expression: expression.to_string(),
                output_key: output_key.to_string(),
            }),
        )
    }

    fn context() -> StepContext {
        StepContext {
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            data: Arc::new(json!({
                "input": { "name": "ada" },
                "steps": { "step_fetch": { "body": { "items": [1, 2, 3] } } },
            })),
        }
    }

    #[tokio::test]
    async fn test_output_is_keyed_by_output_key() {
        let output = TransformExecutor
            .execute(&step("steps.step_fetch.body.items|length", "count"), &context())
            .await
            .unwrap();
        assert_eq!(output["count"].as_f64(), Some(3.0));
    }

    #[tokio::test]
    async fn test_default_output_key() {
        let output = TransformExecutor
            .execute(&step("input.name|upper", "result"), &context())
            .await
            .unwrap();
        assert_eq!(output, json!({ "result": "ADA" }));
    }

    #[tokio::test]
    async fn test_bad_expression_is_not_retriable() {
        let err = TransformExecutor
            .execute(&step("steps.step_none.body", "result"), &context())
            .await
            .unwrap_err();
        assert!(matches!(err, StepError::Expression(_)));
        assert!(!err.is_retriable(true));
    }
}
