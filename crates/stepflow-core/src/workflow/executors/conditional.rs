//! `conditional` steps: evaluate a condition and report the branch.
//!
//! The decision is advisory. The engine runs steps strictly in order and does
//! not jump to `target_step`; later steps can read the decision from
//! `steps.<id>.branch_taken`.

use serde_json::{json, Value};
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};

use crate::workflow::expression::WorkflowEvaluator;
use crate::workflow::registry::{StepContext, StepError, StepExecutor, StepFuture};

pub struct ConditionalExecutor;

impl ConditionalExecutor {
    fn run(step: &StepDefinition, context: &StepContext) -> Result<Value, StepError> {
        let StepConfig::Conditional(config) = &step.config else {
            return Err(StepError::mismatch(step, StepType::Conditional));
        };
        let result = WorkflowEvaluator::new().evaluate_bool(&config.condition, &context.data)?;
        let (branch, target) = if result {
            ("true", &config.branches.on_true)
        } else {
            ("false", &config.branches.on_false)
        };

        tracing::debug!(step_id = %step.id, branch, target_step = %target, "condition evaluated");

        Ok(json!({
            "condition_result": result,
            "branch_taken": branch,
            "target_step": target,
        }))
    }
}

impl StepExecutor for ConditionalExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(std::future::ready(Self::run(step, context)))
    }
}
