//! `delay` steps: sleep for a fixed duration.

use std::time::Duration;

use serde_json::json;
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};

use crate::workflow::registry::{StepContext, StepError, StepExecutor, StepFuture};

pub struct DelayExecutor;

impl StepExecutor for DelayExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        _context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let StepConfig::Delay(config) = &step.config else {
                return Err(StepError::mismatch(step, StepType::Delay));
            };
            tokio::time::sleep(Duration::from_millis(config.duration_ms)).await;
            Ok(json!({ "delayed_ms": config.duration_ms }))
        })
    }
}
