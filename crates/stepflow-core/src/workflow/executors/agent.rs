//! `agent` steps: hand the resolved input to the agent gateway.

use std::sync::Arc;

use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};

use crate::workflow::registry::{AgentGateway, StepContext, StepError, StepExecutor, StepFuture};

/// Runs `agent` steps and returns the gateway response verbatim.
pub struct AgentExecutor {
    gateway: Arc<dyn AgentGateway>,
}

impl AgentExecutor {
    pub fn new(gateway: Arc<dyn AgentGateway>) -> Self {
        Self { gateway }
    }
}

impl StepExecutor for AgentExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let StepConfig::Agent(config) = &step.config else {
                return Err(StepError::mismatch(step, StepType::Agent));
            };
            let agent_id = config.agent_id.trim();
            if agent_id.is_empty() {
                return Err(StepError::Config("resolved agent_id is empty".to_string()));
            }

            tracing::debug!(
                execution_id = %context.execution_id,
                step_id = %step.id,
                agent_id,
                "invoking agent"
            );
            self.gateway.invoke(agent_id, config.input.clone()).await
        })
    }
}
