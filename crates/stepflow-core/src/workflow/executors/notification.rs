//! `notification` steps: forward a message to the notifier port.

use std::sync::Arc;

use serde_json::json;
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};

use crate::workflow::registry::{Notifier, StepContext, StepError, StepExecutor, StepFuture};

pub struct NotificationExecutor {
    notifier: Arc<dyn Notifier>,
}

impl NotificationExecutor {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }
}

impl StepExecutor for NotificationExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        _context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let StepConfig::Notification(config) = &step.config else {
                return Err(StepError::mismatch(step, StepType::Notification));
            };
            if config.channel.trim().is_empty() {
                return Err(StepError::Config("resolved channel is empty".to_string()));
            }
            self.notifier.notify(config).await?;
            Ok(json!({ "channel": config.channel, "delivered": true }))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use stepflow_types::workflow::NotificationConfig;
    use uuid::Uuid;

    use super::*;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Notifier for Outbox {
        fn notify<'a>(&'a self, notification: &'a NotificationConfig) -> StepFuture<'a, ()> {
            self.sent
                .lock()
                .unwrap()
                .push((notification.channel.clone(), notification.message.clone()));
            Box::pin(async { Ok(()) })
        }
    }

    fn step(channel: &str) -> StepDefinition {
        StepDefinition::new(
            "step_notify",
            "Notify",
            StepConfig::Notification(NotificationConfig {
                channel: channel.to_string(),
                message: "order 42 shipped".to_string(),
                recipients: vec!["ops@example.com".to_string()],
            }),
        )
    }

    fn context() -> StepContext {
        StepContext {
            execution_id: Uuid::now_v7(),
            workflow_id: Uuid::now_v7(),
            data: Arc::new(json!({})),
        }
    }

    #[tokio::test]
    async fn test_delivers_through_notifier() {
        let outbox = Arc::new(Outbox::default());
        let exec = NotificationExecutor::new(outbox.clone());
        let output = exec.execute(&step("email"), &context()).await.unwrap();
        assert_eq!(output, json!({ "channel": "email", "delivered": true }));
        assert_eq!(
            outbox.sent.lock().unwrap().as_slice(),
            &[("email".to_string(), "order 42 shipped".to_string())]
        );
    }

    #[tokio::test]
    async fn test_blank_channel_is_config_error() {
        let outbox = Arc::new(Outbox::default());
        let exec = NotificationExecutor::new(outbox.clone());
        let err = exec.execute(&step(""), &context()).await.unwrap_err();
        assert!(matches!(err, StepError::Config(_)));
        assert!(outbox.sent.lock().unwrap().is_empty());
    }
}
