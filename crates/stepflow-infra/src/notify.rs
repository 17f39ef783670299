//! `Notifier` port that emits notifications as tracing events.
//!
//! Delivery to real channels (chat, email) lives outside the engine; this
//! adapter makes every notification visible in the logs so `notification`
//! steps succeed in any deployment.

use stepflow_core::workflow::registry::{Notifier, StepFuture};
use stepflow_types::workflow::NotificationConfig;

/// Logs each notification at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify<'a>(&'a self, notification: &'a NotificationConfig) -> StepFuture<'a, ()> {
        Box::pin(async move {
            tracing::info!(
                target: "stepflow::notification",
                channel = notification.channel.as_str(),
                recipients = ?notification.recipients,
                body = notification.message.as_str(),
                "notification sent"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_notifier_always_delivers() {
        let notification = NotificationConfig {
            channel: "ops".to_string(),
            message: "order 42 synced".to_string(),
            recipients: vec!["oncall@example.com".to_string()],
        };
        LogNotifier.notify(&notification).await.unwrap();
    }
}
