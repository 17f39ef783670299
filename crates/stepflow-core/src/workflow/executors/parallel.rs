//! `parallel` steps: fan sub-steps out on a `JoinSet` and join the outcomes.
//!
//! Every sub-step sees the same read-only context snapshot, is resolved
//! against it independently, and gets a single attempt bounded by its own
//! timeout (or the engine default). Retrying a
//! failed fan-out is the parent step's business.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType};
use tokio::task::JoinSet;

use crate::workflow::registry::{
    dispatch, StepContext, StepError, StepExecutor, StepFuture, StepRegistry,
};
use crate::workflow::resolver::resolve_step;

pub struct ParallelExecutor {
    registry: StepRegistry,
    default_timeout: Duration,
}

impl ParallelExecutor {
    /// `registry` must not contain a `parallel` executor itself.
    pub fn new(registry: StepRegistry, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }
}

impl StepExecutor for ParallelExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let StepConfig::Parallel(config) = &step.config else {
                return Err(StepError::mismatch(step, StepType::Parallel));
            };

            let mut results = BTreeMap::new();
            let mut errors = BTreeMap::new();
            let mut set = JoinSet::new();
            let mut task_ids = HashMap::new();

            for sub in &config.steps {
                let Some(executor) = self.registry.get(sub.step_type()) else {
                    errors.insert(
                        sub.id.clone(),
                        StepError::Config(format!(
                            "no executor for {} steps inside parallel",
                            sub.step_type()
                        )),
                    );
                    continue;
                };
                let sub = match resolve_step(sub, &context.data) {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        errors.insert(sub.id.clone(), e);
                        continue;
                    }
                };
                let timeout = sub
                    .timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(self.default_timeout);
                let sub_id = sub.id.clone();
                let ctx = context.clone();

                let handle = set.spawn(async move {
                    dispatch(executor.as_ref(), &sub, &ctx, timeout).await
                });
                task_ids.insert(handle.id(), sub_id);
            }

            tracing::debug!(
                execution_id = %context.execution_id,
                step_id = %step.id,
                sub_steps = config.steps.len(),
                wait_for_all = config.wait_for_all,
                "parallel fan-out"
            );

            let fail_fast = !config.wait_for_all;
            if !(fail_fast && !errors.is_empty()) {
                while let Some(joined) = set.join_next_with_id().await {
                    let (task_id, outcome) = match joined {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(step_id = %step.id, error = %e, "parallel sub-task panicked");
                            (e.id(), Err(StepError::Other(format!("sub-step task failed: {e}"))))
                        }
                    };
                    let Some(id) = task_ids.remove(&task_id) else {
                        continue;
                    };
                    match outcome {
                        Ok(output) => {
                            results.insert(id, output);
                        }
                        Err(e) => {
                            tracing::debug!(step_id = %step.id, sub_step_id = %id, error = %e, "sub-step failed");
                            errors.insert(id, e);
                            if fail_fast {
                                break;
                            }
                        }
                    }
                }
            }
            // Remaining sub-steps are abandoned when failing fast.
            set.abort_all();

            if errors.is_empty() {
                Ok(json!({ "results": results, "errors": {} }))
            } else {
                Err(StepError::Parallel { results, errors })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use stepflow_types::workflow::{DelayConfig, ParallelConfig, TransformConfig};
    use uuid::Uuid;

    use super::*;

    /// Fails any transform whose expression is `"fail"`, else echoes the id.
    struct Scripted {
        finished: Arc<AtomicUsize>,
    }

    impl StepExecutor for Scripted {
        fn execute<'a>(
            &'a self,
            step: &'a StepDefinition,
            _context: &'a StepContext,
        ) -> StepFuture<'a> {
            Box::pin(async move {
                match &step.config {
                    StepConfig::Transform(t) if t.expression == "fail" => {
                        Err(StepError::Provider {
                            status: Some(503),
                            message: "unavailable".into(),
                        })
                    }
                    StepConfig::Delay(d) => {
                        tokio::time::sleep(Duration::from_millis(d.duration_ms)).await;
                        self.finished.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({ "slept": d.duration_ms }))
                    }
                    _ => {
                        self.finished.fetch_add(1, Ordering::SeqCst);
                        Ok(json!({ "id": step.id }))
                    }
                }
            })
        }
    }

    fn transform(id: &str, expression: &str) -> StepDefinition {
        StepDefinition::new(
            id,
            id,
            StepConfig::Transform(TransformConfig {
                expression: expression.to_string(),
                output_key: "result".to_string(),
            }),
        )
    }

    fn delay(id: &str, ms: u64) -> StepDefinition {
        StepDefinition::new(id, id, StepConfig::Delay(DelayConfig { duration_ms: ms }))
    }

    fn parallel(steps: Vec<StepDefinition>, wait_for_all: bool) -> StepDefinition {
        StepDefinition::new(
            "step_fan",
            "Fan out",
            StepConfig::Parallel(ParallelConfig {
                steps,
                wait_for_all,
            }),
        )
    }

    fn executor() -> (ParallelExecutor, Arc<AtomicUsize>) {
        let finished = Arc::new(AtomicUsize::new(0));
        let registry = StepRegistry::new()
            .with(
                StepType::Transform,
                Scripted {
                    finished: finished.clone(),
                },
            )
            .with(
                StepType::Delay,
                Scripted {
                    finished: finished.clone(),
                },
            );
        (
            ParallelExecutor::new(registry, Duration::from_secs(5)),
            finished,
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
    async fn test_all_succeed() {
        let (exec, _) = executor();
        let step = parallel(
            vec![transform("step_a", "x"), transform("step_b", "y")],
            true,
        );
        let output = exec.execute(&step, &context()).await.unwrap();
        assert_eq!(output["results"]["step_a"], json!({ "id": "step_a" }));
        assert_eq!(output["results"]["step_b"], json!({ "id": "step_b" }));
        assert_eq!(output["errors"], json!({}));
    }

    #[tokio::test]
    async fn test_wait_for_all_carries_successes_and_failure() {
        let (exec, _) = executor();
        let step = parallel(
            vec![
                transform("step_p1", "x"),
                transform("step_p2", "y"),
                transform("step_p3", "fail"),
            ],
            true,
        );
        let err = exec.execute(&step, &context()).await.unwrap_err();
        let StepError::Parallel { results, errors } = err else {
            panic!("expected a parallel failure");
        };
        assert_eq!(results.len(), 2);
        assert_eq!(errors.len(), 1);
        assert!(errors.contains_key("step_p3"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_abandons_slow_sub_steps() {
        let (exec, finished) = executor();
        let step = parallel(
            vec![delay("step_slow", 10_000), transform("step_bad", "fail")],
            false,
        );
        let err = exec.execute(&step, &context()).await.unwrap_err();
        let StepError::Parallel { results, errors } = err else {
            panic!("expected a parallel failure");
        };
        assert!(results.is_empty());
        assert!(errors.contains_key("step_bad"));

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sub_step_timeout_is_reported_per_sub_step() {
        let (exec, _) = executor();
        let step = parallel(
            vec![
                delay("step_slow", 10_000).with_timeout_ms(100),
                transform("step_fast", "x"),
            ],
            true,
        );
        let err = exec.execute(&step, &context()).await.unwrap_err();
        let StepError::Parallel { results, errors } = err else {
            panic!("expected a parallel failure");
        };
        assert!(results.contains_key("step_fast"));
        assert!(matches!(
            errors.get("step_slow"),
            Some(StepError::Timeout { timeout_ms: 100 })
        ));
    }

    #[tokio::test]
    async fn test_unresolvable_sub_step_fails_alone() {
        let (exec, finished) = executor();
        let step = parallel(
            vec![
                transform("step_a", "x"),
                transform("step_bad", "{{ input.missing }}"),
                transform("step_c", "y"),
            ],
            true,
        );
        let err = exec.execute(&step, &context()).await.unwrap_err();
        let StepError::Parallel { results, errors } = err else {
            panic!("expected a parallel failure");
        };
        assert_eq!(results.len(), 2);
        assert!(results.contains_key("step_a") && results.contains_key("step_c"));
        assert!(matches!(errors.get("step_bad"), Some(StepError::Expression(_))));
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sub_steps_are_resolved_against_context() {
        let (exec, _) = executor();
        let step = parallel(vec![transform("step_a", "{{ input.name }}")], true);
        let ctx = StepContext {
            data: Arc::new(json!({ "input": { "name": "ada" } })),
            ..context()
        };
        // The scripted executor fails only the literal expression "fail".
        let output = exec.execute(&step, &ctx).await.unwrap();
        assert_eq!(output["results"]["step_a"], json!({ "id": "step_a" }));

        let failing = parallel(vec![transform("step_b", "{{ input.verdict }}")], true);
        let ctx = StepContext {
            data: Arc::new(json!({ "input": { "verdict": "fail" } })),
            ..context()
        };
        let err = exec.execute(&failing, &ctx).await.unwrap_err();
        let StepError::Parallel { errors, .. } = err else {
            panic!("expected a parallel failure");
        };
        assert!(matches!(errors.get("step_b"), Some(StepError::Provider { .. })));
    }

    #[tokio::test]
    async fn test_unregistered_sub_step_type_is_config_error() {
        let (exec, _) = executor();
        let notify = StepDefinition::new(
            "step_tell",
            "Tell",
            StepConfig::Notification(stepflow_types::workflow::NotificationConfig {
                channel: "log".into(),
                message: "hi".into(),
                recipients: vec![],
            }),
        );
        let err = exec
            .execute(&parallel(vec![notify], true), &context())
            .await
            .unwrap_err();
        assert!(err.to_failure(true).details.is_some());
        assert!(!err.is_retriable(true));
    }
}
