//! Retry and backoff policy for failed step attempts.
//!
//! Stateless: the engine owns the attempt counter and asks the policy what to
//! do after each failure. Executors never see retry history.

use std::time::Duration;

use stepflow_types::config::EngineConfig;
use stepflow_types::workflow::{Backoff, ErrorHandling, OnError, RetryConfig, StepDefinition};

use super::registry::StepError;

// ---------------------------------------------------------------------------
// RetryDecision
// ---------------------------------------------------------------------------

/// What the engine should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run the same step again.
    RetryAfter(Duration),
    /// The error is retriable but no attempts remain.
    Exhausted,
    /// The error class is never retried.
    NotRetriable,
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Policy-wide retry settings shared by every execution of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Cap applied to every computed delay.
    pub max_delay_ms: u64,
    /// Whether unclassified errors are retried (fail-open when true).
    pub retry_unclassified: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delay_ms: 60_000,
            retry_unclassified: true,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_delay_ms: config.max_retry_delay_ms,
            retry_unclassified: config.retry_unclassified_errors,
        }
    }

    /// Retry settings in force for `step`.
    ///
    /// A step's own `retry` block wins. Otherwise a workflow whose policy is
    /// `on_error: retry` gives every step `max_retries + 1` attempts with a
    /// fixed `retry_delay_ms` between them. Anything else runs once.
    pub fn effective(step: &StepDefinition, handling: &ErrorHandling) -> Option<RetryConfig> {
        if let Some(retry) = step.retry {
            return Some(retry);
        }
        (handling.on_error == OnError::Retry).then(|| RetryConfig {
            max_attempts: handling.max_retries.saturating_add(1),
            backoff: Backoff::Fixed,
            initial_delay_ms: handling.retry_delay_ms,
        })
    }

    /// Delay before the attempt that follows failed attempt number `attempt`
    /// (1-based).
    pub fn delay_for(&self, config: &RetryConfig, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = config.initial_delay_ms;
        let raw = match config.backoff {
            Backoff::Fixed => initial,
            Backoff::Exponential => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                initial.saturating_mul(factor)
            }
            Backoff::Linear => initial.saturating_mul(u64::from(attempt)),
        };
        Duration::from_millis(raw.min(self.max_delay_ms))
    }

    /// Decide what follows failed attempt `attempt` of a step.
    pub fn decide(
        &self,
        config: Option<&RetryConfig>,
        attempt: u32,
        error: &StepError,
    ) -> RetryDecision {
        if !error.is_retriable(self.retry_unclassified) {
            return RetryDecision::NotRetriable;
        }
        match config {
            Some(config) if attempt < config.max_attempts => {
                RetryDecision::RetryAfter(self.delay_for(config, attempt))
            }
            _ => RetryDecision::Exhausted,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepflow_types::workflow::{DelayConfig, StepConfig};

    fn config(backoff: Backoff, initial_delay_ms: u64, max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff,
            initial_delay_ms,
        }
    }

    fn policy(max_delay_ms: u64) -> RetryPolicy {
        RetryPolicy {
            max_delay_ms,
            retry_unclassified: true,
        }
    }

    fn step() -> StepDefinition {
        StepDefinition::new(
            "step_wait",
            "Wait",
            StepConfig::Delay(DelayConfig { duration_ms: 1 }),
        )
    }

    // -------------------------------------------------------------------
    // Delays
    // -------------------------------------------------------------------

    #[test]
    fn test_backoff_formulas() {
        let p = policy(u64::MAX);
        let ms = |c: &RetryConfig, n| p.delay_for(c, n).as_millis() as u64;

        let fixed = config(Backoff::Fixed, 250, 5);
        assert_eq!([ms(&fixed, 1), ms(&fixed, 2), ms(&fixed, 4)], [250, 250, 250]);

        let exp = config(Backoff::Exponential, 100, 5);
        assert_eq!([ms(&exp, 1), ms(&exp, 2), ms(&exp, 3), ms(&exp, 4)], [100, 200, 400, 800]);

        let linear = config(Backoff::Linear, 100, 5);
        assert_eq!([ms(&linear, 1), ms(&linear, 2), ms(&linear, 3)], [100, 200, 300]);
    }

    #[test]
    fn test_exponential_is_monotonic_and_capped() {
        let p = policy(5_000);
        let exp = config(Backoff::Exponential, 300, 5);
        let mut previous = Duration::ZERO;
        for attempt in 1..=80 {
            let delay = p.delay_for(&exp, attempt);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(5_000));
            previous = delay;
        }
        assert_eq!(previous, Duration::from_millis(5_000));
    }

    #[test]
    fn test_attempt_zero_is_treated_as_first() {
        let exp = config(Backoff::Exponential, 100, 5);
        assert_eq!(policy(10_000).delay_for(&exp, 0), Duration::from_millis(100));
    }

    // -------------------------------------------------------------------
    // Effective config
    // -------------------------------------------------------------------

    #[test]
    fn test_step_retry_wins_over_workflow_policy() {
        let own = config(Backoff::Linear, 10, 2);
        let handling = ErrorHandling {
            on_error: OnError::Retry,
            max_retries: 4,
            retry_delay_ms: 999,
        };
        let effective = RetryPolicy::effective(&step().with_retry(own), &handling);
        assert_eq!(effective, Some(own));
    }

    #[test]
    fn test_workflow_retry_policy_derives_fixed_config() {
        let handling = ErrorHandling {
            on_error: OnError::Retry,
            max_retries: 2,
            retry_delay_ms: 1_000,
        };
        let effective = RetryPolicy::effective(&step(), &handling).unwrap();
        assert_eq!(effective.max_attempts, 3);
        assert_eq!(effective.backoff, Backoff::Fixed);
        assert_eq!(effective.initial_delay_ms, 1_000);
    }

    #[test]
    fn test_fail_policy_without_step_retry_runs_once() {
        assert_eq!(RetryPolicy::effective(&step(), &ErrorHandling::default()), None);
    }

    // -------------------------------------------------------------------
    // Decisions
    // -------------------------------------------------------------------

    #[test]
    fn test_decide() {
        let p = policy(60_000);
        let c = config(Backoff::Exponential, 100, 3);
        let transient = StepError::Transport("reset".into());

        assert_eq!(
            p.decide(Some(&c), 1, &transient),
            RetryDecision::RetryAfter(Duration::from_millis(100))
        );
        assert_eq!(
            p.decide(Some(&c), 2, &transient),
            RetryDecision::RetryAfter(Duration::from_millis(200))
        );
        assert_eq!(p.decide(Some(&c), 3, &transient), RetryDecision::Exhausted);
        assert_eq!(p.decide(None, 1, &transient), RetryDecision::Exhausted);
        assert_eq!(
            p.decide(Some(&c), 1, &StepError::Config("bad".into())),
            RetryDecision::NotRetriable
        );
    }

    #[test]
    fn test_unclassified_errors_follow_flag() {
        let c = config(Backoff::Fixed, 10, 3);
        let unknown = StepError::Other("???".into());
        let closed = RetryPolicy {
            max_delay_ms: 1_000,
            retry_unclassified: false,
        };
        assert_eq!(closed.decide(Some(&c), 1, &unknown), RetryDecision::NotRetriable);
        assert!(matches!(
            policy(1_000).decide(Some(&c), 1, &unknown),
            RetryDecision::RetryAfter(_)
        ));
    }

    #[test]
    fn test_from_config() {
        let engine = EngineConfig {
            max_retry_delay_ms: 1_234,
            retry_unclassified_errors: false,
            ..EngineConfig::default()
        };
        assert_eq!(
            RetryPolicy::from_config(&engine),
            RetryPolicy {
                max_delay_ms: 1_234,
                retry_unclassified: false
            }
        );
    }
}
