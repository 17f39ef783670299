//! Built-in step executors, one per `StepType`.

mod agent;
mod conditional;
mod delay;
mod http;
mod notification;
mod parallel;
mod transform;

pub use agent::AgentExecutor;
pub use conditional::ConditionalExecutor;
pub use delay::DelayExecutor;
pub use http::HttpExecutor;
pub use notification::NotificationExecutor;
pub use parallel::ParallelExecutor;
pub use transform::TransformExecutor;
