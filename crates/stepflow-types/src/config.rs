//! Engine configuration types.
//!
//! `EngineConfig` represents the `config.toml` in the data directory. Every
//! field has a default so a missing or partial file still yields a usable
//! configuration.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the workflow engine and its adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Timeout applied to steps that do not declare `timeout_ms`.
    #[serde(default = "default_step_timeout_ms")]
    pub default_step_timeout_ms: u64,

    /// Upper bound for any computed retry delay.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Whether errors that fit no known class are retried.
    #[serde(default = "default_true")]
    pub retry_unclassified_errors: bool,

    /// Serialized step outputs above this size are replaced by a truncation marker.
    #[serde(default = "default_max_step_output_bytes")]
    pub max_step_output_bytes: usize,

    /// Capacity of the broadcast channel carrying execution events.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Request timeout for the HTTP step client.
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Endpoint of the agent invocation gateway (agent steps fail without it).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_gateway_url: Option<String>,
}

fn default_step_timeout_ms() -> u64 {
    300_000
}

fn default_max_retry_delay_ms() -> u64 {
    60_000
}

fn default_true() -> bool {
    true
}

fn default_max_step_output_bytes() -> usize {
    1024 * 1024
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_step_timeout_ms: default_step_timeout_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            retry_unclassified_errors: true,
            max_step_output_bytes: default_max_step_output_bytes(),
            event_bus_capacity: default_event_bus_capacity(),
            http_timeout_secs: default_http_timeout_secs(),
            agent_gateway_url: None,
        }
    }
}
