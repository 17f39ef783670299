//! `AgentGateway` port that forwards agent invocations over HTTP.
//!
//! Each invocation POSTs `{"agent_id": ..., "input": ...}` to the configured
//! gateway URL and returns the response body verbatim. Without a configured
//! URL every agent step fails with a config error.

use std::time::Duration;

use serde_json::{Value, json};
use stepflow_core::workflow::StepError;
use stepflow_core::workflow::registry::{AgentGateway, StepFuture};

use crate::http::{build_client, classify, parse_body};

/// HTTP client for an external agent gateway.
#[derive(Clone)]
pub struct HttpAgentGateway {
    client: reqwest::Client,
    endpoint: Option<String>,
    timeout: Duration,
}

impl HttpAgentGateway {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint,
            timeout,
        })
    }
}

impl AgentGateway for HttpAgentGateway {
    fn invoke<'a>(&'a self, agent_id: &'a str, input: Value) -> StepFuture<'a> {
        Box::pin(async move {
            let Some(endpoint) = self.endpoint.as_deref() else {
                return Err(StepError::Config(
                    "agent_gateway_url is not configured".to_string(),
                ));
            };

            tracing::debug!(agent_id, endpoint, "invoking agent");

            let response = self
                .client
                .post(endpoint)
                .json(&json!({ "agent_id": agent_id, "input": input }))
                .send()
                .await
                .map_err(|e| classify(e, self.timeout, endpoint))?;

            let status = response.status();
            let text = response
                .text()
                .await
                .map_err(|e| classify(e, self.timeout, endpoint))?;

            if !status.is_success() {
                return Err(StepError::Provider {
                    status: Some(status.as_u16()),
                    message: format!("agent '{agent_id}' returned {status}: {text}"),
                });
            }

            Ok(parse_body(text))
        })
    }
}
