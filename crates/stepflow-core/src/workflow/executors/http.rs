//! `http` steps: issue a request through the injected `HttpClient`.

use std::sync::Arc;

use serde_json::json;
use stepflow_types::workflow::{StepConfig, StepDefinition, StepType, HTTP_METHODS};

use crate::workflow::registry::{
    HttpClient, HttpRequest, StepContext, StepError, StepExecutor, StepFuture,
};

/// Runs `http` steps. Non-2xx responses become `StepError::Provider`.
pub struct HttpExecutor {
    client: Arc<dyn HttpClient>,
}

impl HttpExecutor {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self { client }
    }
}

impl StepExecutor for HttpExecutor {
    fn execute<'a>(
        &'a self,
        step: &'a StepDefinition,
        _context: &'a StepContext,
    ) -> StepFuture<'a> {
        Box::pin(async move {
            let StepConfig::Http(config) = &step.config else {
                return Err(StepError::mismatch(step, StepType::Http));
            };

            let method = config.method.trim().to_ascii_uppercase();
            if !HTTP_METHODS.contains(&method.as_str()) {
                return Err(StepError::Config(format!(
                    "unsupported http method '{}'",
                    config.method
                )));
            }
            let url = config.url.trim();
            if url.is_empty() {
                return Err(StepError::Config("resolved url is empty".to_string()));
            }

            tracing::debug!(step_id = %step.id, %method, url, "sending http request");

            let response = self
                .client
                .send(HttpRequest {
                    method: method.clone(),
                    url: url.to_string(),
                    headers: config.headers.clone(),
                    body: config.body.clone(),
                })
                .await?;

            if !(200..300).contains(&response.status) {
                return Err(StepError::Provider {
                    status: Some(response.status),
                    message: format!("{method} {url} returned HTTP {}", response.status),
                });
            }

            Ok(json!({
                "status": response.status,
                "headers": response.headers,
                "body": response.body,
            }))
        })
    }
}
