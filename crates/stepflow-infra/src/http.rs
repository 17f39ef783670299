//! `HttpClient` port backed by reqwest.
//!
//! One pooled `reqwest::Client` per engine with a request timeout taken from
//! `EngineConfig::http_timeout_secs`. Response bodies that parse as JSON are
//! surfaced as JSON, anything else as a string.

use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;
use stepflow_core::workflow::registry::{HttpClient, HttpRequest, HttpResponse, StepFuture};
use stepflow_core::workflow::StepError;

const USER_AGENT: &str = concat!("stepflow/", env!("CARGO_PKG_VERSION"));

/// Build the shared reqwest client used by the HTTP-speaking adapters.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
}

/// Map a reqwest failure onto the step error taxonomy.
pub(crate) fn classify(err: reqwest::Error, timeout: Duration, url: &str) -> StepError {
    if err.is_timeout() {
        StepError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else if err.is_builder() {
        StepError::Config(format!("invalid request to '{url}': {err}"))
    } else {
        StepError::Transport(format!("request to '{url}' failed: {err}"))
    }
}

/// Parse a response payload as JSON, falling back to a JSON string.
pub(crate) fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}

/// Real network client for `http` steps.
#[derive(Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpClient {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
            timeout,
        })
    }
}

impl HttpClient for ReqwestHttpClient {
    fn send(&self, request: HttpRequest) -> StepFuture<'_, HttpResponse> {
        Box::pin(async move {
            let method: reqwest::Method = request.method.parse().map_err(|_| {
                StepError::Config(format!("invalid HTTP method: {}", request.method))
            })?;

            let mut builder = self.client.request(method, &request.url);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            builder = match request.body {
                Some(Value::String(text)) => builder.body(text),
                Some(body) => builder.json(&body),
                None => builder,
            };

            let response = builder
                .send()
                .await
                .map_err(|e| classify(e, self.timeout, &request.url))?;

            let status = response.status().as_u16();
            let headers: BTreeMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or("<binary>").to_string(),
                    )
                })
                .collect();
            let text = response
                .text()
                .await
                .map_err(|e| classify(e, self.timeout, &request.url))?;

            tracing::debug!(
                url = request.url.as_str(),
                status,
                body_len = text.len(),
                "http request completed"
            );

            Ok(HttpResponse {
                status,
                headers,
                body: parse_body(text),
            })
        })
    }
}
