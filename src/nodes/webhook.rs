use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::core::ExecutionContext;
use crate::error::NodeError;
use crate::nodes::executor::{NodeAction, NodeContext, NodeExecutor, NodeRunResult};

/// Delay before re-invoking the node after a network-level failure.
const NETWORK_RETRY_DELAY: Duration = Duration::from_secs(5);

const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Outbound HTTP call with `{{var}}` templating.
///
/// Network-level failures (timeout, connection refused) yield a `retry`
/// outcome; HTTP error statuses are surfaced as a successful `continue`
/// carrying the status so the graph can branch on it.
pub struct WebhookExecutor {
    client: reqwest::Client,
}

impl WebhookExecutor {
    pub fn new() -> Self {
        WebhookExecutor {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WebhookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for WebhookExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let url_template = config
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::ConfigError("webhook node requires a url".into()))?;
        let url = ctx.variables.resolve_template(url_template);
        let method = config
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("POST");
        let timeout_secs = config
            .get("timeout_secs")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            _ => self.client.post(&url),
        }
        .timeout(Duration::from_secs(timeout_secs));

        if let Some(headers) = config.get("headers").and_then(|v| v.as_object()) {
            for (key, value) in headers {
                if let Some(raw) = value.as_str() {
                    request = request.header(key, ctx.variables.resolve_template(raw));
                }
            }
        }
        if let Some(body) = config.get("body") {
            let rendered = match body {
                Value::String(template) => ctx.variables.resolve_template(template),
                other => ctx.variables.resolve_template(&other.to_string()),
            };
            request = request
                .header("Content-Type", "application/json")
                .body(rendered);
        }

        let started = Instant::now();
        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                let latency_ms = started.elapsed().as_millis() as u64;
                Ok(NodeRunResult::advance()
                    .with_output("status_code", Value::from(status))
                    .with_output("body", Value::String(body))
                    .with_output("latency_ms", Value::from(latency_ms))
                    .with_output("success", Value::Bool(status < 400)))
            }
            Err(err) => {
                // Transport failure: let the engine re-invoke us.
                tracing::warn!(node_id, error = %err, "webhook call failed at network level");
                Ok(NodeRunResult::advance().with_action(NodeAction::Retry {
                    delay: Some(NETWORK_RETRY_DELAY),
                }))
            }
        }
    }
}
