//! Executors for nodes backed by external services the engine does not
//! own. They resolve the request descriptor against the variables and hand
//! it to the graph as output; the host wires real providers behind webhook
//! calls or its own integration layer.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ExecutionContext;
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeRunResult};

fn resolve_descriptor(value: &Value, ctx: &ExecutionContext) -> Value {
    match value {
        Value::String(template) => Value::String(ctx.variables.resolve_template(template)),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_descriptor(v, ctx)))
                .collect(),
        ),
        Value::Array(arr) => {
            Value::Array(arr.iter().map(|v| resolve_descriptor(v, ctx)).collect())
        }
        other => other.clone(),
    }
}

/// External system call descriptor (banking, CRM, ...). The resolved
/// request is attached as output for the host to act on.
pub struct IntegrationExecutor;

#[async_trait]
impl NodeExecutor for IntegrationExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let service = config
            .get("service")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::ConfigError("integration node requires a service".into()))?;
        let operation = config
            .get("operation")
            .and_then(|v| v.as_str())
            .unwrap_or("default");
        let request = config
            .get("params")
            .map(|p| resolve_descriptor(p, ctx))
            .unwrap_or(Value::Null);
        Ok(NodeRunResult::advance()
            .with_output("service", Value::String(service.to_string()))
            .with_output("operation", Value::String(operation.to_string()))
            .with_output("request", request))
    }
}

/// Prediction request descriptor. No model runtime is attached here; the
/// resolved input is surfaced so downstream nodes (or a webhook to the ML
/// service) can branch on it.
pub struct MlPredictionExecutor;

#[async_trait]
impl NodeExecutor for MlPredictionExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let model = config
            .get("model")
            .and_then(|v| v.as_str())
            .ok_or_else(|| NodeError::ConfigError("ml_prediction node requires a model".into()))?;
        let input = config
            .get("input")
            .map(|p| resolve_descriptor(p, ctx))
            .unwrap_or_else(|| ctx.variables.snapshot());
        Ok(NodeRunResult::advance()
            .with_output("model", Value::String(model.to_string()))
            .with_output("input", input)
            .with_output("prediction", json!(null)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VariablePool;
    use crate::nodes::executor::test_support::services;

    #[tokio::test]
    async fn test_integration_resolves_nested_params() {
        let ctx = ExecutionContext::new(
            "ex-1",
            VariablePool::from_value(&json!({"ticket": {"id": "T-5", "amount": 120}})),
        );
        let config = json!({
            "service": "billing",
            "operation": "refund",
            "params": {"ticket": "{{ticket.id}}", "lines": [{"amount": "{{ticket.amount}}"}]}
        });
        let result = IntegrationExecutor
            .execute("i1", &config, &ctx, &services())
            .await
            .unwrap();
        assert_eq!(result.outputs["request"]["ticket"], json!("T-5"));
        assert_eq!(result.outputs["request"]["lines"][0]["amount"], json!("120"));
    }

    #[tokio::test]
    async fn test_ml_prediction_requires_model() {
        let ctx = ExecutionContext::new("ex-1", VariablePool::new());
        let err = MlPredictionExecutor
            .execute("m1", &json!({}), &ctx, &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }
}
