use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::{ExecutionContext, Segment};
use crate::error::NodeError;
use crate::evaluator::{evaluate_operator, ConditionOperator};
use crate::nodes::executor::{NodeAction, NodeContext, NodeExecutor, NodeRunResult};

// ================================
// Start Node
// ================================

pub struct StartExecutor;

#[async_trait]
impl NodeExecutor for StartExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        _config: &Value,
        _ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        // Variables are already seeded from the trigger payload.
        Ok(NodeRunResult::advance())
    }
}

// ================================
// End Node
// ================================

pub struct EndExecutor;

#[async_trait]
impl NodeExecutor for EndExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let mut result = NodeRunResult::default().with_action(NodeAction::Complete);
        // Optional declared outputs: name -> template or dot path.
        if let Some(outputs) = config.get("outputs").and_then(|v| v.as_object()) {
            for (name, spec) in outputs {
                let value = match spec {
                    Value::String(template) => {
                        Value::String(ctx.variables.resolve_template(template))
                    }
                    other => other.clone(),
                };
                result.outputs.insert(name.clone(), value);
            }
        }
        Ok(result)
    }
}

// ================================
// Condition Node
// ================================

#[derive(Deserialize)]
struct ConditionConfig {
    field: String,
    operator: ConditionOperator,
    #[serde(default)]
    value: Value,
}

/// Evaluates a single field/operator/value check and attaches the boolean
/// result as output; routing happens on the outgoing edges.
pub struct ConditionExecutor;

#[async_trait]
impl NodeExecutor for ConditionExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: ConditionConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let resolved = ctx.variables.get(&cfg.field);
        let result = match cfg.operator {
            ConditionOperator::Exists => resolved.is_some(),
            ConditionOperator::NotExists => resolved.is_none(),
            op => evaluate_operator(op, &resolved.unwrap_or(Segment::None), &cfg.value),
        };
        Ok(NodeRunResult::advance()
            .with_output("result", Value::Bool(result))
            .with_output("field", Value::String(cfg.field)))
    }
}
