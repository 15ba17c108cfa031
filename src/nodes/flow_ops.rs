use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::ExecutionContext;
use crate::error::NodeError;
use crate::evaluator::evaluate_condition;
use crate::model::EdgeCondition;
use crate::nodes::executor::{NodeAction, NodeContext, NodeExecutor, NodeRunResult};

// ================================
// Loop Node
// ================================

#[derive(Deserialize)]
struct LoopConfig {
    /// Node to jump back to while the loop continues.
    target: String,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    /// Optional while-condition; the loop stops once it fails.
    #[serde(default)]
    condition: Option<EdgeCondition>,
}

fn default_max_iterations() -> u32 {
    10
}

/// Bounded back-edge: branches to `target` until `max_iterations` is
/// reached or the condition fails, then falls through to outgoing edges.
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: LoopConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let iteration = ctx.increment_loop(node_id);
        let condition_holds = cfg
            .condition
            .as_ref()
            .map(|c| evaluate_condition(c, &ctx.variables))
            .unwrap_or(true);
        let result = NodeRunResult::default()
            .with_output("iteration", Value::from(iteration))
            .with_output("condition_holds", Value::Bool(condition_holds));
        if iteration < cfg.max_iterations && condition_holds {
            Ok(result.with_action(NodeAction::Branch { target: cfg.target }))
        } else {
            Ok(result)
        }
    }
}

// ================================
// Sub-workflow Node
// ================================

#[derive(Deserialize)]
struct SubWorkflowConfig {
    definition_id: String,
    /// Variables passed to the child; string values are templated.
    #[serde(default)]
    input: Value,
}

/// Runs another definition to completion through the
/// [`SubWorkflowRunner`](crate::nodes::SubWorkflowRunner) seam and merges
/// its outputs.
pub struct SubWorkflowExecutor;

#[async_trait]
impl NodeExecutor for SubWorkflowExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: SubWorkflowConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let runner = services.sub_workflows.as_ref().ok_or_else(|| {
            NodeError::ExecutionError("no sub-workflow runner attached".into())
        })?;
        let payload = match &cfg.input {
            Value::Object(map) => {
                let mut resolved = serde_json::Map::new();
                for (key, value) in map {
                    let v = match value {
                        Value::String(t) => Value::String(ctx.variables.resolve_template(t)),
                        other => other.clone(),
                    };
                    resolved.insert(key.clone(), v);
                }
                Value::Object(resolved)
            }
            Value::Null => ctx.variables.snapshot(),
            other => other.clone(),
        };
        let outputs = runner
            .run(&cfg.definition_id, payload, &ctx.execution_id)
            .await?;
        Ok(NodeRunResult::advance()
            .with_output("definition_id", Value::String(cfg.definition_id))
            .with_output("outputs", outputs))
    }
}

// ================================
// Parallel Node
// ================================

#[derive(Deserialize)]
struct ParallelConfig {
    targets: Vec<String>,
}

/// Declares a fan-out; the engine spawns one child branch per target and
/// merges their variable maps back in listed order.
pub struct ParallelExecutor;

#[async_trait]
impl NodeExecutor for ParallelExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        _ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: ParallelConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        if cfg.targets.is_empty() {
            return Err(NodeError::ConfigError(format!(
                "parallel node {} has no targets",
                node_id
            )));
        }
        Ok(NodeRunResult::default().with_action(NodeAction::Parallel {
            targets: cfg.targets,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VariablePool;
    use crate::nodes::executor::test_support::services;
    use serde_json::json;

    fn ctx(vars: Value) -> ExecutionContext {
        ExecutionContext::new("ex-1", VariablePool::from_value(&vars))
    }

    #[tokio::test]
    async fn test_loop_branches_until_max_iterations() {
        let ctx = ctx(json!({}));
        let config = json!({"target": "work", "max_iterations": 3});
        for expected in 1..3u32 {
            let result = LoopExecutor
                .execute("loop-1", &config, &ctx, &services())
                .await
                .unwrap();
            assert_eq!(
                result.action,
                NodeAction::Branch { target: "work".into() },
                "iteration {}",
                expected
            );
        }
        let result = LoopExecutor
            .execute("loop-1", &config, &ctx, &services())
            .await
            .unwrap();
        assert_eq!(result.action, NodeAction::Continue);
        assert_eq!(result.outputs.get("iteration"), Some(&json!(3)));
    }

    #[tokio::test]
    async fn test_loop_stops_when_condition_fails() {
        let ctx = ctx(json!({"remaining": 0}));
        let config = json!({
            "target": "work",
            "max_iterations": 100,
            "condition": {"field": "remaining", "operator": "greater_than", "value": 0}
        });
        let result = LoopExecutor
            .execute("loop-1", &config, &ctx, &services())
            .await
            .unwrap();
        assert_eq!(result.action, NodeAction::Continue);
        assert_eq!(result.outputs.get("condition_holds"), Some(&json!(false)));
    }

    #[tokio::test]
    async fn test_parallel_requires_targets() {
        let ctx = ctx(json!({}));
        let err = ParallelExecutor
            .execute("p1", &json!({"targets": []}), &ctx, &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_parallel_declares_targets() {
        let ctx = ctx(json!({}));
        let result = ParallelExecutor
            .execute("p1", &json!({"targets": ["a", "b"]}), &ctx, &services())
            .await
            .unwrap();
        assert_eq!(
            result.action,
            NodeAction::Parallel {
                targets: vec!["a".into(), "b".into()]
            }
        );
    }

    #[tokio::test]
    async fn test_sub_workflow_without_runner() {
        let ctx = ctx(json!({}));
        let err = SubWorkflowExecutor
            .execute("s1", &json!({"definition_id": "wf-2"}), &ctx, &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ExecutionError(_)));
    }
}
