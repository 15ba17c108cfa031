use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::ExecutionContext;
use crate::error::NodeError;
use crate::nodes::executor::{NodeAction, NodeContext, NodeExecutor, NodeRunResult};

/// Suspends the execution; resolution happens asynchronously through the
/// approval manager, which calls back into the engine's resume path.
pub struct ApprovalExecutor;

#[async_trait]
impl NodeExecutor for ApprovalExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        // Validate the config shape up front so a malformed approval node
        // fails loudly instead of suspending forever.
        let _cfg: crate::model::ApprovalNodeConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let title = config
            .get("title")
            .and_then(|v| v.as_str())
            .map(|t| ctx.variables.resolve_template(t))
            .unwrap_or_else(|| format!("Approval required: {}", node_id));
        Ok(NodeRunResult::default()
            .with_action(NodeAction::Wait)
            .with_output("request", json!({"node_id": node_id, "title": title})))
    }
}

/// Generic human task: suspends until an external resume supplies the
/// task's result data.
pub struct HumanTaskExecutor;

#[async_trait]
impl NodeExecutor for HumanTaskExecutor {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let prompt = config
            .get("prompt")
            .and_then(|v| v.as_str())
            .map(|t| ctx.variables.resolve_template(t));
        let assignee = config
            .get("assignee")
            .and_then(|v| v.as_str())
            .map(|t| ctx.variables.resolve_template(t));
        Ok(NodeRunResult::default()
            .with_action(NodeAction::Wait)
            .with_output(
                "request",
                json!({"node_id": node_id, "prompt": prompt, "assignee": assignee}),
            ))
    }
}
