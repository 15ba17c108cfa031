use async_trait::async_trait;
use serde_json::Value;

use crate::core::{ExecutionContext, Segment};
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeRunResult};
use crate::store::TicketAction;

/// Applies the `set` map from a node config directly to the variables.
/// String values are templated; other JSON values are stored as-is.
fn apply_assignments(set: &Value, ctx: &ExecutionContext) -> Vec<(String, Value)> {
    let mut applied = Vec::new();
    if let Some(map) = set.as_object() {
        for (path, value) in map {
            let resolved = match value {
                Value::String(template) => {
                    Value::String(ctx.variables.resolve_template(template))
                }
                other => other.clone(),
            };
            ctx.variables.set(path, Segment::from_value(&resolved));
            applied.push((path.clone(), resolved));
        }
    }
    applied
}

// ================================
// Action Node
// ================================

/// Ticket-domain side effects dispatched by the `action_type` discriminator,
/// plus optional direct variable assignments via `set`.
pub struct ActionExecutor;

#[async_trait]
impl NodeExecutor for ActionExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let mut result = NodeRunResult::advance();

        if let Some(set) = config.get("set") {
            for (path, value) in apply_assignments(set, ctx) {
                result.outputs.insert(path, value);
            }
        }

        if config.get("action_type").is_some() {
            let action: TicketAction = serde_json::from_value(config.clone())
                .map_err(|e| NodeError::ConfigError(e.to_string()))?;
            let entity_id = config
                .get("entity_id")
                .and_then(|v| v.as_str())
                .map(|t| ctx.variables.resolve_template(t))
                .unwrap_or_else(|| services.entity_id.clone());
            let applied = services.tickets.apply(&entity_id, action).await?;
            result.outputs.insert("applied".to_string(), applied);
            result
                .outputs
                .insert("entity_id".to_string(), Value::String(entity_id));
        }

        Ok(result)
    }
}

// ================================
// Script Node
// ================================

/// Declarative variable assignments. Sandboxed script execution is out of
/// scope; graphs keep their shape through the `set` map.
pub struct ScriptExecutor;

#[async_trait]
impl NodeExecutor for ScriptExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let set = config
            .get("set")
            .ok_or_else(|| NodeError::ConfigError("script node requires a `set` map".into()))?;
        let mut result = NodeRunResult::advance();
        for (path, value) in apply_assignments(set, ctx) {
            result.outputs.insert(path, value);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VariablePool;
    use crate::nodes::executor::test_support::services;
    use crate::nodes::NodeAction;
    use crate::store::RecordingTicketActions;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx(vars: Value) -> ExecutionContext {
        ExecutionContext::new("ex-1", VariablePool::from_value(&vars))
    }

    #[tokio::test]
    async fn test_action_set_writes_variables() {
        let ctx = ctx(json!({}));
        let config = json!({"set": {"x": 1, "label": "p-{{x}}"}});
        let result = ActionExecutor
            .execute("a1", &config, &ctx, &services())
            .await
            .unwrap();
        assert_eq!(result.action, NodeAction::Continue);
        assert_eq!(ctx.variables.get("x"), Some(Segment::Integer(1)));
        // Assignments apply in map order is not guaranteed; the template
        // only sees `x` if it was applied first, so assert on the output key.
        assert!(result.outputs.contains_key("label"));
    }

    #[tokio::test]
    async fn test_action_dispatches_ticket_side_effect() {
        let tickets = Arc::new(RecordingTicketActions::new());
        let mut services = services();
        services.tickets = tickets.clone();
        let ctx = ctx(json!({"ticket": {"id": "T-7"}}));
        let config = json!({
            "action_type": "change_priority",
            "priority": "urgent",
            "entity_id": "{{ticket.id}}"
        });
        let result = ActionExecutor
            .execute("a1", &config, &ctx, &services)
            .await
            .unwrap();
        assert_eq!(result.outputs.get("entity_id"), Some(&json!("T-7")));
        let applied = tickets.applied();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].0, "T-7");
        assert!(matches!(
            applied[0].1,
            TicketAction::ChangePriority { ref priority } if priority == "urgent"
        ));
    }

    #[tokio::test]
    async fn test_action_unknown_action_type() {
        let ctx = ctx(json!({}));
        let config = json!({"action_type": "explode"});
        let err = ActionExecutor
            .execute("a1", &config, &ctx, &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_script_requires_set() {
        let ctx = ctx(json!({}));
        let err = ScriptExecutor
            .execute("s1", &json!({}), &ctx, &services())
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_script_templates_from_existing_variables() {
        let ctx = ctx(json!({"ticket": {"subject": "vpn down"}}));
        let config = json!({"set": {"summary": "escalated: {{ticket.subject}}"}});
        ScriptExecutor
            .execute("s1", &config, &ctx, &services())
            .await
            .unwrap();
        assert_eq!(
            ctx.variables.get("summary"),
            Some(Segment::String("escalated: vpn down".into()))
        );
    }
}
