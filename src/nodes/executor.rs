use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::core::{ExecutionContext, RuntimeContext};
use crate::error::NodeError;
use crate::store::{NotificationSender, TicketActions};

/// What the engine should do after a node finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeAction {
    /// Evaluate outgoing edges and advance.
    Continue,
    /// Suspend the execution until an external resume call.
    Wait,
    /// Finalize the execution as completed.
    Complete,
    /// Raise a node-execution error.
    Fail(String),
    /// Re-invoke the same node after a delay (backoff-calculated when
    /// `None`).
    Retry { delay: Option<Duration> },
    /// Jump directly to a named node, bypassing edge evaluation.
    Branch { target: String },
    /// Fan out to the named nodes concurrently.
    Parallel { targets: Vec<String> },
}

impl NodeAction {
    pub fn name(&self) -> &'static str {
        match self {
            NodeAction::Continue => "continue",
            NodeAction::Wait => "wait",
            NodeAction::Complete => "complete",
            NodeAction::Fail(_) => "fail",
            NodeAction::Retry { .. } => "retry",
            NodeAction::Branch { .. } => "branch",
            NodeAction::Parallel { .. } => "parallel",
        }
    }
}

/// Outcome of one node attempt.
#[derive(Debug, Clone)]
pub struct NodeRunResult {
    pub action: NodeAction,
    pub outputs: HashMap<String, Value>,
}

impl Default for NodeRunResult {
    fn default() -> Self {
        NodeRunResult {
            action: NodeAction::Continue,
            outputs: HashMap::new(),
        }
    }
}

impl NodeRunResult {
    pub fn advance() -> Self {
        Self::default()
    }

    pub fn with_output(mut self, key: &str, value: Value) -> Self {
        self.outputs.insert(key.to_string(), value);
        self
    }

    pub fn with_action(mut self, action: NodeAction) -> Self {
        self.action = action;
        self
    }
}

/// Runs sub-workflows without the node layer depending on the engine.
#[async_trait]
pub trait SubWorkflowRunner: Send + Sync {
    async fn run(
        &self,
        definition_id: &str,
        payload: Value,
        parent_execution_id: &str,
    ) -> Result<Value, NodeError>;
}

/// Services available to executors, shared across one execution.
#[derive(Clone)]
pub struct NodeContext {
    pub execution_id: String,
    pub entity_id: String,
    pub runtime: RuntimeContext,
    pub notifier: Arc<dyn NotificationSender>,
    pub tickets: Arc<dyn TicketActions>,
    pub sub_workflows: Option<Arc<dyn SubWorkflowRunner>>,
}

/// Trait for node execution. Each node type implements this.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::core::{FakeIdGenerator, FakeTimeProvider};
    use crate::store::{RecordingNotificationSender, RecordingTicketActions};

    pub fn services() -> NodeContext {
        NodeContext {
            execution_id: "ex-test".into(),
            entity_id: "ticket-1".into(),
            runtime: RuntimeContext {
                time_provider: Arc::new(FakeTimeProvider::at_timestamp(1_700_000_000)),
                id_generator: Arc::new(FakeIdGenerator::new("id")),
            },
            notifier: Arc::new(RecordingNotificationSender::new()),
            tickets: Arc::new(RecordingTicketActions::new()),
            sub_workflows: None,
        }
    }
}
