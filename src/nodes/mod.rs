//! Node executors and their dispatch.
//!
//! The node-type set is closed: dispatch is an exhaustive match on
//! [`NodeType`], so a new node type cannot be added without handling it
//! everywhere.

pub mod action;
pub mod control_flow;
pub mod delay;
pub mod executor;
pub mod flow_ops;
pub mod human;
pub mod notification;
pub mod service;
pub mod webhook;

pub use executor::{NodeAction, NodeContext, NodeExecutor, NodeRunResult, SubWorkflowRunner};

use crate::error::{WorkflowError, WorkflowResult};
use crate::model::NodeType;

/// One executor instance per node type.
pub struct NodeExecutors {
    start: control_flow::StartExecutor,
    end: control_flow::EndExecutor,
    condition: control_flow::ConditionExecutor,
    action: action::ActionExecutor,
    approval: human::ApprovalExecutor,
    delay: delay::DelayExecutor,
    notification: notification::NotificationExecutor,
    webhook: webhook::WebhookExecutor,
    script: action::ScriptExecutor,
    human_task: human::HumanTaskExecutor,
    loop_: flow_ops::LoopExecutor,
    sub_workflow: flow_ops::SubWorkflowExecutor,
    parallel: flow_ops::ParallelExecutor,
    integration: service::IntegrationExecutor,
    ml_prediction: service::MlPredictionExecutor,
}

impl NodeExecutors {
    pub fn new() -> Self {
        NodeExecutors {
            start: control_flow::StartExecutor,
            end: control_flow::EndExecutor,
            condition: control_flow::ConditionExecutor,
            action: action::ActionExecutor,
            approval: human::ApprovalExecutor,
            delay: delay::DelayExecutor,
            notification: notification::NotificationExecutor,
            webhook: webhook::WebhookExecutor::new(),
            script: action::ScriptExecutor,
            human_task: human::HumanTaskExecutor,
            loop_: flow_ops::LoopExecutor,
            sub_workflow: flow_ops::SubWorkflowExecutor,
            parallel: flow_ops::ParallelExecutor,
            integration: service::IntegrationExecutor,
            ml_prediction: service::MlPredictionExecutor,
        }
    }

    /// `Unknown` is rejected at graph build; this guards direct callers.
    pub fn executor(&self, node_type: NodeType) -> WorkflowResult<&dyn NodeExecutor> {
        Ok(match node_type {
            NodeType::Start => &self.start,
            NodeType::End => &self.end,
            NodeType::Condition => &self.condition,
            NodeType::Action => &self.action,
            NodeType::Approval => &self.approval,
            NodeType::Delay => &self.delay,
            NodeType::Notification => &self.notification,
            NodeType::Webhook => &self.webhook,
            NodeType::Script => &self.script,
            NodeType::HumanTask => &self.human_task,
            NodeType::Loop => &self.loop_,
            NodeType::SubWorkflow => &self.sub_workflow,
            NodeType::Parallel => &self.parallel,
            NodeType::Integration => &self.integration,
            NodeType::MlPrediction => &self.ml_prediction,
            NodeType::Unknown => {
                return Err(WorkflowError::NoExecutor(node_type.to_string()));
            }
        })
    }
}

impl Default for NodeExecutors {
    fn default() -> Self {
        Self::new()
    }
}
