//! Execution-level error types.

use super::NodeError;
use thiserror::Error;

/// Errors raised by the engine, the approval manager, and the scheduler.
///
/// Node-level failures are retried per the node's retry policy before being
/// escalated to [`WorkflowError::NodeExecutionFailed`].
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),
    #[error("Workflow is inactive: {0}")]
    WorkflowInactive(String),
    #[error("Trigger conditions not met for workflow: {0}")]
    TriggerConditionsNotMet(String),
    #[error("No start node found")]
    NoStartNode,
    #[error("No executor for node: {0}")]
    NoExecutor(String),
    #[error("Node has no outgoing edges: {0}")]
    NoOutgoingEdges(String),
    #[error("No matching edge from node: {0}")]
    NoMatchingEdge(String),
    #[error("Node not found: {0}")]
    NodeNotFound(String),
    #[error("Unknown result action from node {node_id}: {action}")]
    UnknownResultAction { node_id: String, action: String },
    #[error("Parallel execution failed: {}", failures.join("; "))]
    ParallelExecutionFailed { failures: Vec<String> },
    #[error("Node timed out: {0}")]
    Timeout(String),
    #[error("Node execution failed: node={node_id}, error={error}")]
    NodeExecutionFailed { node_id: String, error: String },
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Execution {execution_id} is not active (status: {status})")]
    ExecutionNotActive {
        execution_id: String,
        status: String,
    },
    #[error("Approval not found: {0}")]
    ApprovalNotFound(String),
    #[error("Approval {approval_id} is not pending")]
    ApprovalNotPending { approval_id: String },
    #[error("User {user_id} is not the assigned approver for {approval_id}")]
    NotAssignedApprover {
        approval_id: String,
        user_id: String,
    },
    #[error("Delegation is not permitted for this approval")]
    DelegationNotAllowed,
    #[error("Invalid or expired approval token")]
    InvalidToken,
    #[error("Store error: {0}")]
    StoreError(String),
    #[error("Node error: {0}")]
    NodeError(Box<NodeError>),
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<NodeError> for WorkflowError {
    fn from(value: NodeError) -> Self {
        WorkflowError::NodeError(Box::new(value))
    }
}

impl WorkflowError {
    /// Stable code for metrics and event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::WorkflowNotFound(_) => "WorkflowNotFound",
            WorkflowError::WorkflowInactive(_) => "WorkflowInactive",
            WorkflowError::TriggerConditionsNotMet(_) => "TriggerConditionsNotMet",
            WorkflowError::NoStartNode => "NoStartNode",
            WorkflowError::NoExecutor(_) => "NoExecutor",
            WorkflowError::NoOutgoingEdges(_) => "NoOutgoingEdges",
            WorkflowError::NoMatchingEdge(_) => "NoMatchingEdge",
            WorkflowError::NodeNotFound(_) => "NodeNotFound",
            WorkflowError::UnknownResultAction { .. } => "UnknownResultAction",
            WorkflowError::ParallelExecutionFailed { .. } => "ParallelExecutionFailed",
            WorkflowError::Timeout(_) => "Timeout",
            WorkflowError::NodeExecutionFailed { .. } => "NodeExecutionFailed",
            WorkflowError::ExecutionNotFound(_) => "ExecutionNotFound",
            WorkflowError::ExecutionNotActive { .. } => "ExecutionNotActive",
            WorkflowError::ApprovalNotFound(_) => "ApprovalNotFound",
            WorkflowError::ApprovalNotPending { .. } => "ApprovalNotPending",
            WorkflowError::NotAssignedApprover { .. } => "NotAssignedApprover",
            WorkflowError::DelegationNotAllowed => "DelegationNotAllowed",
            WorkflowError::InvalidToken => "InvalidToken",
            WorkflowError::StoreError(_) => "StoreError",
            WorkflowError::NodeError(_) => "NodeError",
            WorkflowError::InternalError(_) => "InternalError",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_error_display() {
        assert_eq!(
            WorkflowError::WorkflowNotFound("wf-1".into()).to_string(),
            "Workflow not found: wf-1"
        );
        assert_eq!(
            WorkflowError::WorkflowInactive("wf-1".into()).to_string(),
            "Workflow is inactive: wf-1"
        );
        assert_eq!(WorkflowError::NoStartNode.to_string(), "No start node found");
        assert_eq!(
            WorkflowError::NoMatchingEdge("n1".into()).to_string(),
            "No matching edge from node: n1"
        );
        assert_eq!(
            WorkflowError::Timeout("n1".into()).to_string(),
            "Node timed out: n1"
        );
    }

    #[test]
    fn test_parallel_failure_aggregates() {
        let err = WorkflowError::ParallelExecutionFailed {
            failures: vec!["a failed".into(), "b failed".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("a failed"));
        assert!(msg.contains("b failed"));
    }

    #[test]
    fn test_from_node_error() {
        let err: WorkflowError = NodeError::Timeout.into();
        assert!(matches!(err, WorkflowError::NodeError(_)));
        assert_eq!(err.code(), "NodeError");
    }

    #[test]
    fn test_code_is_stable() {
        assert_eq!(
            WorkflowError::NodeExecutionFailed {
                node_id: "n".into(),
                error: "e".into()
            }
            .code(),
            "NodeExecutionFailed"
        );
        assert_eq!(
            WorkflowError::UnknownResultAction {
                node_id: "n".into(),
                action: "x".into()
            }
            .code(),
            "UnknownResultAction"
        );
    }
}
