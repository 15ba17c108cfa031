//! Workflow data model: immutable definitions, mutable execution state,
//! and approval records.

pub mod approval;
pub mod definition;
pub mod execution;

pub use approval::{
    ApprovalMetadata, ApprovalNodeConfig, ApprovalStatus, ApproverSource, ApproverSpec,
    CompletionPolicy, DelegationRecord, EscalationLevel, TimeoutAction, WorkflowApproval,
};
pub use definition::{
    BackoffStrategy, EdgeCondition, NodeType, RetryConfig, ScheduleSpec, TriggerType,
    WorkflowDefinition, WorkflowEdge, WorkflowNode, DEFAULT_NODE_TIMEOUT_MS,
};
pub use execution::{
    ExecutionLogEntry, ExecutionStatus, LogLevel, StepExecution, StepStatus, WorkflowExecution,
};
