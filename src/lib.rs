//! # Ticketflow — a declarative workflow engine for ticket operations
//!
//! `ticketflow` executes workflow definitions expressed as directed graphs
//! of typed nodes: conditions, ticket actions, notifications, webhooks,
//! delays, approvals, loops, parallel fan-outs, and sub-workflows. It is
//! built to power automation inside a ticketing product:
//!
//! - **Graph traversal**: priority-ordered conditional edges with an
//!   unconditioned default branch, bounded loops, and concurrent fan-out.
//! - **Durable pauses**: approval and human-task nodes park the execution
//!   until an explicit resume call; nothing polls.
//! - **Approvals**: multi-approver completion policies, delegation,
//!   escalation chains, timeout actions, and single-use magic-link tokens.
//! - **Retries**: per-node retry policies with fixed, linear, exponential,
//!   and random backoff.
//! - **Background loops**: scheduled-trigger evaluation and SLA deadline
//!   monitoring with built-in escalation.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use ticketflow::engine::{EngineBuilder, ExecuteRequest};
//! use ticketflow::store::{
//!     InMemoryDefinitionStore, InMemoryExecutionStore, RecordingNotificationSender,
//!     RecordingTicketActions,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let definitions = Arc::new(InMemoryDefinitionStore::new());
//!     let store = Arc::new(InMemoryExecutionStore::new());
//!     let engine = EngineBuilder::new(
//!         definitions,
//!         store,
//!         Arc::new(RecordingNotificationSender::new()),
//!         Arc::new(RecordingTicketActions::new()),
//!     )
//!     .build();
//!     let execution = engine
//!         .execute_workflow(ExecuteRequest::new("wf-1", json!({"priority": "high"})))
//!         .await
//!         .unwrap();
//!     println!("{}", execution.status);
//! }
//! ```

pub mod approval;
pub mod core;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod nodes;
pub mod scheduler;
pub mod store;

pub use crate::approval::{ApprovalManager, ApprovalManagerBuilder, ApprovalOutcome};
pub use crate::core::{
    create_event_channel, EngineEvent, EventEmitter, EventReceiver, ExecutionContext,
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, Segment, TimeProvider, VariablePool,
};
pub use crate::engine::{EngineBuilder, ExecuteRequest, WorkflowEngine};
pub use crate::error::{NodeError, WorkflowError, WorkflowResult};
pub use crate::evaluator::ConditionOperator;
pub use crate::graph::CompiledGraph;
pub use crate::metrics::{MetricsCollector, WorkflowMetrics};
pub use crate::model::{
    ApprovalNodeConfig, ApprovalStatus, BackoffStrategy, CompletionPolicy, ExecutionStatus,
    NodeType, ScheduleSpec, StepStatus, TriggerType, WorkflowApproval, WorkflowDefinition,
    WorkflowExecution, WorkflowNode,
};
pub use crate::scheduler::{SlaMonitor, TriggerScheduler};
