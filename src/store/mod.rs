//! External collaborator contracts: definition and execution persistence,
//! notification delivery, user directory, ticket side effects, SLA tracking.
//!
//! The engine only depends on these traits; the in-memory implementations
//! in [`memory`] back the tests and embeddable hosts.

pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::error::{NodeError, WorkflowResult};
use crate::model::{
    StepExecution, TriggerType, WorkflowApproval, WorkflowDefinition, WorkflowExecution,
};

pub use memory::{
    InMemoryDefinitionStore, InMemoryDirectory, InMemoryExecutionStore, InMemorySlaStore,
    RecordingNotificationSender, RecordingTicketActions, SentNotification,
};

/// Loads immutable workflow graphs by id.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>>;

    /// All active definitions with the given trigger type.
    async fn list_active(&self, trigger: TriggerType) -> Vec<Arc<WorkflowDefinition>>;

    /// The tenant's active definition for a trigger type, if any.
    async fn find_for_tenant(
        &self,
        tenant_id: &str,
        trigger: TriggerType,
    ) -> Option<Arc<WorkflowDefinition>>;
}

/// Persists execution, step, and approval records. All writes are scoped to
/// a single row by primary key.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(&self, execution: &WorkflowExecution) -> WorkflowResult<()>;
    async fn update_execution(&self, execution: &WorkflowExecution) -> WorkflowResult<()>;
    async fn get_execution(&self, id: &str) -> WorkflowResult<Option<WorkflowExecution>>;

    async fn create_step(&self, step: &StepExecution) -> WorkflowResult<()>;
    async fn update_step(&self, step: &StepExecution) -> WorkflowResult<()>;
    /// Step records for one execution in creation order.
    async fn steps_for_execution(
        &self,
        execution_id: &str,
    ) -> WorkflowResult<Vec<StepExecution>>;

    async fn increment_success(&self, definition_id: &str) -> WorkflowResult<()>;
    async fn increment_failure(&self, definition_id: &str) -> WorkflowResult<()>;

    /// Most-recent-first history for a definition.
    async fn execution_history(
        &self,
        definition_id: &str,
        limit: usize,
        offset: usize,
    ) -> WorkflowResult<Vec<WorkflowExecution>>;

    /// Prune terminal executions older than `days`. Returns the count removed.
    async fn delete_older_than(&self, days: u32, now: DateTime<Utc>) -> WorkflowResult<u64>;

    async fn create_approval(&self, approval: &WorkflowApproval) -> WorkflowResult<()>;
    async fn update_approval(&self, approval: &WorkflowApproval) -> WorkflowResult<()>;
    async fn get_approval(&self, id: &str) -> WorkflowResult<Option<WorkflowApproval>>;
    async fn approvals_for_step(
        &self,
        execution_id: &str,
        step_id: &str,
    ) -> WorkflowResult<Vec<WorkflowApproval>>;
}

/// Delivery channels. Each call may fail independently without aborting the
/// caller; callers collect per-recipient results.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NodeError>;
    async fn send_messaging_channel(&self, recipient: &str, text: &str) -> Result<(), NodeError>;
    async fn create_in_app(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
    ) -> Result<(), NodeError>;
}

/// Resolves role and department approver targets to user ids.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn users_with_role(&self, role: &str) -> Vec<String>;
    async fn department_members(&self, department_id: &str) -> Vec<String>;
    async fn manager_of(&self, user_id: &str) -> Option<String>;
}

/// Closed set of ticket-domain side effects applied by action nodes.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum TicketAction {
    UpdateFields { fields: Value },
    Assign { assignee_id: String },
    Create { payload: Value },
    AddComment { body: String, author_id: Option<String> },
    ChangeStatus { status: String },
    ChangePriority { priority: String },
}

#[async_trait]
pub trait TicketActions: Send + Sync {
    /// Apply one side effect to the entity, returning the result payload
    /// merged into the execution's variables.
    async fn apply(&self, entity_id: &str, action: TicketAction) -> Result<Value, NodeError>;
}

/// Per-ticket deadline record consumed by the SLA warning loop.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SlaRecord {
    pub ticket_id: String,
    pub tenant_id: String,
    #[serde(default)]
    pub assignee_id: Option<String>,
    #[serde(default)]
    pub response_due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolution_due_at: Option<DateTime<Utc>>,
    pub ticket_status: String,
}

impl SlaRecord {
    pub fn is_terminal(&self) -> bool {
        matches!(self.ticket_status.as_str(), "resolved" | "closed")
    }

    /// Minutes until the nearest due deadline, if any is set.
    pub fn minutes_remaining(&self, now: DateTime<Utc>) -> Option<i64> {
        [self.response_due_at, self.resolution_due_at]
            .into_iter()
            .flatten()
            .map(|due| (due - now).num_minutes())
            .min()
    }
}

#[async_trait]
pub trait SlaStore: Send + Sync {
    /// Records whose response deadline falls within `response_window` or
    /// whose resolution deadline falls within `resolution_window`, for
    /// tickets not yet terminal.
    async fn due_within(
        &self,
        now: DateTime<Utc>,
        response_window: Duration,
        resolution_window: Duration,
    ) -> Vec<SlaRecord>;
}
