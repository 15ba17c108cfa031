//! In-memory collaborator implementations used by tests and embedded hosts.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{NodeError, WorkflowResult};
use crate::model::{
    StepExecution, TriggerType, WorkflowApproval, WorkflowDefinition, WorkflowExecution,
};

use super::{
    DefinitionStore, ExecutionStore, NotificationSender, SlaRecord, SlaStore, TicketAction,
    TicketActions, UserDirectory,
};

// --- Definitions ---

#[derive(Default)]
pub struct InMemoryDefinitionStore {
    definitions: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
}

impl InMemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, definition: WorkflowDefinition) {
        self.definitions
            .write()
            .insert(definition.id.clone(), Arc::new(definition));
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn get(&self, id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.definitions.read().get(id).cloned()
    }

    async fn list_active(&self, trigger: TriggerType) -> Vec<Arc<WorkflowDefinition>> {
        self.definitions
            .read()
            .values()
            .filter(|d| d.is_active && d.trigger_type == trigger)
            .cloned()
            .collect()
    }

    async fn find_for_tenant(
        &self,
        tenant_id: &str,
        trigger: TriggerType,
    ) -> Option<Arc<WorkflowDefinition>> {
        self.definitions
            .read()
            .values()
            .find(|d| d.is_active && d.trigger_type == trigger && d.tenant_id == tenant_id)
            .cloned()
    }
}

// --- Executions / steps / approvals ---

#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: RwLock<HashMap<String, WorkflowExecution>>,
    steps: RwLock<Vec<StepExecution>>,
    approvals: RwLock<HashMap<String, WorkflowApproval>>,
    success_counts: RwLock<HashMap<String, u64>>,
    failure_counts: RwLock<HashMap<String, u64>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn steps_for(&self, execution_id: &str) -> Vec<StepExecution> {
        self.steps
            .read()
            .iter()
            .filter(|s| s.execution_id == execution_id)
            .cloned()
            .collect()
    }

    pub fn success_count(&self, definition_id: &str) -> u64 {
        self.success_counts
            .read()
            .get(definition_id)
            .copied()
            .unwrap_or(0)
    }

    pub fn failure_count(&self, definition_id: &str) -> u64 {
        self.failure_counts
            .read()
            .get(definition_id)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: &WorkflowExecution) -> WorkflowResult<()> {
        self.executions
            .write()
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn update_execution(&self, execution: &WorkflowExecution) -> WorkflowResult<()> {
        self.executions
            .write()
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    async fn get_execution(&self, id: &str) -> WorkflowResult<Option<WorkflowExecution>> {
        Ok(self.executions.read().get(id).cloned())
    }

    async fn create_step(&self, step: &StepExecution) -> WorkflowResult<()> {
        self.steps.write().push(step.clone());
        Ok(())
    }

    async fn update_step(&self, step: &StepExecution) -> WorkflowResult<()> {
        let mut steps = self.steps.write();
        if let Some(existing) = steps.iter_mut().find(|s| s.id == step.id) {
            *existing = step.clone();
        } else {
            steps.push(step.clone());
        }
        Ok(())
    }

    async fn steps_for_execution(
        &self,
        execution_id: &str,
    ) -> WorkflowResult<Vec<StepExecution>> {
        Ok(self.steps_for(execution_id))
    }

    async fn increment_success(&self, definition_id: &str) -> WorkflowResult<()> {
        *self
            .success_counts
            .write()
            .entry(definition_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn increment_failure(&self, definition_id: &str) -> WorkflowResult<()> {
        *self
            .failure_counts
            .write()
            .entry(definition_id.to_string())
            .or_insert(0) += 1;
        Ok(())
    }

    async fn execution_history(
        &self,
        definition_id: &str,
        limit: usize,
        offset: usize,
    ) -> WorkflowResult<Vec<WorkflowExecution>> {
        let mut all: Vec<WorkflowExecution> = self
            .executions
            .read()
            .values()
            .filter(|e| e.definition_id == definition_id)
            .cloned()
            .collect();
        all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(all.into_iter().skip(offset).take(limit).collect())
    }

    async fn delete_older_than(&self, days: u32, now: DateTime<Utc>) -> WorkflowResult<u64> {
        let cutoff = now - Duration::days(days as i64);
        let mut executions = self.executions.write();
        let before = executions.len();
        executions.retain(|_, e| {
            !e.status.is_terminal() || e.completed_at.map(|t| t >= cutoff).unwrap_or(true)
        });
        Ok((before - executions.len()) as u64)
    }

    async fn create_approval(&self, approval: &WorkflowApproval) -> WorkflowResult<()> {
        self.approvals
            .write()
            .insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn update_approval(&self, approval: &WorkflowApproval) -> WorkflowResult<()> {
        self.approvals
            .write()
            .insert(approval.id.clone(), approval.clone());
        Ok(())
    }

    async fn get_approval(&self, id: &str) -> WorkflowResult<Option<WorkflowApproval>> {
        Ok(self.approvals.read().get(id).cloned())
    }

    async fn approvals_for_step(
        &self,
        execution_id: &str,
        step_id: &str,
    ) -> WorkflowResult<Vec<WorkflowApproval>> {
        let mut approvals: Vec<WorkflowApproval> = self
            .approvals
            .read()
            .values()
            .filter(|a| a.execution_id == execution_id && a.step_id == step_id)
            .cloned()
            .collect();
        approvals.sort_by(|a, b| {
            a.metadata
                .order
                .cmp(&b.metadata.order)
                .then(a.requested_at.cmp(&b.requested_at))
        });
        Ok(approvals)
    }
}

// --- Notifications ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub channel: &'static str,
    pub recipient: String,
    pub subject: String,
    pub body: String,
}

/// Records every delivery; individual channels can be made to fail.
#[derive(Default)]
pub struct RecordingNotificationSender {
    sent: RwLock<Vec<SentNotification>>,
    fail_email: RwLock<bool>,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_email(&self, fail: bool) {
        *self.fail_email.write() = fail;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().clone()
    }

    pub fn sent_on(&self, channel: &str) -> Vec<SentNotification> {
        self.sent
            .read()
            .iter()
            .filter(|n| n.channel == channel)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn send_email(&self, to: &str, subject: &str, html: &str) -> Result<(), NodeError> {
        if *self.fail_email.read() {
            return Err(NodeError::NotificationError(format!(
                "email delivery to {} failed",
                to
            )));
        }
        self.sent.write().push(SentNotification {
            channel: "email",
            recipient: to.to_string(),
            subject: subject.to_string(),
            body: html.to_string(),
        });
        Ok(())
    }

    async fn send_messaging_channel(&self, recipient: &str, text: &str) -> Result<(), NodeError> {
        self.sent.write().push(SentNotification {
            channel: "messaging",
            recipient: recipient.to_string(),
            subject: String::new(),
            body: text.to_string(),
        });
        Ok(())
    }

    async fn create_in_app(
        &self,
        user_id: &str,
        title: &str,
        message: &str,
    ) -> Result<(), NodeError> {
        self.sent.write().push(SentNotification {
            channel: "in_app",
            recipient: user_id.to_string(),
            subject: title.to_string(),
            body: message.to_string(),
        });
        Ok(())
    }
}

// --- Directory ---

#[derive(Default)]
pub struct InMemoryDirectory {
    roles: RwLock<HashMap<String, Vec<String>>>,
    departments: RwLock<HashMap<String, Vec<String>>>,
    managers: RwLock<HashMap<String, String>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, role: &str, users: &[&str]) {
        self.roles
            .write()
            .insert(role.to_string(), users.iter().map(|s| s.to_string()).collect());
    }

    pub fn add_department(&self, department_id: &str, users: &[&str]) {
        self.departments.write().insert(
            department_id.to_string(),
            users.iter().map(|s| s.to_string()).collect(),
        );
    }

    pub fn set_manager(&self, user_id: &str, manager_id: &str) {
        self.managers
            .write()
            .insert(user_id.to_string(), manager_id.to_string());
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn users_with_role(&self, role: &str) -> Vec<String> {
        self.roles.read().get(role).cloned().unwrap_or_default()
    }

    async fn department_members(&self, department_id: &str) -> Vec<String> {
        self.departments
            .read()
            .get(department_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn manager_of(&self, user_id: &str) -> Option<String> {
        self.managers.read().get(user_id).cloned()
    }
}

// --- Ticket actions ---

/// Records applied side effects and echoes them back as output.
#[derive(Default)]
pub struct RecordingTicketActions {
    applied: RwLock<Vec<(String, TicketAction)>>,
}

impl RecordingTicketActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn applied(&self) -> Vec<(String, TicketAction)> {
        self.applied.read().clone()
    }
}

#[async_trait]
impl TicketActions for RecordingTicketActions {
    async fn apply(&self, entity_id: &str, action: TicketAction) -> Result<Value, NodeError> {
        let result = serde_json::to_value(&action)?;
        self.applied
            .write()
            .push((entity_id.to_string(), action));
        Ok(result)
    }
}

// --- SLA tracking ---

#[derive(Default)]
pub struct InMemorySlaStore {
    records: RwLock<Vec<SlaRecord>>,
}

impl InMemorySlaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: SlaRecord) {
        self.records.write().push(record);
    }
}

#[async_trait]
impl SlaStore for InMemorySlaStore {
    async fn due_within(
        &self,
        now: DateTime<Utc>,
        response_window: Duration,
        resolution_window: Duration,
    ) -> Vec<SlaRecord> {
        self.records
            .read()
            .iter()
            .filter(|r| !r.is_terminal())
            .filter(|r| {
                let response_due = r
                    .response_due_at
                    .map(|due| due > now && due <= now + response_window)
                    .unwrap_or(false);
                let resolution_due = r
                    .resolution_due_at
                    .map(|due| due > now && due <= now + resolution_window)
                    .unwrap_or(false);
                response_due || resolution_due
            })
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ExecutionStatus;
    use serde_json::json;

    fn execution(id: &str, definition_id: &str, completed_days_ago: i64) -> WorkflowExecution {
        let now = Utc::now();
        WorkflowExecution {
            id: id.into(),
            definition_id: definition_id.into(),
            entity_type: "ticket".into(),
            entity_id: "t-1".into(),
            triggered_by: None,
            trigger_payload: json!({}),
            status: ExecutionStatus::Completed,
            current_node_id: None,
            progress: 100,
            variables: json!({}),
            log: vec![],
            retry_count: 0,
            started_at: now - Duration::days(completed_days_ago),
            completed_at: Some(now - Duration::days(completed_days_ago)),
            error_message: None,
            correlation_id: None,
        }
    }

    #[tokio::test]
    async fn test_history_ordering_and_paging() {
        let store = InMemoryExecutionStore::new();
        for (i, days) in [5i64, 1, 3].iter().enumerate() {
            store
                .create_execution(&execution(&format!("ex-{}", i), "wf-1", *days))
                .await
                .unwrap();
        }
        let history = store.execution_history("wf-1", 2, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, "ex-1");
        assert_eq!(history[1].id, "ex-2");
        let page = store.execution_history("wf-1", 2, 2).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "ex-0");
    }

    #[tokio::test]
    async fn test_delete_older_than() {
        let store = InMemoryExecutionStore::new();
        store
            .create_execution(&execution("old", "wf-1", 40))
            .await
            .unwrap();
        store
            .create_execution(&execution("new", "wf-1", 1))
            .await
            .unwrap();
        let removed = store.delete_older_than(30, Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_execution("old").await.unwrap().is_none());
        assert!(store.get_execution("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sla_due_within_windows() {
        let store = InMemorySlaStore::new();
        let now = Utc::now();
        store.insert(SlaRecord {
            ticket_id: "t-soon".into(),
            tenant_id: "acme".into(),
            assignee_id: Some("u1".into()),
            response_due_at: None,
            resolution_due_at: Some(now + Duration::minutes(90)),
            ticket_status: "open".into(),
        });
        store.insert(SlaRecord {
            ticket_id: "t-later".into(),
            tenant_id: "acme".into(),
            assignee_id: None,
            response_due_at: None,
            resolution_due_at: Some(now + Duration::hours(5)),
            ticket_status: "open".into(),
        });
        store.insert(SlaRecord {
            ticket_id: "t-closed".into(),
            tenant_id: "acme".into(),
            assignee_id: None,
            response_due_at: None,
            resolution_due_at: Some(now + Duration::minutes(30)),
            ticket_status: "closed".into(),
        });
        let due = store
            .due_within(now, Duration::hours(2), Duration::hours(4))
            .await;
        let ids: Vec<&str> = due.iter().map(|r| r.ticket_id.as_str()).collect();
        assert_eq!(ids, vec!["t-soon"]);
    }
}
