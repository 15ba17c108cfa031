//! Approval flows driven end to end: engine parks on the approval node,
//! decisions land through the manager, and the manager resumes the engine.

use serde_json::{json, Value};
use std::sync::Arc;

use ticketflow::approval::ApprovalManagerBuilder;
use ticketflow::engine::{EngineBuilder, ExecuteRequest};
use ticketflow::store::{
    ExecutionStore, InMemoryDefinitionStore, InMemoryDirectory, InMemoryExecutionStore,
    RecordingNotificationSender, RecordingTicketActions,
};
use ticketflow::{
    ApprovalManager, ApprovalOutcome, ExecutionStatus, WorkflowApproval, WorkflowDefinition,
    WorkflowEngine, WorkflowError,
};

struct Harness {
    engine: WorkflowEngine,
    manager: ApprovalManager,
    definitions: Arc<InMemoryDefinitionStore>,
    store: Arc<InMemoryExecutionStore>,
    notifier: Arc<RecordingNotificationSender>,
}

fn harness() -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let definitions = Arc::new(InMemoryDefinitionStore::new());
    let store = Arc::new(InMemoryExecutionStore::new());
    let notifier = Arc::new(RecordingNotificationSender::new());
    let tickets = Arc::new(RecordingTicketActions::new());
    let directory = Arc::new(InMemoryDirectory::new());
    let engine = EngineBuilder::new(
        definitions.clone(),
        store.clone(),
        notifier.clone(),
        tickets,
    )
    .build();
    let manager = ApprovalManagerBuilder::new(
        definitions.clone(),
        store.clone(),
        notifier.clone(),
        directory,
    )
    .build();
    engine.attach_approvals(manager.clone());
    Harness {
        engine,
        manager,
        definitions,
        store,
        notifier,
    }
}

/// Definition with a single approval node routed by the decision.
fn approval_definition(approval_config: Value) -> WorkflowDefinition {
    serde_json::from_value(json!({
        "id": "wf-refund",
        "name": "Refund approval",
        "trigger_type": "event",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "approve-1", "type": "approval", "config": approval_config},
            {"id": "grant", "type": "action", "config": {"set": {"outcome": "granted"}}},
            {"id": "deny", "type": "action", "config": {"set": {"outcome": "denied"}}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "approve-1"},
            {"source": "approve-1", "target": "grant", "priority": 1,
             "conditions": [{"field": "approved", "operator": "equals", "value": true}]},
            {"source": "approve-1", "target": "deny"},
            {"source": "grant", "target": "end"},
            {"source": "deny", "target": "end"}
        ]
    }))
    .unwrap()
}

/// Pending approval records for the execution's approval step.
async fn open_approvals(h: &Harness, execution_id: &str) -> Vec<WorkflowApproval> {
    let step = h
        .store
        .steps_for(execution_id)
        .into_iter()
        .rev()
        .find(|s| s.node_id == "approve-1")
        .unwrap();
    h.store
        .approvals_for_step(execution_id, &step.id)
        .await
        .unwrap()
}

#[tokio::test]
async fn approval_decision_resumes_to_completion() {
    let h = harness();
    h.definitions.insert(approval_definition(json!({
        "approvers": [{"source": "user", "value": "mgr-1"}]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-refund", json!({"amount": 120})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::WaitingInput);

    let approvals = open_approvals(&h, &execution.id).await;
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].approver_id, "mgr-1");

    let outcome = h
        .manager
        .process_approval(&approvals[0].id, "mgr-1", true, Some("ok".into()))
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Approved);

    let resumed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.variables["outcome"], json!("granted"));
    assert_eq!(resumed.variables["approved"], json!(true));
}

#[tokio::test]
async fn rejection_routes_to_the_default_branch() {
    let h = harness();
    h.definitions.insert(approval_definition(json!({
        "approvers": [{"source": "user", "value": "mgr-1"}]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-refund", json!({})))
        .await
        .unwrap();
    let approvals = open_approvals(&h, &execution.id).await;

    let outcome = h
        .manager
        .process_approval(&approvals[0].id, "mgr-1", false, Some("too high".into()))
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Rejected);

    let resumed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.variables["outcome"], json!("denied"));
}

#[tokio::test]
async fn unanimous_policy_waits_for_every_approver() {
    let h = harness();
    h.definitions.insert(approval_definition(json!({
        "approvers": [
            {"source": "user", "value": "mgr-1"},
            {"source": "user", "value": "mgr-2"}
        ],
        "completion_policy": "unanimous"
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-refund", json!({})))
        .await
        .unwrap();
    let approvals = open_approvals(&h, &execution.id).await;
    assert_eq!(approvals.len(), 2);
    let by_user = |user: &str| {
        approvals
            .iter()
            .find(|a| a.approver_id == user)
            .unwrap()
            .id
            .clone()
    };

    let outcome = h
        .manager
        .process_approval(&by_user("mgr-1"), "mgr-1", true, None)
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Pending);
    let waiting = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(waiting.status, ExecutionStatus::WaitingInput);

    let outcome = h
        .manager
        .process_approval(&by_user("mgr-2"), "mgr-2", true, None)
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Approved);
    let resumed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.variables["outcome"], json!("granted"));
}

#[tokio::test]
async fn magic_link_token_decides_without_a_session() {
    let h = harness();
    h.definitions.insert(approval_definition(json!({
        "approvers": [{"source": "user", "value": "mgr-1"}],
        "magic_link_base_url": "https://desk.example.com"
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-refund", json!({})))
        .await
        .unwrap();

    let emails = h.notifier.sent_on("email");
    assert_eq!(emails.len(), 1);
    let token = emails[0]
        .body
        .split("token=")
        .nth(1)
        .and_then(|rest| rest.split('"').next())
        .unwrap()
        .to_string();

    let outcome = h
        .manager
        .process_approval_by_token(&token, true, None)
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Approved);
    let resumed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);

    // Tokens are single use.
    let err = h
        .manager
        .process_approval_by_token(&token, true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::InvalidToken));
}

#[tokio::test]
async fn delegation_moves_the_decision_to_the_new_assignee() {
    let h = harness();
    h.definitions.insert(approval_definition(json!({
        "approvers": [{"source": "user", "value": "mgr-1"}],
        "allow_delegation": true
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-refund", json!({})))
        .await
        .unwrap();
    let approvals = open_approvals(&h, &execution.id).await;

    let delegate = h
        .manager
        .delegate_approval(&approvals[0].id, "mgr-1", "backup-1", Some("on leave".into()))
        .await
        .unwrap();
    assert_eq!(delegate.approver_id, "backup-1");

    // The superseded record is closed; the original assignee cannot decide.
    let err = h
        .manager
        .process_approval(&approvals[0].id, "mgr-1", true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ApprovalNotPending { .. }));

    let outcome = h
        .manager
        .process_approval(&delegate.id, "backup-1", true, None)
        .await
        .unwrap();
    assert_eq!(outcome, ApprovalOutcome::Approved);
    let resumed = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(resumed.status, ExecutionStatus::Completed);
    assert_eq!(resumed.variables["outcome"], json!("granted"));
}
