//! End-to-end traversal tests against the public API, using the in-memory
//! collaborators.

use serde_json::{json, Value};
use std::sync::Arc;

use ticketflow::engine::{EngineBuilder, ExecuteRequest};
use ticketflow::store::{
    ExecutionStore, InMemoryDefinitionStore, InMemoryExecutionStore, RecordingNotificationSender,
    RecordingTicketActions,
};
use ticketflow::{ExecutionStatus, StepStatus, WorkflowDefinition, WorkflowEngine, WorkflowError};

struct Harness {
    engine: WorkflowEngine,
    definitions: Arc<InMemoryDefinitionStore>,
    store: Arc<InMemoryExecutionStore>,
    notifier: Arc<RecordingNotificationSender>,
    tickets: Arc<RecordingTicketActions>,
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
    let engine = EngineBuilder::new(
        definitions.clone(),
        store.clone(),
        notifier.clone(),
        tickets.clone(),
    )
    .build();
    Harness {
        engine,
        definitions,
        store,
        notifier,
        tickets,
    }
}

fn definition(value: Value) -> WorkflowDefinition {
    serde_json::from_value(value).unwrap()
}

#[tokio::test]
async fn linear_path_reaches_single_terminal_status() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-linear",
        "name": "Linear",
        "trigger_type": "event",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "tag", "type": "action", "config": {"set": {"handled": true}}},
            {"id": "notify", "type": "notification", "config": {
                "recipients": ["agent-1"],
                "channels": ["in_app"],
                "subject": "Ticket {{ticket.id}} handled",
                "body": "Done"
            }},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "tag"},
            {"source": "tag", "target": "notify"},
            {"source": "notify", "target": "end"}
        ]
    })));
    let execution = h
        .engine
        .execute_workflow(
            ExecuteRequest::new("wf-linear", json!({"ticket": {"id": "T-9"}}))
                .entity("ticket", "T-9"),
        )
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.progress, 100);
    assert!(execution.completed_at.is_some());
    // Every node left a log entry.
    for node_id in ["start", "tag", "notify", "end"] {
        assert!(
            execution
                .log
                .iter()
                .any(|entry| entry.node_id.as_deref() == Some(node_id)),
            "missing log entry for {}",
            node_id
        );
    }
    let delivered = h.notifier.sent_on("in_app");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].subject, "Ticket T-9 handled");
}

#[tokio::test]
async fn edge_selection_is_deterministic_by_priority() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-priority",
        "name": "Priority",
        "trigger_type": "event",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "urgent", "type": "action", "config": {"set": {"lane": "urgent"}}},
            {"id": "normal", "type": "action", "config": {"set": {"lane": "normal"}}},
            {"id": "default", "type": "action", "config": {"set": {"lane": "default"}}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "default"},
            {"source": "start", "target": "urgent", "priority": 10,
             "conditions": [{"field": "severity", "operator": "greater_or_equal", "value": 8}]},
            {"source": "start", "target": "normal", "priority": 5,
             "conditions": [{"field": "severity", "operator": "greater_or_equal", "value": 3}]},
            {"source": "urgent", "target": "end"},
            {"source": "normal", "target": "end"},
            {"source": "default", "target": "end"}
        ]
    })));
    // severity 9 satisfies both conditioned edges; priority 10 must win
    // every time.
    for _ in 0..5 {
        let execution = h
            .engine
            .execute_workflow(ExecuteRequest::new("wf-priority", json!({"severity": 9})))
            .await
            .unwrap();
        assert_eq!(execution.variables["lane"], json!("urgent"));
    }
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-priority", json!({"severity": 1})))
        .await
        .unwrap();
    assert_eq!(execution.variables["lane"], json!("default"));
}

#[tokio::test]
async fn action_assignments_land_in_variables() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-set",
        "name": "Set",
        "trigger_type": "manual",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "assign", "type": "action", "config": {"set": {"x": 1}}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "assign"},
            {"source": "assign", "target": "end"}
        ]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-set", json!({})))
        .await
        .unwrap();
    assert_eq!(execution.variables["x"], json!(1));
}

#[tokio::test]
async fn parallel_branches_merge_into_parent() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-fan",
        "name": "Fan",
        "trigger_type": "manual",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "fan", "type": "parallel", "config": {"targets": ["enrich", "classify"]}},
            {"id": "enrich", "type": "action", "config": {"set": {"enriched": true}}},
            {"id": "classify", "type": "action", "config": {"set": {"category": "billing"}}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "fan"},
            {"source": "fan", "target": "end"}
        ]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-fan", json!({})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.variables["enriched"], json!(true));
    assert_eq!(execution.variables["category"], json!("billing"));
}

#[tokio::test(start_paused = true)]
async fn failing_node_retries_then_fails_execution() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-webhook",
        "name": "Webhook",
        "trigger_type": "event",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "call", "type": "webhook",
             "config": {"url": "http://192.0.2.1:9/hook", "method": "POST", "timeout_secs": 1},
             "retry": {"max_attempts": 2, "initial_delay_ms": 50}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "call"},
            {"source": "call", "target": "end"}
        ]
    })));
    let err = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-webhook", json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::NodeExecutionFailed { .. }));

    let executions = h.store.execution_history("wf-webhook", 1, 0).await.unwrap();
    assert_eq!(executions[0].status, ExecutionStatus::Failed);
    let attempts: Vec<_> = h
        .store
        .steps_for(&executions[0].id)
        .into_iter()
        .filter(|s| s.node_id == "call")
        .collect();
    assert_eq!(attempts.len(), 2);
    assert!(attempts
        .iter()
        .all(|s| matches!(s.status, StepStatus::Failed | StepStatus::Timeout)));
}

#[tokio::test]
async fn ticket_actions_reach_the_ticket_layer() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-escalate",
        "name": "Escalate",
        "trigger_type": "event",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "bump", "type": "action",
             "config": {"action_type": "change_priority", "priority": "urgent"}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "bump"},
            {"source": "bump", "target": "end"}
        ]
    })));
    h.engine
        .execute_workflow(
            ExecuteRequest::new("wf-escalate", json!({})).entity("ticket", "T-42"),
        )
        .await
        .unwrap();
    let applied = h.tickets.applied();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0].0, "T-42");
}

#[tokio::test]
async fn cancelled_execution_rejects_resume() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-wait",
        "name": "Wait",
        "trigger_type": "manual",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "task", "type": "human_task", "config": {"prompt": "check"}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "task"},
            {"source": "task", "target": "end"}
        ]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-wait", json!({})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::WaitingInput);

    h.engine
        .cancel_execution(&execution.id, Some("superseded".into()))
        .await
        .unwrap();
    let err = h
        .engine
        .resume_execution(&execution.id, json!({"done": true}))
        .await
        .unwrap_err();
    assert!(matches!(err, WorkflowError::ExecutionNotActive { .. }));

    let stored = h.engine.get_execution(&execution.id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Cancelled);
    assert_eq!(stored.error_message.as_deref(), Some("superseded"));
}

#[tokio::test]
async fn loop_node_repeats_until_bound() {
    let h = harness();
    h.definitions.insert(definition(json!({
        "id": "wf-loop",
        "name": "Loop",
        "trigger_type": "manual",
        "nodes": [
            {"id": "start", "type": "start"},
            {"id": "again", "type": "loop", "config": {"target": "work", "max_iterations": 3}},
            {"id": "work", "type": "action", "config": {"set": {"worked": true}}},
            {"id": "end", "type": "end"}
        ],
        "edges": [
            {"source": "start", "target": "again"},
            {"source": "again", "target": "end"},
            {"source": "work", "target": "again"}
        ]
    })));
    let execution = h
        .engine
        .execute_workflow(ExecuteRequest::new("wf-loop", json!({})))
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    let loop_steps = h
        .store
        .steps_for(&execution.id)
        .into_iter()
        .filter(|s| s.node_id == "again")
        .count();
    assert_eq!(loop_steps, 3);
    assert_eq!(execution.variables["again"]["iteration"], json!(3));
}
