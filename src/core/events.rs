//! Typed lifecycle events, delivered over an unbounded channel.
//!
//! Emission is fire-and-forget: a closed or absent receiver never fails the
//! emitter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineEvent {
    WorkflowStarted {
        execution_id: String,
        definition_id: String,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: String,
        step_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
        node_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: String,
        outputs: Value,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execution_id: String,
        error: String,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    WorkflowCancelled {
        execution_id: String,
        reason: Option<String>,
        correlation_id: Option<String>,
        timestamp: DateTime<Utc>,
    },
    RetryAttempted {
        execution_id: String,
        node_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    ErrorOccurred {
        execution_id: String,
        node_id: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ApprovalReceived {
        execution_id: String,
        approval_id: String,
        approver_id: String,
        approved: bool,
        timestamp: DateTime<Utc>,
    },
    TimeoutOccurred {
        execution_id: String,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    EscalationTriggered {
        execution_id: String,
        node_id: String,
        level: u32,
        timestamp: DateTime<Utc>,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Sender wrapper with an atomic active flag so emission can be cheaply
/// skipped when no listener is attached.
#[derive(Clone)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn disabled() -> Self {
        EventEmitter {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        EventEmitter {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: EngineEvent) {
        if !self.is_active() {
            return;
        }
        if let Some(tx) = &self.tx {
            if tx.send(event).is_err() {
                // Receiver dropped; stop paying for serialization.
                self.active.store(false, Ordering::Relaxed);
            }
        }
    }
}

pub fn create_event_channel() -> (EventEmitter, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventEmitter::new(tx), rx)
}
