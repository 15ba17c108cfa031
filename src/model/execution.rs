use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One running or finished instance of a definition.
///
/// Created at trigger time, mutated by the engine after every node
/// transition, terminal once status reaches completed/failed/cancelled.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowExecution {
    pub id: String,
    pub definition_id: String,
    #[serde(default)]
    pub entity_type: String,
    #[serde(default)]
    pub entity_id: String,
    #[serde(default)]
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub trigger_payload: Value,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub progress: u8,
    /// Variable bindings snapshot, persisted so a resume after restart can
    /// rebuild the in-memory context.
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub log: Vec<ExecutionLogEntry>,
    #[serde(default)]
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    WaitingInput,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::WaitingInput => "waiting_input",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One record per node attempt. A retried node produces a fresh record with
/// an incremented retry count, preserving the audit history.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct StepExecution {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub retry_count: u32,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Timeout,
}

/// Timestamped, leveled entry in an execution's ordered log.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionLogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default)]
    pub node_id: Option<String>,
    pub message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::WaitingInput.is_terminal());
        assert!(!ExecutionStatus::Pending.is_terminal());
    }

    #[test]
    fn test_status_display_matches_serde_tag() {
        for status in [
            ExecutionStatus::Pending,
            ExecutionStatus::WaitingInput,
            ExecutionStatus::Cancelled,
        ] {
            let tag = serde_json::to_value(status).unwrap();
            assert_eq!(tag.as_str().unwrap(), status.to_string());
        }
    }
}
