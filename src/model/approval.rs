use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record per approver, created eagerly when an approval node starts.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowApproval {
    pub id: String,
    pub execution_id: String,
    pub step_id: String,
    pub node_id: String,
    pub approver_id: String,
    pub status: ApprovalStatus,
    #[serde(default)]
    pub comments: Option<String>,
    pub requested_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: ApprovalMetadata,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Delegated,
    Timeout,
    Cancelled,
}

impl ApprovalStatus {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ApprovalStatus::Pending)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ApprovalMetadata {
    /// How the approver was resolved (user/role/department/dynamic).
    #[serde(default)]
    pub source: Option<ApproverSource>,
    /// Position in the sequential (`multiple`) policy.
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub optional: bool,
    /// Escalation level that created this record; 0 for the initial wave.
    #[serde(default)]
    pub escalation_level: u32,
    #[serde(default)]
    pub delegation_chain: Vec<DelegationRecord>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DelegationRecord {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApproverSource {
    User,
    Role,
    Department,
    Dynamic,
}

/// Configuration payload of an `approval` node.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ApprovalNodeConfig {
    pub approvers: Vec<ApproverSpec>,
    #[serde(default = "default_policy")]
    pub completion_policy: CompletionPolicy,
    /// Hours until pending approvals auto-resolve via `timeout_action`.
    #[serde(default)]
    pub auto_approve_after_hours: Option<f64>,
    #[serde(default = "default_timeout_action")]
    pub timeout_action: TimeoutAction,
    #[serde(default)]
    pub allow_delegation: bool,
    #[serde(default)]
    pub escalation: Vec<EscalationLevel>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    /// Base URL for no-login magic links in approval emails.
    #[serde(default)]
    pub magic_link_base_url: Option<String>,
    #[serde(default)]
    pub notify_messaging_channel: bool,
}

fn default_policy() -> CompletionPolicy {
    CompletionPolicy::Single
}

fn default_timeout_action() -> TimeoutAction {
    TimeoutAction::Notify
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ApproverSpec {
    pub source: ApproverSource,
    /// User id, role name, department id, or `${path}` expression per source.
    pub value: String,
    #[serde(default)]
    pub order: i32,
    #[serde(default)]
    pub optional: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    Single,
    Multiple,
    Majority,
    Unanimous,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    AutoApprove,
    AutoReject,
    Notify,
}

/// One level of an escalation chain; fires after its own delay if the
/// request is still pending.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EscalationLevel {
    pub after_hours: f64,
    pub approvers: Vec<ApproverSpec>,
}
