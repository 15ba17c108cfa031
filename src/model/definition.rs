use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::evaluator::ConditionOperator;

/// Default per-node timeout when the node does not declare one.
pub const DEFAULT_NODE_TIMEOUT_MS: u64 = 300_000;

/// Immutable workflow graph, loaded by id from a
/// [`DefinitionStore`](crate::store::DefinitionStore). The engine only reads
/// it; authoring happens elsewhere.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub trigger_type: TriggerType,
    /// Gating conditions evaluated against the raw trigger payload before
    /// any execution is created.
    #[serde(default)]
    pub trigger_conditions: Vec<EdgeCondition>,
    #[serde(default)]
    pub schedule: Option<ScheduleSpec>,
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<WorkflowEdge>,
    /// Variable declarations seeded into every execution before the trigger
    /// payload is merged on top.
    #[serde(default)]
    pub variables: Value,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

fn default_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Event,
    Manual,
    Scheduled,
    SlaWarning,
}

/// Schedule descriptor for `scheduled` definitions, evaluated by the
/// trigger loop each tick.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: u32, hour: u32 },
    Interval { minutes: u32 },
}

/// A typed unit of work in the graph. The `config` payload is interpreted
/// only by the node's executor.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl WorkflowNode {
    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms.unwrap_or(DEFAULT_NODE_TIMEOUT_MS)
    }
}

/// Closed set of node types. Dispatch is an exhaustive match, so adding a
/// variant forces every dispatch site to handle it. An unrecognized type
/// tag parses to [`NodeType::Unknown`] and is rejected at graph build.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Start,
    End,
    Condition,
    Action,
    Approval,
    Delay,
    Notification,
    Webhook,
    Script,
    HumanTask,
    Loop,
    SubWorkflow,
    Parallel,
    Integration,
    MlPrediction,
    #[serde(other)]
    Unknown,
}

impl NodeType {
    /// Node types that suspend the execution until an external resume call.
    pub fn is_waiting(&self) -> bool {
        matches!(self, NodeType::Approval | NodeType::HumanTask)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_else(|| format!("{:?}", self));
        write!(f, "{}", s)
    }
}

/// Directed transition between nodes. Unconditioned edges act as the
/// default branch; higher priority is evaluated first.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct WorkflowEdge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub conditions: Vec<EdgeCondition>,
    #[serde(default)]
    pub priority: i32,
}

/// Field/operator/value triple, shared by edge routing and trigger gating.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EdgeCondition {
    /// Dot path resolved against the execution's variables.
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_strategy")]
    pub backoff_strategy: BackoffStrategy,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: default_max_attempts(),
            backoff_strategy: default_backoff_strategy(),
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    Fixed,
    Linear,
    Exponential,
    Random,
}

fn default_max_attempts() -> u32 {
    1
}
fn default_backoff_strategy() -> BackoffStrategy {
    BackoffStrategy::Fixed
}
fn default_initial_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    60_000
}
fn default_multiplier() -> f64 {
    2.0
}
