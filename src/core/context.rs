//! Mutable run state for one execution.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::model::{ExecutionLogEntry, LogLevel};

use super::variable_pool::VariablePool;

/// Log entries kept in memory per execution; older entries are dropped.
const LOG_CAPACITY: usize = 1000;

/// Per-execution context: variable bindings, per-node retry counters, a
/// cooperative cancellation flag, and the execution log buffer.
///
/// One context exists per execution; nothing is shared between executions.
pub struct ExecutionContext {
    pub execution_id: String,
    pub variables: VariablePool,
    retry_counts: RwLock<HashMap<String, u32>>,
    loop_counts: RwLock<HashMap<String, u32>>,
    cancelled: Arc<AtomicBool>,
    log: RwLock<Vec<ExecutionLogEntry>>,
}

impl ExecutionContext {
    pub fn new(execution_id: &str, variables: VariablePool) -> Self {
        ExecutionContext {
            execution_id: execution_id.to_string(),
            variables,
            retry_counts: RwLock::new(HashMap::new()),
            loop_counts: RwLock::new(HashMap::new()),
            cancelled: Arc::new(AtomicBool::new(false)),
            log: RwLock::new(Vec::new()),
        }
    }

    /// Child context for a parallel branch: deep copy of the variables,
    /// shared cancellation flag, fresh counters and log.
    pub fn fork(&self) -> ExecutionContext {
        ExecutionContext {
            execution_id: self.execution_id.clone(),
            variables: self.variables.clone(),
            retry_counts: RwLock::new(HashMap::new()),
            loop_counts: RwLock::new(HashMap::new()),
            cancelled: self.cancelled.clone(),
            log: RwLock::new(Vec::new()),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    pub fn retry_count(&self, node_id: &str) -> u32 {
        self.retry_counts.read().get(node_id).copied().unwrap_or(0)
    }

    pub fn increment_retry(&self, node_id: &str) -> u32 {
        let mut counts = self.retry_counts.write();
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Retries across every node so far, mirrored onto the execution row.
    pub fn total_retries(&self) -> u32 {
        self.retry_counts.read().values().sum()
    }

    pub fn loop_count(&self, node_id: &str) -> u32 {
        self.loop_counts.read().get(node_id).copied().unwrap_or(0)
    }

    pub fn increment_loop(&self, node_id: &str) -> u32 {
        let mut counts = self.loop_counts.write();
        let count = counts.entry(node_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn log(&self, level: LogLevel, node_id: Option<&str>, message: impl Into<String>) {
        self.log_at(Utc::now(), level, node_id, message);
    }

    pub fn log_at(
        &self,
        timestamp: DateTime<Utc>,
        level: LogLevel,
        node_id: Option<&str>,
        message: impl Into<String>,
    ) {
        let mut log = self.log.write();
        if log.len() >= LOG_CAPACITY {
            log.remove(0);
        }
        log.push(ExecutionLogEntry {
            timestamp,
            level,
            node_id: node_id.map(|s| s.to_string()),
            message: message.into(),
        });
    }

    pub fn log_entries(&self) -> Vec<ExecutionLogEntry> {
        self.log.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_counters_per_node() {
        let ctx = ExecutionContext::new("ex-1", VariablePool::new());
        assert_eq!(ctx.retry_count("n1"), 0);
        assert_eq!(ctx.increment_retry("n1"), 1);
        assert_eq!(ctx.increment_retry("n1"), 2);
        assert_eq!(ctx.retry_count("n2"), 0);
    }

    #[test]
    fn test_fork_shares_cancellation_not_variables() {
        let ctx = ExecutionContext::new("ex-1", VariablePool::from_value(&json!({"x": 1})));
        let child = ctx.fork();
        child
            .variables
            .set("x", crate::core::Segment::Integer(2));
        assert_eq!(
            ctx.variables.get("x"),
            Some(crate::core::Segment::Integer(1))
        );
        ctx.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_log_buffer_is_bounded() {
        let ctx = ExecutionContext::new("ex-1", VariablePool::new());
        for i in 0..(LOG_CAPACITY + 10) {
            ctx.log(LogLevel::Info, None, format!("entry {}", i));
        }
        let entries = ctx.log_entries();
        assert_eq!(entries.len(), LOG_CAPACITY);
        assert_eq!(entries[0].message, "entry 10");
    }
}
