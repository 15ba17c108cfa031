//! Per-definition execution metrics. Purely additive; recording never
//! fails and never raises.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Rolling window of recorded durations per definition.
const DURATION_WINDOW: usize = 1000;

#[derive(Default)]
struct DefinitionStats {
    execution_count: u64,
    success_count: u64,
    failure_count: u64,
    durations_ms: Vec<u64>,
    error_types: HashMap<&'static str, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowMetrics {
    pub execution_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    pub error_types: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MetricsCollector {
    stats: RwLock<HashMap<String, DefinitionStats>>,
}

/// Bucket an error message by keyword.
fn classify_error(message: &str) -> &'static str {
    let lower = message.to_lowercase();
    if lower.contains("timeout") || lower.contains("timed out") {
        "timeout"
    } else if lower.contains("network") || lower.contains("connect") || lower.contains("dns") {
        "network"
    } else if lower.contains("validation") || lower.contains("invalid") {
        "validation"
    } else if lower.contains("permission") || lower.contains("denied") || lower.contains("forbidden")
    {
        "permission"
    } else {
        "unknown"
    }
}

fn percentile(sorted: &[u64], pct: f64) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (pct / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_execution(
        &self,
        definition_id: &str,
        success: bool,
        duration: Duration,
        error: Option<&str>,
    ) {
        let mut stats = self.stats.write();
        let entry = stats.entry(definition_id.to_string()).or_default();
        entry.execution_count += 1;
        if success {
            entry.success_count += 1;
        } else {
            entry.failure_count += 1;
            if let Some(message) = error {
                *entry.error_types.entry(classify_error(message)).or_insert(0) += 1;
            }
        }
        if entry.durations_ms.len() >= DURATION_WINDOW {
            entry.durations_ms.remove(0);
        }
        entry.durations_ms.push(duration.as_millis() as u64);
    }

    pub fn snapshot(&self, definition_id: &str) -> Option<WorkflowMetrics> {
        let stats = self.stats.read();
        let entry = stats.get(definition_id)?;
        let mut sorted = entry.durations_ms.clone();
        sorted.sort_unstable();
        let sum: u64 = sorted.iter().sum();
        Some(WorkflowMetrics {
            execution_count: entry.execution_count,
            success_count: entry.success_count,
            failure_count: entry.failure_count,
            success_rate: if entry.execution_count == 0 {
                0.0
            } else {
                entry.success_count as f64 / entry.execution_count as f64
            },
            avg_duration_ms: if sorted.is_empty() {
                0.0
            } else {
                sum as f64 / sorted.len() as f64
            },
            min_duration_ms: sorted.first().copied().unwrap_or(0),
            max_duration_ms: sorted.last().copied().unwrap_or(0),
            p50_duration_ms: percentile(&sorted, 50.0),
            p95_duration_ms: percentile(&sorted, 95.0),
            p99_duration_ms: percentile(&sorted, 99.0),
            error_types: entry
                .error_types
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert_eq!(classify_error("Node timed out: n1"), "timeout");
        assert_eq!(classify_error("connection refused"), "network");
        assert_eq!(classify_error("invalid payload shape"), "validation");
        assert_eq!(classify_error("permission denied"), "permission");
        assert_eq!(classify_error("something odd"), "unknown");
    }

    #[test]
    fn test_counts_and_rates() {
        let metrics = MetricsCollector::new();
        metrics.record_execution("wf-1", true, Duration::from_millis(100), None);
        metrics.record_execution("wf-1", true, Duration::from_millis(200), None);
        metrics.record_execution("wf-1", false, Duration::from_millis(300), Some("timeout"));
        let snap = metrics.snapshot("wf-1").unwrap();
        assert_eq!(snap.execution_count, 3);
        assert_eq!(snap.success_count, 2);
        assert_eq!(snap.failure_count, 1);
        assert!((snap.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(snap.error_types.get("timeout"), Some(&1));
    }

    #[test]
    fn test_percentiles() {
        let metrics = MetricsCollector::new();
        for ms in 1..=100u64 {
            metrics.record_execution("wf-1", true, Duration::from_millis(ms), None);
        }
        let snap = metrics.snapshot("wf-1").unwrap();
        assert_eq!(snap.min_duration_ms, 1);
        assert_eq!(snap.max_duration_ms, 100);
        assert_eq!(snap.p50_duration_ms, 50);
        assert_eq!(snap.p95_duration_ms, 95);
        assert_eq!(snap.p99_duration_ms, 99);
        assert!((snap.avg_duration_ms - 50.5).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let metrics = MetricsCollector::new();
        for _ in 0..(DURATION_WINDOW + 50) {
            metrics.record_execution("wf-1", true, Duration::from_millis(10), None);
        }
        let snap = metrics.snapshot("wf-1").unwrap();
        assert_eq!(snap.execution_count, (DURATION_WINDOW + 50) as u64);
        assert_eq!(snap.max_duration_ms, 10);
    }

    #[test]
    fn test_unknown_definition() {
        assert!(MetricsCollector::new().snapshot("missing").is_none());
    }
}
