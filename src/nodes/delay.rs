use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use crate::core::ExecutionContext;
use crate::error::NodeError;
use crate::nodes::executor::{NodeContext, NodeExecutor, NodeRunResult};

#[derive(Deserialize)]
struct DelayConfig {
    duration: u64,
    #[serde(default = "default_unit")]
    unit: DelayUnit,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "snake_case")]
enum DelayUnit {
    Seconds,
    Minutes,
    Hours,
    Days,
}

fn default_unit() -> DelayUnit {
    DelayUnit::Seconds
}

impl DelayUnit {
    fn to_millis(self, duration: u64) -> u64 {
        let factor = match self {
            DelayUnit::Seconds => 1000,
            DelayUnit::Minutes => 60 * 1000,
            DelayUnit::Hours => 60 * 60 * 1000,
            DelayUnit::Days => 24 * 60 * 60 * 1000,
        };
        duration.saturating_mul(factor)
    }
}

/// Suspends the current unit of work for the configured duration. The
/// execution stays `running`; this is an in-flight sleep, not a durable
/// wait state.
pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(
        &self,
        _node_id: &str,
        config: &Value,
        ctx: &ExecutionContext,
        _services: &NodeContext,
    ) -> Result<NodeRunResult, NodeError> {
        let cfg: DelayConfig = serde_json::from_value(config.clone())
            .map_err(|e| NodeError::ConfigError(e.to_string()))?;
        let millis = cfg.unit.to_millis(cfg.duration);
        if ctx.is_cancelled() {
            return Err(NodeError::Cancelled);
        }
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(NodeRunResult::advance().with_output("delayed_ms", Value::from(millis)))
    }
}
