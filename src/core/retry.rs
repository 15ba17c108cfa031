//! Backoff calculation for node retries.

use rand::Rng;
use std::time::Duration;

use crate::model::{BackoffStrategy, RetryConfig};

/// Delay before retry attempt `attempt` (1-based), clamped to
/// `max_delay_ms`.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let attempt = attempt.max(1);
    let initial = config.initial_delay_ms as f64;
    let raw = match config.backoff_strategy {
        BackoffStrategy::Fixed => initial,
        BackoffStrategy::Linear => initial * attempt as f64,
        BackoffStrategy::Exponential => initial * config.multiplier.powi(attempt as i32 - 1),
        BackoffStrategy::Random => {
            let factor: f64 = rand::thread_rng().gen_range(0.5..=1.5);
            initial * factor
        }
    };
    let clamped = raw.min(config.max_delay_ms as f64).max(0.0);
    Duration::from_millis(clamped as u64)
}
