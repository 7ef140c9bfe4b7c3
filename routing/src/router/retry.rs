//! Attempt budget and backoff.

use crate::config::RetryConfig;
use crate::task::Task;
use std::time::Duration;

/// Priority from which a task gets one extra attempt.
pub const ELEVATED_PRIORITY: u8 = 6;
/// Priority from which a task gets two extra attempts instead of one.
pub const HIGH_PRIORITY: u8 = 8;

/// Total attempts allowed for `task`.
///
/// The base budget comes from the task, else the applied policy, else the
/// config; high-priority tasks get extra attempts on top.
pub fn max_attempts(task: &Task, policy_max_retries: Option<u32>, config: &RetryConfig) -> u32 {
    let base = task
        .constraints
        .max_retries
        .or(policy_max_retries)
        .unwrap_or(config.default_max_attempts)
        .max(1);
    let bonus = if task.priority >= HIGH_PRIORITY {
        2
    } else if task.priority >= ELEVATED_PRIORITY {
        1
    } else {
        0
    };
    base.saturating_add(bonus)
}

/// Delay before the attempt after `attempt` (1-based): `min(base·2^(attempt−1), max)`.
pub fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exp = attempt.saturating_sub(1).min(32);
    let delay = base_ms.saturating_mul(1u64 << exp);
    Duration::from_millis(delay.min(max_ms))
}
