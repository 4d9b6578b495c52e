//! Backoff schedules for the three retry tiers.
//!
//! Critical state (camera identity, event identity) retries forever on a
//! flat-topped progressive schedule. Reports about files already durable on
//! network storage get a short bounded schedule. Logs get two tries and are
//! then dropped.

use std::time::Duration;

/// Delay after the given failed attempt (1-based) for critical operations:
/// immediate, 5s, 10s, then 30s forever.
pub fn critical_delay(attempt: u32) -> Duration {
    match attempt {
        0 | 1 => Duration::ZERO,
        2 => Duration::from_secs(5),
        3 => Duration::from_secs(10),
        _ => Duration::from_secs(30),
    }
}

/// `update_file`: three attempts, exponential 1s/2s/4s between them.
pub const UPDATE_FILE_ATTEMPTS: u32 = 3;

pub fn update_file_delay(attempt: u32) -> Duration {
    Duration::from_secs(1 << attempt.saturating_sub(1).min(8))
}

/// `send_logs`: two attempts, 1s then 5s between them.
pub const SEND_LOGS_ATTEMPTS: u32 = 2;

pub fn send_logs_delay(attempt: u32) -> Duration {
    match attempt {
        0 | 1 => Duration::from_secs(1),
        _ => Duration::from_secs(5),
    }
}
