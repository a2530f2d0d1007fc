//! HTTP retry classification and backoff, shared by the transport client and
//! the sync engine's cycle scheduler.

use crate::errors::RetryClass;

/// Classify a raw HTTP status into a retry policy, ahead of it being wrapped
/// into a `CoreError`.
pub fn classify_http_status(status: u16) -> RetryClass {
    match status {
        401 | 403 => RetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 => RetryClass::Retryable,
        500..=599 => RetryClass::Retryable,
        _ => RetryClass::Permanent,
    }
}

const MAX_EXPONENT: i32 = 8;
const BASE_DELAY_SECONDS: i64 = 5;

/// Exponential backoff in seconds, capped at `2^8 * BASE_DELAY_SECONDS`.
pub fn backoff_seconds(consecutive_failures: i32) -> i64 {
    let capped = i64::from(consecutive_failures.clamp(0, MAX_EXPONENT));
    2_i64.pow(capped as u32) * BASE_DELAY_SECONDS
}

/// Backoff with up to 20% jitter, used so that many devices retrying at once
/// do not stampede the relay in lockstep.
pub fn backoff_seconds_with_jitter(consecutive_failures: i32, jitter_roll: f64) -> i64 {
    let base = backoff_seconds(consecutive_failures);
    let jitter_fraction = jitter_roll.clamp(0.0, 1.0) * 0.20;
    base + (base as f64 * jitter_fraction) as i64
}

/// Foreground sync loop interval, matching the client's periodic-trigger cadence.
pub const FOREGROUND_SYNC_INTERVAL_SECS: u64 = 45;
/// Jitter added on top of the foreground interval to avoid thundering herds.
pub const FOREGROUND_SYNC_INTERVAL_JITTER_SECS: u64 = 5;
