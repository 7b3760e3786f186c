//! Per-identifier attempt state.

use chrono::{DateTime, Duration, Utc};

/// Failure streak state for one tracking identifier.
///
/// A record exists only while there is something to remember: it is created
/// on the first failed attempt, mutated in place on subsequent failures, and
/// removed outright on success, manual reset, lazy expiry, or sweep. A live
/// record always has `attempts >= 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptRecord {
    /// Consecutive failed attempts in the current streak.
    pub attempts: u32,

    /// When the current streak started.
    pub first_attempt_at: DateTime<Utc>,

    /// Most recent failed attempt.
    pub last_attempt_at: DateTime<Utc>,

    /// When the active block expires; `None` means not blocked.
    pub blocked_until: Option<DateTime<Utc>>,

    /// Duration used for the most recent block, carried forward to compute
    /// the next backoff step. Non-decreasing across consecutive re-blocks,
    /// capped at the configured maximum.
    pub current_block: Option<Duration>,
}

impl AttemptRecord {
    /// A fresh record for the first failure of a streak.
    pub fn first(now: DateTime<Utc>) -> Self {
        Self {
            attempts: 1,
            first_attempt_at: now,
            last_attempt_at: now,
            blocked_until: None,
            current_block: None,
        }
    }
}
