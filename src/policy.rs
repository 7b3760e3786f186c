//! Pure blocking and backoff decisions.
//!
//! Everything in this module is a function of `(record, config, now)`: no
//! store access, no I/O, no side effects. The facade owns the store and the
//! clock and feeds both in; this keeps every decision unit-testable without a
//! runtime.

use chrono::{DateTime, Duration, Utc};

use crate::{config::PolicyConfig, record::AttemptRecord};

/// Whether the record's block is currently active.
pub fn is_blocked(record: &AttemptRecord, now: DateTime<Utc>) -> bool {
    record.blocked_until.is_some_and(|until| now < until)
}

/// Whether a non-blocked streak has been idle past the reset window and
/// should be discarded.
pub fn is_stale(record: &AttemptRecord, config: &PolicyConfig, now: DateTime<Utc>) -> bool {
    !is_blocked(record, now) && now - record.last_attempt_at > config.reset_after
}

/// Block duration for a failure at or past the attempt threshold.
///
/// First offense uses the configured initial duration. A re-offense after an
/// expired block escalates the previous duration by the multiplier, capped at
/// the maximum. A failure landing while a block is still active keeps the
/// current duration unchanged.
pub fn next_block_duration(
    record: &AttemptRecord,
    config: &PolicyConfig,
    now: DateTime<Utc>,
) -> Duration {
    match (record.blocked_until, record.current_block) {
        (Some(until), Some(current)) if now < until => current,
        (Some(_), Some(current)) => {
            let scaled_ms =
                (current.num_milliseconds() as f64 * config.backoff_multiplier).round() as i64;
            Duration::milliseconds(scaled_ms).min(config.max_block)
        }
        _ => config.initial_block,
    }
}

/// The full record transition for one failed attempt.
///
/// A previous streak that has gone stale is discarded and the failure starts
/// a new record. Once the attempt count is at or past the threshold the
/// record is (re-)blocked: `blocked_until` moves to `now` plus the duration
/// from [`next_block_duration`]. A failure during an active block therefore
/// refreshes the block's end without escalating its length.
pub fn apply_failure(
    previous: Option<&AttemptRecord>,
    config: &PolicyConfig,
    now: DateTime<Utc>,
) -> AttemptRecord {
    let mut record = match previous {
        Some(prev) if !is_stale(prev, config, now) => {
            let mut next = prev.clone();
            next.attempts += 1;
            next.last_attempt_at = now;
            next
        }
        _ => AttemptRecord::first(now),
    };

    if record.attempts >= config.max_attempts {
        let duration = next_block_duration(&record, config, now);
        record.blocked_until = Some(now + duration);
        record.current_block = Some(duration);
    }

    record
}
