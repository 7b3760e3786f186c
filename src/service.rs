//! The protection facade.
//!
//! [`ProtectionService`] composes the store, the policy functions, the clock,
//! and the event bus into the public contract an authentication handler calls
//! around each login attempt: check first, then record the outcome.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use palisade::{MemoryAttemptStore, PolicyConfig, ProtectionService, TrackingId};
//!
//! let service = ProtectionService::new(Arc::new(MemoryAttemptStore::new()), PolicyConfig::standard())?;
//!
//! let id = TrackingId::scoped(client_ip, submitted_email);
//! let status = service.check(&id).await?;
//! if status.blocked {
//!     // Translate into a 429 with Retry-After derived from the status.
//! }
//!
//! // ...after the authentication attempt:
//! match outcome {
//!     Ok(_) => service.record_successful_attempt(&id).await?,
//!     Err(_) => service.record_failed_attempt(&id, None).await?,
//! }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

use crate::{
    clock::{Clock, SystemClock},
    config::PolicyConfig,
    error::Error,
    events::{Event, EventBus, Metadata},
    identifier::TrackingId,
    policy,
    store::{AttemptStore, SWEEP_IDLE_SECS, SWEEP_INTERVAL},
};

/// Result of a block check, consumed by the transport layer.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockStatus {
    pub blocked: bool,
    /// Failed attempts in the current streak; `None` when there is no
    /// history.
    pub attempts: Option<u32>,
    /// Time left on the active block.
    pub remaining: Option<Duration>,
    pub blocked_until: Option<DateTime<Utc>>,
}

impl BlockStatus {
    fn unblocked(attempts: Option<u32>) -> Self {
        Self {
            blocked: false,
            attempts,
            remaining: None,
            blocked_until: None,
        }
    }

    /// Seconds until the block expires, rounded up, for a Retry-After header.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.remaining
            .map(|remaining| (remaining.num_milliseconds().max(0) as u64).div_ceil(1000) as i64)
    }
}

/// Point-in-time aggregate over the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectionStats {
    pub total_entries: usize,
    /// Records whose block is currently active.
    pub blocked_entries: usize,
    /// Mean attempt count across all entries; 0.0 when the store is empty.
    pub average_attempts: f64,
}

/// Brute force protection over one attempt store.
///
/// Instances with different policies (say, a standard one for login and a
/// strict one for credential resets) must each own an independent store.
///
/// # Thread Safety
///
/// The service is `Send + Sync` and can be shared across tasks; per-record
/// read-modify-write sequences go through [`AttemptStore::update`], which the
/// store makes atomic per key.
pub struct ProtectionService<S: AttemptStore> {
    store: Arc<S>,
    config: PolicyConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl<S: AttemptStore> ProtectionService<S> {
    /// Create a service over `store` with the given policy, on the system
    /// clock. Fails fast on an invalid configuration.
    pub fn new(store: Arc<S>, config: PolicyConfig) -> Result<Self, Error> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) but with an injected time source.
    pub fn with_clock(
        store: Arc<S>,
        config: PolicyConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            clock,
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// The bus audit handlers register on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Current block state for an identifier.
    ///
    /// As a side effect, a streak that has been idle past `reset_after` (and
    /// is not blocked) is removed here, so the caller sees a clean state. An
    /// absent record is simply "not blocked".
    pub async fn check(&self, id: &TrackingId) -> Result<BlockStatus, Error> {
        let now = self.clock.now();
        let config = self.config.clone();
        let (_, current) = self
            .store
            .update(
                id.as_str(),
                Box::new(move |record| record.filter(|r| !policy::is_stale(r, &config, now))),
            )
            .await?;

        let Some(record) = current else {
            return Ok(BlockStatus::unblocked(None));
        };

        if let Some(until) = record.blocked_until.filter(|until| now < *until) {
            return Ok(BlockStatus {
                blocked: true,
                attempts: Some(record.attempts),
                remaining: Some(until - now),
                blocked_until: Some(until),
            });
        }

        Ok(BlockStatus::unblocked(Some(record.attempts)))
    }

    /// Convenience wrapper over [`check`](Self::check).
    pub async fn is_blocked(&self, id: &TrackingId) -> Result<bool, Error> {
        Ok(self.check(id).await?.blocked)
    }

    /// Record a failed authentication attempt.
    ///
    /// Creates the record on the first failure, increments it on subsequent
    /// ones, and applies (or refreshes) a block once the threshold is
    /// reached. `metadata` is carried through to the audit event untouched.
    pub async fn record_failed_attempt(
        &self,
        id: &TrackingId,
        metadata: Option<Metadata>,
    ) -> Result<(), Error> {
        let now = self.clock.now();
        let config = self.config.clone();
        let (previous, current) = self
            .store
            .update(
                id.as_str(),
                Box::new(move |record| Some(policy::apply_failure(record.as_ref(), &config, now))),
            )
            .await?;

        let Some(record) = current else {
            return Ok(());
        };

        let was_blocked = previous
            .as_ref()
            .is_some_and(|prev| policy::is_blocked(prev, now));
        let active_block = record.blocked_until.filter(|until| now < *until);

        match (was_blocked, active_block) {
            (true, Some(until)) => {
                tracing::warn!(
                    identifier = %id,
                    attempts = record.attempts,
                    "Failed attempt against an actively blocked identifier"
                );
                self.events
                    .emit(&Event::BlockHit {
                        identifier: id.to_string(),
                        attempts: record.attempts,
                        blocked_until: until,
                        metadata,
                        timestamp: now,
                    })
                    .await;
            }
            (false, Some(until)) => {
                let duration = record.current_block.unwrap_or(self.config.initial_block);
                tracing::warn!(
                    identifier = %id,
                    attempts = record.attempts,
                    block_ms = duration.num_milliseconds(),
                    "Blocking identifier after repeated failed attempts"
                );
                self.events
                    .emit(&Event::BlockTriggered {
                        identifier: id.to_string(),
                        attempts: record.attempts,
                        duration,
                        blocked_until: until,
                        metadata,
                        timestamp: now,
                    })
                    .await;
            }
            _ => {
                tracing::info!(
                    identifier = %id,
                    attempts = record.attempts,
                    "Recorded failed attempt"
                );
                self.events
                    .emit(&Event::FailedAttempt {
                        identifier: id.to_string(),
                        attempts: record.attempts,
                        metadata,
                        timestamp: now,
                    })
                    .await;
            }
        }

        Ok(())
    }

    /// Clear any history for an identifier after a successful authentication.
    ///
    /// Idempotent; calling it with no existing record is a no-op.
    pub async fn record_successful_attempt(&self, id: &TrackingId) -> Result<(), Error> {
        if let Some(record) = self.store.remove(id.as_str()).await? {
            tracing::info!(
                identifier = %id,
                attempts = record.attempts,
                "Cleared attempt history after successful authentication"
            );
            self.events
                .emit(&Event::ClearedOnSuccess {
                    identifier: id.to_string(),
                    attempts: record.attempts,
                    timestamp: self.clock.now(),
                })
                .await;
        }
        Ok(())
    }

    /// Administrative unblock, regardless of state.
    ///
    /// Same mechanics as [`record_successful_attempt`](Self::record_successful_attempt),
    /// distinct audit semantics. Returns whether the identifier was actively
    /// blocked.
    pub async fn reset(&self, id: &TrackingId) -> Result<bool, Error> {
        let now = self.clock.now();
        let Some(record) = self.store.remove(id.as_str()).await? else {
            return Ok(false);
        };

        let was_blocked = policy::is_blocked(&record, now);
        tracing::info!(
            identifier = %id,
            attempts = record.attempts,
            was_blocked,
            "Manually reset attempt history"
        );
        self.events
            .emit(&Event::ManualReset {
                identifier: id.to_string(),
                attempts: record.attempts,
                was_blocked,
                timestamp: now,
            })
            .await;

        Ok(was_blocked)
    }

    /// Aggregate snapshot computed by iterating the store.
    pub async fn stats(&self) -> Result<ProtectionStats, Error> {
        let now = self.clock.now();
        let records = self.store.snapshot().await?;

        let total_entries = records.len();
        let blocked_entries = records
            .iter()
            .filter(|record| policy::is_blocked(record, now))
            .count();
        let average_attempts = if total_entries == 0 {
            0.0
        } else {
            records.iter().map(|r| f64::from(r.attempts)).sum::<f64>() / total_entries as f64
        };

        Ok(ProtectionStats {
            total_entries,
            blocked_entries,
            average_attempts,
        })
    }

    /// Start the background sweep task.
    ///
    /// Runs [`AttemptStore::sweep`] every [`SWEEP_INTERVAL`] and stops when
    /// the `shutdown` channel changes, so shutdown stays deterministic and no
    /// handle outlives the caller's runtime.
    pub fn start_sweep_task(
        &self,
        mut shutdown: watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                tokio::select! {
                    _ = timer.tick() => {
                        let now = clock.now();
                        match store.sweep(now, Duration::seconds(SWEEP_IDLE_SECS)).await {
                            Ok(removed) if removed > 0 => {
                                tracing::info!(removed, "Swept idle attempt records");
                                events
                                    .emit(&Event::SweepCompleted {
                                        removed,
                                        timestamp: now,
                                    })
                                    .await;
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Attempt store sweep failed");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down attempt sweep task");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, store::MemoryAttemptStore};
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn test_config() -> PolicyConfig {
        PolicyConfig {
            max_attempts: 3,
            initial_block: Duration::milliseconds(1000),
            backoff_multiplier: 2.0,
            max_block: Duration::milliseconds(5000),
            reset_after: Duration::seconds(60),
        }
    }

    fn service(
        config: PolicyConfig,
    ) -> (
        ProtectionService<MemoryAttemptStore>,
        Arc<ManualClock>,
        Arc<MemoryAttemptStore>,
    ) {
        let store = Arc::new(MemoryAttemptStore::new());
        let clock = Arc::new(ManualClock::default());
        let service =
            ProtectionService::with_clock(store.clone(), config, clock.clone()).unwrap();
        (service, clock, store)
    }

    /// Handler that records every event kind it sees, in order.
    struct RecordingHandler {
        seen: Arc<Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl crate::events::EventHandler for RecordingHandler {
        async fn handle_event(&self, event: &Event) -> Result<(), crate::error::EventError> {
            let kind = match event {
                Event::FailedAttempt { .. } => "failed",
                Event::BlockTriggered { .. } => "block_triggered",
                Event::BlockHit { .. } => "block_hit",
                Event::ClearedOnSuccess { .. } => "cleared",
                Event::ManualReset { .. } => "manual_reset",
                Event::SweepCompleted { .. } => "sweep",
            };
            self.seen.lock().unwrap().push(kind);
            Ok(())
        }
    }

    #[tokio::test]
    async fn invalid_config_rejected_at_construction() {
        let store = Arc::new(MemoryAttemptStore::new());
        let config = PolicyConfig {
            max_attempts: 0,
            ..PolicyConfig::standard()
        };
        assert!(ProtectionService::new(store, config).is_err());
    }

    #[tokio::test]
    async fn unknown_identifier_is_not_blocked() {
        let (service, _, _) = service(test_config());
        let status = service.check(&TrackingId::new("nobody")).await.unwrap();

        assert!(!status.blocked);
        assert_eq!(status.attempts, None);
        assert_eq!(status.retry_after_seconds(), None);
    }

    #[tokio::test]
    async fn attempts_below_threshold_reported_exactly() {
        let (service, _, _) = service(test_config());
        let id = TrackingId::new("k");

        for expected in 1..=2 {
            service.record_failed_attempt(&id, None).await.unwrap();
            let status = service.check(&id).await.unwrap();
            assert!(!status.blocked);
            assert_eq!(status.attempts, Some(expected));
        }
    }

    #[tokio::test]
    async fn threshold_blocks_for_initial_duration() {
        let (service, _, _) = service(test_config());
        let id = TrackingId::new("k");

        for _ in 0..3 {
            service.record_failed_attempt(&id, None).await.unwrap();
        }

        let status = service.check(&id).await.unwrap();
        assert!(status.blocked);
        assert_eq!(status.attempts, Some(3));
        assert_eq!(status.remaining, Some(Duration::milliseconds(1000)));
        assert_eq!(status.retry_after_seconds(), Some(1));
    }

    #[tokio::test]
    async fn block_expires_with_time() {
        let (service, clock, _) = service(test_config());
        let id = TrackingId::new("k");

        for _ in 0..3 {
            service.record_failed_attempt(&id, None).await.unwrap();
        }
        assert!(service.is_blocked(&id).await.unwrap());

        clock.advance(Duration::milliseconds(1100));
        let status = service.check(&id).await.unwrap();
        assert!(!status.blocked);
        // History survives expiry until the reset window passes.
        assert_eq!(status.attempts, Some(3));
    }

    #[tokio::test]
    async fn successful_attempt_clears_history() {
        let (service, _, store) = service(test_config());
        let id = TrackingId::new("k");

        for _ in 0..3 {
            service.record_failed_attempt(&id, None).await.unwrap();
        }
        assert!(service.is_blocked(&id).await.unwrap());

        service.record_successful_attempt(&id).await.unwrap();

        let status = service.check(&id).await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, None);
        assert_eq!(store.len().await.unwrap(), 0);

        // Idempotent with no record present.
        service.record_successful_attempt(&id).await.unwrap();
    }

    #[tokio::test]
    async fn manual_reset_unblocks_immediately() {
        let (service, _, _) = service(test_config());
        let id = TrackingId::new("k");

        for _ in 0..3 {
            service.record_failed_attempt(&id, None).await.unwrap();
        }

        assert!(service.reset(&id).await.unwrap());
        let status = service.check(&id).await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, None);

        // Nothing left to reset.
        assert!(!service.reset(&id).await.unwrap());
    }

    #[tokio::test]
    async fn idle_streak_lazily_removed_on_check() {
        let (service, clock, store) = service(test_config());
        let id = TrackingId::new("k");

        service.record_failed_attempt(&id, None).await.unwrap();
        service.record_failed_attempt(&id, None).await.unwrap();

        clock.advance(Duration::seconds(61));
        let status = service.check(&id).await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, None);
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn identifiers_are_tracked_independently() {
        let (service, _, _) = service(test_config());
        let a = TrackingId::new("a");
        let b = TrackingId::new("b");

        for _ in 0..3 {
            service.record_failed_attempt(&a, None).await.unwrap();
        }

        assert!(service.is_blocked(&a).await.unwrap());
        let status = service.check(&b).await.unwrap();
        assert!(!status.blocked);
        assert_eq!(status.attempts, None);
    }

    #[tokio::test]
    async fn scoped_identifier_does_not_block_base() {
        let (service, _, _) = service(test_config());
        let pair = TrackingId::scoped("203.0.113.7", "alice@example.com");
        let other = TrackingId::scoped("203.0.113.7", "bob@example.com");

        for _ in 0..3 {
            service.record_failed_attempt(&pair, None).await.unwrap();
        }

        assert!(service.is_blocked(&pair).await.unwrap());
        assert!(!service.is_blocked(&other).await.unwrap());
        assert!(
            !service
                .is_blocked(&TrackingId::new("203.0.113.7"))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn stats_reflect_live_records() {
        let (service, _, _) = service(test_config());

        let empty = service.stats().await.unwrap();
        assert_eq!(empty.total_entries, 0);
        assert_eq!(empty.blocked_entries, 0);
        assert_eq!(empty.average_attempts, 0.0);

        // "a" gets blocked with 3 attempts, "b" stays at 1.
        let a = TrackingId::new("a");
        let b = TrackingId::new("b");
        for _ in 0..3 {
            service.record_failed_attempt(&a, None).await.unwrap();
        }
        service.record_failed_attempt(&b, None).await.unwrap();

        let stats = service.stats().await.unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.blocked_entries, 1);
        assert_eq!(stats.average_attempts, 2.0);
    }

    #[tokio::test]
    async fn audit_events_follow_the_lifecycle() {
        let (service, _, _) = service(test_config());
        let seen = Arc::new(Mutex::new(Vec::new()));
        service
            .events()
            .register(Arc::new(RecordingHandler { seen: seen.clone() }))
            .await;

        let id = TrackingId::new("k");
        service.record_failed_attempt(&id, None).await.unwrap();
        service.record_failed_attempt(&id, None).await.unwrap();
        service.record_failed_attempt(&id, None).await.unwrap(); // block
        service.record_failed_attempt(&id, None).await.unwrap(); // hit
        service.record_successful_attempt(&id).await.unwrap();

        service.record_failed_attempt(&id, None).await.unwrap();
        service.reset(&id).await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                "failed",
                "failed",
                "block_triggered",
                "block_hit",
                "cleared",
                "failed",
                "manual_reset",
            ]
        );
    }

    #[tokio::test]
    async fn metadata_passes_through_to_events() {
        let (service, _, _) = service(test_config());

        #[derive(Default)]
        struct CaptureHandler {
            metadata: Mutex<Option<Metadata>>,
        }

        #[async_trait]
        impl crate::events::EventHandler for CaptureHandler {
            async fn handle_event(
                &self,
                event: &Event,
            ) -> Result<(), crate::error::EventError> {
                if let Event::FailedAttempt { metadata, .. } = event {
                    *self.metadata.lock().unwrap() = metadata.clone();
                }
                Ok(())
            }
        }

        let handler = Arc::new(CaptureHandler::default());
        service.events().register(handler.clone()).await;

        let mut metadata = Metadata::new();
        metadata.insert("user_agent".into(), serde_json::json!("curl/8.0"));
        service
            .record_failed_attempt(&TrackingId::new("k"), Some(metadata.clone()))
            .await
            .unwrap();

        assert_eq!(*handler.metadata.lock().unwrap(), Some(metadata));
    }

    #[tokio::test]
    async fn independent_instances_do_not_share_state() {
        let (standard, _, _) = service(test_config());
        let (strict, _, _) = service(PolicyConfig {
            max_attempts: 2,
            ..test_config()
        });

        let id = TrackingId::new("k");
        for _ in 0..3 {
            standard.record_failed_attempt(&id, None).await.unwrap();
        }

        assert!(standard.is_blocked(&id).await.unwrap());
        assert!(!strict.is_blocked(&id).await.unwrap());
    }
}
