//! Attempt record storage.
//!
//! [`AttemptStore`] is the seam between the engine and its state. The default
//! backend is the in-process [`MemoryAttemptStore`]; a deployment that scales
//! horizontally can implement the trait over a shared key-value backend with
//! atomic per-key updates without touching the policy or facade layers.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::{error::StoreError, policy, record::AttemptRecord};

/// How often the background sweep runs.
pub const SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// Idle time before the sweep may remove a non-blocked record.
///
/// Deliberately much longer than any sensible `reset_after`, so the sweep is
/// only a memory bound and never interferes with policy-level timing.
pub const SWEEP_IDLE_SECS: i64 = 60 * 60;

/// A per-key read-modify-write step. Returning `None` deletes the record.
pub type RecordUpdate = Box<dyn FnOnce(Option<AttemptRecord>) -> Option<AttemptRecord> + Send>;

/// Storage for one protection instance's attempt records.
///
/// Implementations must make [`update`](AttemptStore::update) atomic per key:
/// the closure observes the current record and its result replaces it with no
/// interleaved writer. Every check-then-act sequence in the engine goes
/// through it.
#[async_trait]
pub trait AttemptStore: Send + Sync + 'static {
    async fn get(&self, id: &str) -> Result<Option<AttemptRecord>, StoreError>;

    async fn insert(&self, id: &str, record: AttemptRecord) -> Result<(), StoreError>;

    /// Remove a record, returning it if one existed.
    async fn remove(&self, id: &str) -> Result<Option<AttemptRecord>, StoreError>;

    /// Atomically transform the record under `id`.
    ///
    /// Returns the record as it was before and after the update.
    async fn update(
        &self,
        id: &str,
        apply: RecordUpdate,
    ) -> Result<(Option<AttemptRecord>, Option<AttemptRecord>), StoreError>;

    async fn len(&self) -> Result<usize, StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    /// Point-in-time copy of all records, for aggregate stats.
    async fn snapshot(&self) -> Result<Vec<AttemptRecord>, StoreError>;

    /// Remove every record that is not actively blocked and has been idle
    /// longer than `idle_for`. Returns the number removed.
    async fn sweep(&self, now: DateTime<Utc>, idle_for: Duration) -> Result<u64, StoreError>;
}

/// In-memory store backed by a concurrent map.
///
/// The map's entry API provides the per-key atomicity that
/// [`AttemptStore::update`] requires.
#[derive(Debug, Default)]
pub struct MemoryAttemptStore {
    records: DashMap<String, AttemptRecord>,
}

impl MemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for MemoryAttemptStore {
    async fn get(&self, id: &str) -> Result<Option<AttemptRecord>, StoreError> {
        Ok(self.records.get(id).map(|entry| entry.value().clone()))
    }

    async fn insert(&self, id: &str, record: AttemptRecord) -> Result<(), StoreError> {
        self.records.insert(id.to_string(), record);
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<Option<AttemptRecord>, StoreError> {
        Ok(self.records.remove(id).map(|(_, record)| record))
    }

    async fn update(
        &self,
        id: &str,
        apply: RecordUpdate,
    ) -> Result<(Option<AttemptRecord>, Option<AttemptRecord>), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.records.entry(id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let previous = Some(occupied.get().clone());
                match apply(previous.clone()) {
                    Some(next) => {
                        occupied.insert(next.clone());
                        Ok((previous, Some(next)))
                    }
                    None => {
                        occupied.remove();
                        Ok((previous, None))
                    }
                }
            }
            Entry::Vacant(vacant) => match apply(None) {
                Some(next) => {
                    vacant.insert(next.clone());
                    Ok((None, Some(next)))
                }
                None => Ok((None, None)),
            },
        }
    }

    async fn len(&self) -> Result<usize, StoreError> {
        Ok(self.records.len())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }

    async fn snapshot(&self) -> Result<Vec<AttemptRecord>, StoreError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn sweep(&self, now: DateTime<Utc>, idle_for: Duration) -> Result<u64, StoreError> {
        use std::sync::atomic::{AtomicU64, Ordering};

        let cutoff = now - idle_for;
        // Count inside the retain closure; differencing map lengths would
        // race with concurrent inserts.
        let removed = AtomicU64::new(0);
        self.records.retain(|_, record| {
            let keep = policy::is_blocked(record, now) || record.last_attempt_at >= cutoff;
            if !keep {
                removed.fetch_add(1, Ordering::Relaxed);
            }
            keep
        });
        Ok(removed.into_inner())
    }
}
