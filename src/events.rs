//! Audit events emitted by the protection engine.
//!
//! Events are the engine's outbound observability surface: the facade emits
//! one for every state change an auditor would care about, and the embedding
//! application registers handlers (log shippers, alerting, metrics) on the
//! [`EventBus`]. The engine itself never interprets the free-form metadata
//! attached to failures; it is carried through untouched.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;

use crate::error::EventError;

/// Free-form context attached by the caller to a failed attempt, e.g. the
/// request path or user agent. Passed through to handlers as-is.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// State changes announced to registered handlers.
///
/// Every variant carries the tracking identifier (where one is involved) and
/// the attempt count, so handlers can correlate without re-querying the
/// engine. Identifiers may contain raw client input; handlers that persist
/// them should hash or redact as their audit policy requires.
#[derive(Debug, Clone)]
pub enum Event {
    /// A failed attempt was recorded without triggering a block. An
    /// `attempts` of 1 marks the start of a new streak.
    FailedAttempt {
        identifier: String,
        attempts: u32,
        metadata: Option<Metadata>,
        timestamp: DateTime<Utc>,
    },

    /// The attempt threshold was reached and a block was put in place.
    ///
    /// Security-critical; this is the variant alerting should key on.
    BlockTriggered {
        identifier: String,
        attempts: u32,
        /// Length of the block just applied, after backoff and capping.
        duration: Duration,
        blocked_until: DateTime<Utc>,
        metadata: Option<Metadata>,
        timestamp: DateTime<Utc>,
    },

    /// A failed attempt landed while a block was already active. The block's
    /// expiry is refreshed but its duration is not escalated.
    BlockHit {
        identifier: String,
        attempts: u32,
        blocked_until: DateTime<Utc>,
        metadata: Option<Metadata>,
        timestamp: DateTime<Utc>,
    },

    /// Attempt history was cleared because authentication succeeded.
    ClearedOnSuccess {
        identifier: String,
        /// Attempts the streak had accumulated before it was cleared.
        attempts: u32,
        timestamp: DateTime<Utc>,
    },

    /// Attempt history was cleared by an administrative reset.
    ManualReset {
        identifier: String,
        attempts: u32,
        /// Whether the identifier was actively blocked at the time.
        was_blocked: bool,
        timestamp: DateTime<Utc>,
    },

    /// A background sweep pass removed idle records.
    SweepCompleted {
        removed: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A consumer of engine events.
///
/// Handlers run inline on the emitting task; long-running work should be
/// forwarded to a channel or spawned task by the handler itself.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle_event(&self, event: &Event) -> Result<(), EventError>;
}

/// Fan-out of events to registered handlers.
///
/// Handler failures are logged and swallowed: the tracking path stays total
/// and one misbehaving audit sink cannot break abuse protection.
#[derive(Clone, Default)]
pub struct EventBus {
    handlers: Arc<RwLock<Vec<Arc<dyn EventHandler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler to receive all subsequent events.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        self.handlers.write().await.push(handler);
    }

    /// Emit an event to all registered handlers.
    pub async fn emit(&self, event: &Event) {
        for handler in self.handlers.read().await.iter() {
            if let Err(e) = handler.handle_event(event).await {
                tracing::warn!(error = %e, "Event handler failed");
            }
        }
    }
}
