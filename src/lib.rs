//! Palisade: in-memory brute force protection for authentication endpoints.
//!
//! Palisade tracks failed authentication attempts per identifier and blocks
//! offenders with exponentially growing, capped backoff. It is a library with
//! no transport surface of its own: the HTTP layer builds a [`TrackingId`]
//! from the client address (optionally scoped to the submitted account),
//! asks the [`ProtectionService`] whether it is blocked, attempts
//! authentication, and reports the outcome back.
//!
//! # Features
//!
//! - Per-identifier failed attempt tracking with a configurable threshold
//! - Exponential backoff blocking, capped at a maximum duration
//! - Lazy time-based streak reset plus a periodic sweep bounding memory
//! - Named policy presets ([`PolicyConfig::standard`], [`PolicyConfig::strict`])
//! - Injectable [`Clock`] for deterministic tests
//! - Audit [`events`] and `tracing` instrumentation on every state change
//!
//! State lives behind the [`AttemptStore`] trait; [`MemoryAttemptStore`] is
//! the single-process default. All tracking operations are total: an unknown
//! identifier is simply not blocked, and translating a block into a
//! transport-level "too many attempts" response is the caller's job.

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod identifier;
pub mod policy;
pub mod record;
pub mod service;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::PolicyConfig;
pub use error::{ConfigError, Error, EventError, StoreError};
pub use events::{Event, EventBus, EventHandler, Metadata};
pub use identifier::TrackingId;
pub use record::AttemptRecord;
pub use service::{BlockStatus, ProtectionService, ProtectionStats};
pub use store::{AttemptStore, MemoryAttemptStore};
