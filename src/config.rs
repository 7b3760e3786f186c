//! Policy configuration for attempt tracking and backoff.
//!
//! A [`PolicyConfig`] is immutable for the lifetime of a protection instance.
//! All fields have documented defaults and the struct deserializes with
//! `#[serde(default)]`, so partial configuration (e.g. from an application
//! config file) overlays onto the defaults per field. Durations are
//! serialized as integer milliseconds.
//!
//! Two named presets are provided: [`PolicyConfig::standard`] for general
//! authentication endpoints and [`PolicyConfig::strict`] for sensitive ones
//! (administrative actions, credential resets). Both run on the same engine;
//! only the numbers differ.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Tunable parameters for the protection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Failed attempts allowed before an identifier is blocked.
    pub max_attempts: u32,

    /// Duration of the first block.
    #[serde(with = "duration_ms")]
    pub initial_block: Duration,

    /// Growth factor applied to the block duration on repeated offenses.
    pub backoff_multiplier: f64,

    /// Upper bound on any single block duration.
    #[serde(with = "duration_ms")]
    pub max_block: Duration,

    /// Inactivity window after which a non-blocked failure streak is
    /// discarded.
    #[serde(with = "duration_ms")]
    pub reset_after: Duration,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyConfig {
    /// Profile for general authentication endpoints: 5 attempts, 1 minute
    /// initial block, x2 backoff, 1 hour cap, 15 minute inactivity reset.
    pub fn standard() -> Self {
        Self {
            max_attempts: 5,
            initial_block: Duration::minutes(1),
            backoff_multiplier: 2.0,
            max_block: Duration::hours(1),
            reset_after: Duration::minutes(15),
        }
    }

    /// Profile for sensitive endpoints: 3 attempts, 5 minute initial block,
    /// x3 backoff, 24 hour cap, 30 minute inactivity reset.
    pub fn strict() -> Self {
        Self {
            max_attempts: 3,
            initial_block: Duration::minutes(5),
            backoff_multiplier: 3.0,
            max_block: Duration::hours(24),
            reset_after: Duration::minutes(30),
        }
    }

    /// Validate the configuration.
    ///
    /// Called by the service constructor so that invalid parameters are
    /// rejected up front instead of surfacing mid-request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::MaxAttemptsZero);
        }
        if self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::MultiplierTooSmall(self.backoff_multiplier));
        }
        if self.initial_block <= Duration::zero() {
            return Err(ConfigError::NonPositiveDuration {
                field: "initial_block",
            });
        }
        if self.max_block <= Duration::zero() {
            return Err(ConfigError::NonPositiveDuration { field: "max_block" });
        }
        if self.reset_after <= Duration::zero() {
            return Err(ConfigError::NonPositiveDuration {
                field: "reset_after",
            });
        }
        if self.max_block < self.initial_block {
            return Err(ConfigError::CapBelowInitial);
        }
        Ok(())
    }
}

/// Serde adapter storing a [`chrono::Duration`] as integer milliseconds.
mod duration_ms {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = i64::deserialize(deserializer)?;
        Ok(Duration::milliseconds(ms))
    }
}
