use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Configuration errors, reported at construction time rather than per call.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("max_attempts must be at least 1")]
    MaxAttemptsZero,

    #[error("backoff_multiplier must be greater than 1.0, got {0}")]
    MultiplierTooSmall(f64),

    #[error("{field} must be a positive duration")]
    NonPositiveDuration { field: &'static str },

    #[error("max_block must not be shorter than initial_block")]
    CapBelowInitial,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Event handler error: {0}")]
    Handler(String),
}
