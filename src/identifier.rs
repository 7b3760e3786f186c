//! Tracking key construction.
//!
//! A [`TrackingId`] identifies the unit of blocking. The default strategy is
//! the base identity alone (typically the client network address). Scoping to
//! a `(base, account)` pair keeps one abused account from blocking all
//! traffic coming from a shared address, while still bounding abuse per pair.

use std::fmt;

/// Delimiter between the base identity and the optional account scope.
const SCOPE_DELIMITER: char = '|';

/// A stable key an [`AttemptRecord`](crate::record::AttemptRecord) is tracked
/// under.
///
/// The secondary key's content is not validated or sanitized here; callers
/// that persist composed identifiers in cleartext audit trails are
/// responsible for not leaking sensitive raw input through them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingId(String);

impl TrackingId {
    /// Track by the base identity alone, e.g. a client IP address.
    pub fn new(base: impl Into<String>) -> Self {
        Self(base.into())
    }

    /// Track by a `(base, account)` pair, e.g. an IP address and the
    /// submitted username.
    pub fn scoped(base: &str, account: &str) -> Self {
        Self(format!("{base}{SCOPE_DELIMITER}{account}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TrackingId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackingId {
    fn from(base: &str) -> Self {
        Self::new(base)
    }
}

impl From<String> for TrackingId {
    fn from(base: String) -> Self {
        Self::new(base)
    }
}
