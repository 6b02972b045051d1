//! Freshness and retention policy
//!
//! Freshness is a half-open window: a version is fresh while its age is
//! strictly less than the TTL. A version exactly at the boundary is stale.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::store::Version;

/// Maximum age at which a stored version may be served without refetching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Ttl {
    /// Stored versions never expire
    #[default]
    Infinite,
    /// Versions are fresh while younger than this duration
    Within(Duration),
}

impl Ttl {
    /// Creates a TTL from seconds; zero is the "never expire" sentinel
    pub fn from_secs(secs: u64) -> Self {
        Duration::from_secs(secs).into()
    }

    pub fn is_infinite(&self) -> bool {
        matches!(self, Ttl::Infinite)
    }
}

impl From<Duration> for Ttl {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Ttl::Infinite
        } else {
            Ttl::Within(duration)
        }
    }
}

impl From<Option<Duration>> for Ttl {
    fn from(duration: Option<Duration>) -> Self {
        duration.map(Ttl::from).unwrap_or(Ttl::Infinite)
    }
}

/// Checks whether a version is fresh right now
pub fn is_fresh(version: &Version, ttl: Ttl) -> bool {
    is_fresh_at(version, ttl, Utc::now())
}

/// Checks whether a version is fresh at the given instant
pub fn is_fresh_at(version: &Version, ttl: Ttl, now: DateTime<Utc>) -> bool {
    match ttl {
        Ttl::Infinite => true,
        Ttl::Within(ttl) => match now.signed_duration_since(version.created_at).to_std() {
            Ok(age) => age < ttl,
            // created_at lies in the future (clock skew between writers)
            Err(_) => true,
        },
    }
}

/// Which superseded versions a prune removes
///
/// The newest version of every entry always survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrunePolicy {
    /// Keep only the newest N versions per fingerprint (N is at least 1)
    KeepLatest(usize),
    /// Remove superseded versions created longer ago than this
    OlderThan(Duration),
}

impl Default for PrunePolicy {
    fn default() -> Self {
        PrunePolicy::KeepLatest(1)
    }
}
