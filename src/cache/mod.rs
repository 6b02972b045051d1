//! Cache engine for API responses
//!
//! This module ties the pieces together: a request template and its
//! parameters are turned into a fingerprint, the newest stored version for
//! that fingerprint is served while it is fresh, and the fetcher is only
//! called on a miss or when the stored version has gone stale. Failed
//! refetches fall back to the last stored version, flagged as `degraded`,
//! so callers keep working when a backend is unavailable.

mod config;
mod inflight;
mod manager;
mod stats;

pub use config::{default_location, CacheConfig, DEFAULT_FILE_NAME};
pub use manager::{ApiCache, CachedResponse};
pub use stats::CacheStats;
