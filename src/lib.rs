//! apicache - local, versioned proxy-cache for API responses
//!
//! Responses are keyed by a request template and a parameter mapping rather
//! than raw transport bytes, stored as append-only versions in a SQLite file,
//! and served back while fresh. On a miss the user-supplied [`Fetcher`] is
//! called; if it fails, the last stored version is returned flagged as
//! degraded.
//!
//! ```no_run
//! use apicache::{ApiCache, CacheConfig, FetchError, Params, Ttl};
//! use serde_json::{json, Value};
//!
//! # fn main() -> apicache::Result<()> {
//! let fetch = |template: &str, params: &Params| -> Result<Value, FetchError> {
//!     Ok(json!({"template": template, "params": params}))
//! };
//! let cache = ApiCache::new(fetch, CacheConfig::new().with_ttl(Ttl::from_secs(3600)))?;
//!
//! let response = cache.request("{BASE_URL}/users/{id}", &json!({"id": 42}))?;
//! println!("hit={} payload={}", response.hit, response.payload);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod cli;
pub mod error;
pub mod fetch;
pub mod key;
pub mod policy;
pub mod store;

pub use cache::{ApiCache, CacheConfig, CacheStats, CachedResponse};
pub use error::{CacheError, FetchError, KeyDerivationError, Result, StorageError};
pub use fetch::{Fetcher, HttpFetcher};
pub use key::{derive, Fingerprint, Params, RequestKey};
pub use policy::{is_fresh, is_fresh_at, PrunePolicy, Ttl};
pub use store::{EntrySummary, Store, StoreCounts, Version};
