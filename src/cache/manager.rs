//! Cache engine tying fingerprints, the entry store and the fetcher together
//!
//! Provides an `ApiCache` that answers requests from stored versions while
//! they are fresh, calls the fetcher on a miss or when the newest version is
//! stale, and falls back to the last stored version if that fetch fails.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::config::CacheConfig;
use super::inflight::InflightFetches;
use super::stats::{AtomicStats, CacheStats};
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::key::RequestKey;
use crate::policy::{self, PrunePolicy, Ttl};
use crate::store::{EntrySummary, Store, Version};

/// Result of a `request`, including where the payload came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedResponse {
    /// The payload
    pub payload: Value,
    /// Served from a fresh stored version without calling the fetcher
    pub hit: bool,
    /// Served from a stale version because the fetcher failed
    pub degraded: bool,
    /// When the served version was stored
    pub cached_at: DateTime<Utc>,
    /// Sequence number of the served version
    pub sequence: u64,
}

impl CachedResponse {
    fn from_version(version: Version, hit: bool, degraded: bool) -> Self {
        Self {
            payload: version.payload,
            hit,
            degraded,
            cached_at: version.created_at,
            sequence: version.sequence,
        }
    }
}

/// Persistent, versioned cache in front of a fetch callback
///
/// `ApiCache` is `Send + Sync`; share it between threads behind an `Arc`.
pub struct ApiCache {
    store: Store,
    fetcher: Box<dyn Fetcher + Send + Sync>,
    ttl: Ttl,
    stats: AtomicStats,
    inflight: InflightFetches,
}

impl ApiCache {
    /// Opens the configured store (creating it if absent) and wraps `fetcher`
    pub fn new<F>(fetcher: F, config: CacheConfig) -> Result<Self>
    where
        F: Fetcher + Send + Sync + 'static,
    {
        let location = config.resolve_location()?;
        let store = Store::open(&location)?;
        info!("Using cache store at {}", location.display());
        Ok(Self::with_store(fetcher, store, config.ttl))
    }

    /// Wraps an already opened store
    pub fn with_store<F>(fetcher: F, store: Store, ttl: Ttl) -> Self
    where
        F: Fetcher + Send + Sync + 'static,
    {
        Self {
            store,
            fetcher: Box::new(fetcher),
            ttl,
            stats: AtomicStats::default(),
            inflight: InflightFetches::default(),
        }
    }

    /// Default freshness window
    pub fn ttl(&self) -> Ttl {
        self.ttl
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Looks up a request, fetching and storing a new version on miss or staleness
    pub fn request<P>(&self, template: &str, params: &P) -> Result<CachedResponse>
    where
        P: Serialize + ?Sized,
    {
        self.request_with_ttl(template, params, self.ttl)
    }

    /// Like [`request`](Self::request) with a freshness window for this call only
    ///
    /// # Behavior
    /// - Returns the newest stored version if it is fresh under `ttl`
    /// - Otherwise calls the fetcher and appends the result as a new version
    /// - If the fetcher fails and any version is stored, returns it with `degraded = true`
    /// - If the fetcher fails and nothing is stored, returns the fetch error
    pub fn request_with_ttl<P>(&self, template: &str, params: &P, ttl: Ttl) -> Result<CachedResponse>
    where
        P: Serialize + ?Sized,
    {
        let key = RequestKey::new(template, params)?;
        let fingerprint = key.fingerprint();

        if let Some(version) = self.fresh_version(&key, ttl)? {
            return Ok(self.record_hit(version));
        }

        let _claim = self.inflight.acquire(fingerprint);
        // Another caller may have stored a version while we waited
        let latest = self.store.latest(fingerprint)?;
        if let Some(version) = latest.as_ref().filter(|v| policy::is_fresh(v, ttl)) {
            return Ok(self.record_hit(version.clone()));
        }

        AtomicStats::incr(&self.stats.misses);
        match self.fetcher.fetch(key.template(), key.params()) {
            Ok(payload) => {
                let version = self.store.put(&key, &payload)?;
                AtomicStats::incr(&self.stats.writes);
                info!(
                    "Fetched {} (version {} of {})",
                    key.template(),
                    version.sequence,
                    fingerprint
                );
                Ok(CachedResponse::from_version(version, false, false))
            }
            Err(err) => {
                AtomicStats::incr(&self.stats.fetch_errors);
                match latest {
                    Some(stale) => {
                        AtomicStats::incr(&self.stats.degraded);
                        warn!(
                            "Fetch failed for {}, serving stale version {} from {}: {}",
                            key.template(),
                            stale.sequence,
                            stale.created_at,
                            err
                        );
                        Ok(CachedResponse::from_version(stale, false, true))
                    }
                    None => {
                        warn!("Fetch failed for {}: {}", key.template(), err);
                        Err(err.into())
                    }
                }
            }
        }
    }

    /// Returns the newest stored payload without fetching or checking freshness
    pub fn read<P>(&self, template: &str, params: &P) -> Result<Option<Value>>
    where
        P: Serialize + ?Sized,
    {
        let key = RequestKey::new(template, params)?;
        Ok(self.store.latest(key.fingerprint())?.map(|v| v.payload))
    }

    /// Stores `payload` as a new version without calling the fetcher
    pub fn write<P>(&self, template: &str, params: &P, payload: Value) -> Result<Version>
    where
        P: Serialize + ?Sized,
    {
        let key = RequestKey::new(template, params)?;
        let version = self.store.put(&key, &payload)?;
        AtomicStats::incr(&self.stats.writes);
        debug!("Wrote version {} for {}", version.sequence, key.template());
        Ok(version)
    }

    /// Checks whether any version is stored for the request
    pub fn has<P>(&self, template: &str, params: &P) -> Result<bool>
    where
        P: Serialize + ?Sized,
    {
        let key = RequestKey::new(template, params)?;
        Ok(self.store.exists(key.fingerprint())?)
    }

    /// Every stored version for the request, oldest first
    pub fn history<P>(&self, template: &str, params: &P) -> Result<Vec<Version>>
    where
        P: Serialize + ?Sized,
    {
        let key = RequestKey::new(template, params)?;
        Ok(self.store.versions(key.fingerprint())?)
    }

    /// Lists stored entries
    pub fn entries(&self) -> Result<Vec<EntrySummary>> {
        Ok(self.store.entries()?)
    }

    /// Removes every entry whose template starts with `prefix`
    pub fn clear_for_url(&self, prefix: &str) -> Result<usize> {
        let removed = self.store.delete_by_prefix(prefix)?;
        info!("Cleared {} entries with prefix {:?}", removed, prefix);
        Ok(removed)
    }

    /// Keeps only the newest `retain` versions of each entry
    pub fn prune_old_versions(&self, retain: usize) -> Result<usize> {
        self.prune(PrunePolicy::KeepLatest(retain))
    }

    /// Removes superseded versions according to `policy`
    pub fn prune(&self, policy: PrunePolicy) -> Result<usize> {
        let removed = self.store.prune(policy)?;
        info!("Pruned {} superseded versions", removed);
        Ok(removed)
    }

    /// Counters since this cache was created plus current store totals
    pub fn stats(&self) -> Result<CacheStats> {
        let counts = self.store.counts()?;
        Ok(CacheStats {
            total_entries: counts.entries,
            total_versions: counts.versions,
            ..self.stats.snapshot()
        })
    }

    fn fresh_version(&self, key: &RequestKey, ttl: Ttl) -> Result<Option<Version>> {
        let latest = self.store.latest(key.fingerprint())?;
        Ok(latest.filter(|v| policy::is_fresh(v, ttl)))
    }

    fn record_hit(&self, version: Version) -> CachedResponse {
        AtomicStats::incr(&self.stats.hits);
        debug!(
            "Cache hit for {} (version {})",
            version.fingerprint, version.sequence
        );
        CachedResponse::from_version(version, true, false)
    }
}

impl std::fmt::Debug for ApiCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCache")
            .field("store", &self.store)
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
