//! Cache construction options

use std::path::PathBuf;

use directories::ProjectDirs;

use crate::error::StorageError;
use crate::policy::Ttl;

/// File name of the store inside the platform cache directory
pub const DEFAULT_FILE_NAME: &str = "apicache.sqlite3";

/// Options recognised when building an [`ApiCache`](super::ApiCache)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Default freshness window for `request`
    pub ttl: Ttl,
    /// Store file; `None` means the platform cache directory
    pub location: Option<PathBuf>,
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: impl Into<Ttl>) -> Self {
        self.ttl = ttl.into();
        self
    }

    pub fn with_location(mut self, location: impl Into<PathBuf>) -> Self {
        self.location = Some(location.into());
        self
    }

    /// The store file this configuration points at
    pub fn resolve_location(&self) -> Result<PathBuf, StorageError> {
        match &self.location {
            Some(path) => Ok(path.clone()),
            None => default_location().ok_or(StorageError::NoDefaultLocation),
        }
    }
}

/// Default store file (`~/.cache/apicache/apicache.sqlite3` on Linux)
///
/// Returns `None` if the cache directory cannot be determined (e.g., no home directory).
pub fn default_location() -> Option<PathBuf> {
    ProjectDirs::from("", "", "apicache").map(|dirs| dirs.cache_dir().join(DEFAULT_FILE_NAME))
}
