pub mod retry;
pub mod schema;
pub mod sqlite;

pub use retry::RetryPolicy;
pub use sqlite::{SqliteStore, StoreOptions};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::cache::Fingerprint;

/// Default store file, relative to the working directory
pub const DEFAULT_STORE_FILE: &str = "margie.db";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store {} is locked; gave up after {attempts} attempt(s): {source}", path.display())]
    Unavailable {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: rusqlite::Error,
    },

    #[error("Store {} is corrupt or not a database: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid value in store: {0}")]
    Invalid(String),
}

/// Storage backend for cached artifacts, keyed by
/// `(fingerprint, computation, artifact)`
pub trait ArtifactStore: Send + Sync {
    /// Retrieve one artifact
    fn get(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
    ) -> Result<Option<Vec<u8>>, StoreError>;

    /// Retrieve every artifact cached for a computation, keyed by artifact name
    fn get_all(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError>;

    /// Store one artifact, replacing any previous payload for the key
    fn put(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
        data: &[u8],
    ) -> Result<(), StoreError>;

    /// Store several artifacts of one computation atomically
    fn put_many(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        items: &[(String, Vec<u8>)],
    ) -> Result<(), StoreError>;

    /// Check whether an artifact is cached
    fn exists(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
    ) -> Result<bool, StoreError>;

    /// List entry metadata (no payloads)
    fn entries(&self, filter: &EntryFilter) -> Result<Vec<EntryInfo>, StoreError>;

    /// Delete entries matching the filter; returns the number removed
    fn delete(&self, filter: &EntryFilter) -> Result<u64, StoreError>;

    /// Aggregate statistics
    fn stats(&self) -> Result<StorageStats, StoreError>;
}

/// Selects cache entries; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub fingerprint: Option<Fingerprint>,
    pub computation: Option<String>,
}

impl EntryFilter {
    pub fn is_empty(&self) -> bool {
        self.fingerprint.is_none() && self.computation.is_none()
    }
}

/// Metadata of one cached artifact
#[derive(Debug, Clone, Serialize)]
pub struct EntryInfo {
    pub fingerprint: String,
    pub computation: String,
    pub artifact: String,
    pub size_bytes: u64,
    pub cached_at: String,
}

/// Per-computation totals
#[derive(Debug, Clone, Serialize)]
pub struct ComputationStats {
    pub computation: String,
    pub entries: u64,
    pub bytes: u64,
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub total_entries: u64,
    pub total_bytes: u64,
    pub distinct_fingerprints: u64,
    pub by_computation: Vec<ComputationStats>,
    pub store_path: PathBuf,
}

/// Current time as ISO-8601 UTC, the format of every timestamp column
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
