//! Serve-cached vs recompute decisions
//!
//! The state of a `(subject, computation)` pair is derived from the latest
//! `checksum` receipt for that computation:
//!
//! | latest receipt      | state  |
//! |---------------------|--------|
//! | none                | Absent |
//! | equal to checksum   | Cached |
//! | different checksum  | Stale  |
//!
//! Receipts are appended on every transition into Cached and never removed,
//! so the full checksum history of a subject stays queryable.

use std::fmt;
use tracing::{debug, info};

use super::Fingerprint;
use crate::ledger::receipt;
use crate::logging::status;
use crate::storage::{now_timestamp, ArtifactStore, SqliteStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheState {
    Absent,
    Cached,
    Stale { previous: String },
}

impl CacheState {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached)
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Absent => f.write_str("absent"),
            Self::Cached => f.write_str("cached"),
            Self::Stale { previous } => write!(f, "stale (was {previous})"),
        }
    }
}

/// Result of [`InvalidationPolicy::memoize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memoized {
    pub value: Vec<u8>,
    /// State observed before the call
    pub state: CacheState,
    /// Whether the closure ran
    pub computed: bool,
}

pub struct InvalidationPolicy<'a> {
    store: &'a SqliteStore,
}

impl<'a> InvalidationPolicy<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    pub fn evaluate(&self, computation: &str, checksum: &Fingerprint) -> Result<CacheState, StoreError> {
        let latest = self
            .store
            .read(|conn| receipt::latest_checksum(conn, computation))?;

        let state = match latest {
            None => CacheState::Absent,
            Some(previous) if previous == checksum.as_str() => CacheState::Cached,
            Some(previous) => CacheState::Stale { previous },
        };

        if let CacheState::Stale { previous } = &state {
            info!(
                status = status::STALE,
                computation,
                previous = %previous,
                current = %checksum,
                "checksum changed, cached result is stale"
            );
        }

        Ok(state)
    }

    /// Run `compute` unless a result for `checksum` is already cached
    ///
    /// A computed result is stored under `(checksum, computation, artifact)`
    /// together with a new `checksum` receipt in the same transaction.
    pub fn memoize<F, E>(
        &self,
        computation: &str,
        artifact: &str,
        checksum: &Fingerprint,
        compute: F,
    ) -> Result<Memoized, E>
    where
        F: FnOnce() -> Result<Vec<u8>, E>,
        E: From<StoreError>,
    {
        let state = self.evaluate(computation, checksum)?;

        if state.is_cached() {
            if let Some(value) = self.store.get(checksum, computation, artifact)? {
                debug!(computation, artifact, "serving memoized result");
                return Ok(Memoized {
                    value,
                    state,
                    computed: false,
                });
            }
            // Receipt without payload: the entry was cleaned by hand
        }

        let value = compute()?;
        let append_receipt = !state.is_cached();
        let cached_at = now_timestamp();

        self.store.write(|tx| {
            SqliteStore::upsert(tx, checksum, computation, artifact, &value, &cached_at)?;
            if append_receipt {
                receipt::record_checksum(tx, computation, checksum.as_str())?;
            }
            Ok(())
        })?;

        Ok(Memoized {
            value,
            state,
            computed: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOptions;
    use std::cell::Cell;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(temp.path().join("subject.db"), StoreOptions::default()).unwrap();
        (temp, store)
    }

    #[test]
    fn test_absent_cached_stale_cycle() {
        let (_temp, store) = setup();
        let policy = InvalidationPolicy::new(&store);
        let v1 = Fingerprint::of_bytes(b"v1");
        let v2 = Fingerprint::of_bytes(b"v2");
        let calls = Cell::new(0);
        let compute = |out: &'static [u8]| {
            calls.set(calls.get() + 1);
            Ok::<_, StoreError>(out.to_vec())
        };

        let first = policy.memoize("summary", "json", &v1, || compute(b"one")).unwrap();
        assert_eq!(first.state, CacheState::Absent);
        assert!(first.computed);

        let second = policy.memoize("summary", "json", &v1, || compute(b"unused")).unwrap();
        assert_eq!(second.state, CacheState::Cached);
        assert!(!second.computed);
        assert_eq!(second.value, b"one");

        let third = policy.memoize("summary", "json", &v2, || compute(b"two")).unwrap();
        assert_eq!(
            third.state,
            CacheState::Stale {
                previous: v1.as_str().to_string()
            }
        );
        assert_eq!(third.value, b"two");
        assert_eq!(calls.get(), 2);

        assert_eq!(policy.evaluate("summary", &v2).unwrap(), CacheState::Cached);
        let history = store
            .read(|conn| receipt::checksum_history(conn, "summary"))
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].value.as_deref(), Some(v1.as_str()));
    }

    #[test]
    fn test_cached_receipt_without_payload_recomputes_without_new_receipt() {
        let (_temp, store) = setup();
        let policy = InvalidationPolicy::new(&store);
        let fp = Fingerprint::of_bytes(b"v1");

        policy
            .memoize("summary", "json", &fp, || Ok::<_, StoreError>(b"one".to_vec()))
            .unwrap();
        store.delete(&Default::default()).unwrap();

        let again = policy
            .memoize("summary", "json", &fp, || Ok::<_, StoreError>(b"one again".to_vec()))
            .unwrap();
        assert!(again.computed);
        assert_eq!(store.get(&fp, "summary", "json").unwrap(), Some(b"one again".to_vec()));

        let history = store
            .read(|conn| receipt::checksum_history(conn, "summary"))
            .unwrap();
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_failed_compute_writes_nothing() {
        let (_temp, store) = setup();
        let policy = InvalidationPolicy::new(&store);
        let fp = Fingerprint::of_bytes(b"v1");

        let result = policy.memoize("summary", "json", &fp, || {
            Err(StoreError::Invalid("tool crashed".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(policy.evaluate("summary", &fp).unwrap(), CacheState::Absent);
    }
}
