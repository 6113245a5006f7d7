use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use super::{
    now_timestamp, schema, ArtifactStore, ComputationStats, EntryFilter, EntryInfo, RetryPolicy,
    StorageStats, StoreError,
};
use crate::cache::Fingerprint;

/// Connection settings for a store file
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// How long SQLite itself waits on a lock before reporting BUSY
    pub busy_timeout: Duration,
    /// What we do once SQLite gives up
    pub retry: RetryPolicy,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5_000),
            retry: RetryPolicy::default(),
        }
    }
}

/// Single-file SQLite store holding the output cache, the run log and the
/// receipt table
///
/// Every operation opens its own connection so nothing is held across the
/// (long) external engine run, and a store file can be swapped or copied
/// between invocations.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    path: PathBuf,
    options: StoreOptions,
}

impl SqliteStore {
    /// Open (creating if needed) the store at `path` and ensure its schema
    pub fn open<P: AsRef<Path>>(path: P, options: StoreOptions) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let store = Self { path, options };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Run a read-only closure against a fresh connection
    pub fn read<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&Connection) -> rusqlite::Result<T>,
    {
        self.options.retry.run(&self.path, || {
            let conn = self.connection()?;
            Ok(f(&conn)?)
        })
    }

    /// Run a closure inside an IMMEDIATE transaction
    ///
    /// The write lock is taken up front so two writers serialize instead of
    /// deadlocking on upgrade. The closure may run more than once when the
    /// store is contended; it must not have side effects outside `tx`.
    pub fn write<T, F>(&self, mut f: F) -> Result<T, StoreError>
    where
        F: FnMut(&Transaction<'_>) -> rusqlite::Result<T>,
    {
        self.options.retry.run(&self.path, || {
            let mut conn = self.connection()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let value = f(&tx)?;
            tx.commit()?;
            Ok(value)
        })
    }

    fn connection(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.options.busy_timeout)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Ok(conn)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let created = self.write(|tx| {
            for statement in schema::all() {
                tx.execute_batch(statement)?;
            }

            let exists: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM _metadata WHERE type = 'created')",
                [],
                |row| row.get(0),
            )?;

            if !exists {
                tx.execute(
                    "INSERT INTO _metadata (type, notes, value, timestamp) VALUES ('created', ?1, ?2, ?3)",
                    params!["store created", env!("CARGO_PKG_VERSION"), now_timestamp()],
                )?;
            }

            Ok(!exists)
        })?;

        if created {
            debug!(store = %self.path.display(), "initialized new store");
        }

        Ok(())
    }

    pub(crate) fn upsert(
        tx: &Transaction<'_>,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
        data: &[u8],
        cached_at: &str,
    ) -> rusqlite::Result<()> {
        tx.execute(
            "INSERT INTO output_cache (fingerprint, computation, artifact, content, size_bytes, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(fingerprint, computation, artifact) DO UPDATE SET
                content = excluded.content,
                size_bytes = excluded.size_bytes,
                cached_at = excluded.cached_at",
            params![
                fingerprint.as_str(),
                computation,
                artifact,
                data,
                data.len() as i64,
                cached_at
            ],
        )?;
        Ok(())
    }
}

/// WHERE clause and bound values for an entry filter
fn filter_clause(filter: &EntryFilter) -> (String, Vec<String>) {
    let mut conditions = Vec::new();
    let mut values = Vec::new();

    if let Some(fingerprint) = &filter.fingerprint {
        values.push(fingerprint.as_str().to_string());
        conditions.push(format!("fingerprint = ?{}", values.len()));
    }
    if let Some(computation) = &filter.computation {
        values.push(computation.clone());
        conditions.push(format!("computation = ?{}", values.len()));
    }

    if conditions.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", conditions.join(" AND ")), values)
    }
}

impl ArtifactStore for SqliteStore {
    fn get(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
    ) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT content FROM output_cache
                 WHERE fingerprint = ?1 AND computation = ?2 AND artifact = ?3",
                params![fingerprint.as_str(), computation, artifact],
                |row| row.get(0),
            )
            .optional()
        })
    }

    fn get_all(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
    ) -> Result<BTreeMap<String, Vec<u8>>, StoreError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT artifact, content FROM output_cache
                 WHERE fingerprint = ?1 AND computation = ?2",
            )?;
            let rows = stmt.query_map(params![fingerprint.as_str(), computation], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
            })?;
            rows.collect::<rusqlite::Result<BTreeMap<_, _>>>()
        })
    }

    fn put(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
        data: &[u8],
    ) -> Result<(), StoreError> {
        let cached_at = now_timestamp();
        self.write(|tx| Self::upsert(tx, fingerprint, computation, artifact, data, &cached_at))
    }

    fn put_many(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        items: &[(String, Vec<u8>)],
    ) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }

        let cached_at = now_timestamp();
        self.write(|tx| {
            for (artifact, data) in items {
                Self::upsert(tx, fingerprint, computation, artifact, data, &cached_at)?;
            }
            Ok(())
        })
    }

    fn exists(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        artifact: &str,
    ) -> Result<bool, StoreError> {
        self.read(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM output_cache
                 WHERE fingerprint = ?1 AND computation = ?2 AND artifact = ?3)",
                params![fingerprint.as_str(), computation, artifact],
                |row| row.get(0),
            )
        })
    }

    fn entries(&self, filter: &EntryFilter) -> Result<Vec<EntryInfo>, StoreError> {
        let (clause, values) = filter_clause(filter);
        let sql = format!(
            "SELECT fingerprint, computation, artifact, size_bytes, cached_at
             FROM output_cache{clause}
             ORDER BY fingerprint, computation, artifact"
        );

        self.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), |row| {
                Ok(EntryInfo {
                    fingerprint: row.get(0)?,
                    computation: row.get(1)?,
                    artifact: row.get(2)?,
                    size_bytes: row.get::<_, i64>(3)? as u64,
                    cached_at: row.get(4)?,
                })
            })?;
            rows.collect()
        })
    }

    fn delete(&self, filter: &EntryFilter) -> Result<u64, StoreError> {
        let (clause, values) = filter_clause(filter);
        let sql = format!("DELETE FROM output_cache{clause}");

        let removed = self.write(|tx| tx.execute(&sql, params_from_iter(values.iter())))?;
        Ok(removed as u64)
    }

    fn stats(&self) -> Result<StorageStats, StoreError> {
        let (totals, by_computation) = self.read(|conn| {
            let totals: (i64, i64, i64) = conn.query_row(
                "SELECT COUNT(*), COALESCE(SUM(size_bytes), 0), COUNT(DISTINCT fingerprint)
                 FROM output_cache",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT computation, COUNT(*), COALESCE(SUM(size_bytes), 0)
                 FROM output_cache GROUP BY computation ORDER BY computation",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ComputationStats {
                    computation: row.get(0)?,
                    entries: row.get::<_, i64>(1)? as u64,
                    bytes: row.get::<_, i64>(2)? as u64,
                })
            })?;
            let by_computation = rows.collect::<rusqlite::Result<Vec<_>>>()?;

            Ok((totals, by_computation))
        })?;

        Ok(StorageStats {
            total_entries: totals.0 as u64,
            total_bytes: totals.1 as u64,
            distinct_fingerprints: totals.2 as u64,
            by_computation,
            store_path: self.path.clone(),
        })
    }
}
