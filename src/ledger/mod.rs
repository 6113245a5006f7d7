//! Provenance ledger
//!
//! Two append-only records live next to the cache in the store file:
//! `run_log` gets exactly one row per attempt that reaches
//! [`Ledger::complete_run`], and `_metadata` holds receipts (see
//! [`receipt`]).

pub mod receipt;

pub use receipt::{Receipt, ReceiptKind};

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

use crate::cache::Fingerprint;
use crate::logging::{operations, status};
use crate::storage::{now_timestamp, SqliteStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => status::SUCCESS,
            Self::Failed => status::FAILED,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

impl ToSql for RunStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for RunStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

/// An attempt that has started but not yet been recorded
///
/// The run id exists from the moment work begins; nothing is written until
/// [`Ledger::complete_run`] consumes the handle.
#[derive(Debug, Clone)]
pub struct RunHandle {
    run_id: String,
    fingerprint: Fingerprint,
    computation: String,
    input_path: PathBuf,
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn computation(&self) -> &str {
        &self.computation
    }
}

/// One `run_log` row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    pub id: i64,
    pub run_id: String,
    pub fingerprint: String,
    pub computation: String,
    pub input_path: String,
    pub row_count: u64,
    pub rules_completed: u64,
    pub status: RunStatus,
    pub timestamp: String,
}

impl RunRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            fingerprint: row.get(2)?,
            computation: row.get(3)?,
            input_path: row.get(4)?,
            row_count: row.get::<_, i64>(5)? as u64,
            rules_completed: row.get::<_, i64>(6)? as u64,
            status: row.get(7)?,
            timestamp: row.get(8)?,
        })
    }
}

const RUN_COLUMNS: &str =
    "id, run_id, fingerprint, computation, input_path, row_count, rules_completed, status, timestamp";

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub fingerprint: Option<Fingerprint>,
    /// Matches rows whose comma-separated computation list contains this name
    pub computation: Option<String>,
    pub status: Option<RunStatus>,
    pub limit: Option<usize>,
}

/// Ledger view over a store
pub struct Ledger<'a> {
    store: &'a SqliteStore,
}

impl<'a> Ledger<'a> {
    pub fn new(store: &'a SqliteStore) -> Self {
        Self { store }
    }

    /// Mint a run id for an attempt; writes nothing
    pub fn begin_run(
        &self,
        fingerprint: &Fingerprint,
        computation: &str,
        input_path: &Path,
    ) -> RunHandle {
        RunHandle {
            run_id: Uuid::new_v4().to_string(),
            fingerprint: fingerprint.clone(),
            computation: computation.to_string(),
            input_path: input_path.to_path_buf(),
        }
    }

    /// Append the terminal row for an attempt
    pub fn complete_run(
        &self,
        handle: RunHandle,
        run_status: RunStatus,
        row_count: u64,
        rules_completed: u64,
    ) -> Result<RunRecord, StoreError> {
        let timestamp = now_timestamp();
        let input_path = handle.input_path.to_string_lossy().into_owned();

        let id = self.store.write(|tx| {
            tx.execute(
                "INSERT INTO run_log
                    (run_id, fingerprint, computation, input_path, row_count, rules_completed, status, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    handle.run_id,
                    handle.fingerprint.as_str(),
                    handle.computation,
                    input_path,
                    row_count as i64,
                    rules_completed as i64,
                    run_status,
                    timestamp
                ],
            )?;
            Ok(tx.last_insert_rowid())
        })?;

        info!(
            operation = operations::LEDGER,
            status = run_status.as_str(),
            run_id = %handle.run_id,
            computation = %handle.computation,
            fingerprint = %handle.fingerprint,
            row_count,
            rules_completed,
            "run recorded"
        );

        Ok(RunRecord {
            id,
            run_id: handle.run_id,
            fingerprint: handle.fingerprint.into(),
            computation: handle.computation,
            input_path,
            row_count,
            rules_completed,
            status: run_status,
            timestamp,
        })
    }

    /// Runs matching `filter`, newest first
    pub fn runs(&self, filter: &RunFilter) -> Result<Vec<RunRecord>, StoreError> {
        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();

        if let Some(fingerprint) = &filter.fingerprint {
            values.push(fingerprint.as_str().to_string());
            conditions.push(format!("fingerprint = ?{}", values.len()));
        }
        if let Some(computation) = &filter.computation {
            values.push(computation.clone());
            conditions.push(format!(
                "instr(',' || computation || ',', ',' || ?{} || ',') > 0",
                values.len()
            ));
        }
        if let Some(run_status) = filter.status {
            values.push(run_status.as_str().to_string());
            conditions.push(format!("status = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {RUN_COLUMNS} FROM run_log");
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        sql.push_str(" ORDER BY id DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        self.store.read(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(values.iter()), RunRecord::from_row)?;
            rows.collect()
        })
    }

    pub fn run(&self, run_id: &str) -> Result<Option<RunRecord>, StoreError> {
        let sql = format!("SELECT {RUN_COLUMNS} FROM run_log WHERE run_id = ?1");
        self.store.read(|conn| {
            conn.query_row(&sql, params![run_id], RunRecord::from_row)
                .optional()
        })
    }

    pub fn checksum_history(&self, computation: &str) -> Result<Vec<Receipt>, StoreError> {
        self.store
            .read(|conn| receipt::checksum_history(conn, computation))
    }

    pub fn record_checksum(&self, computation: &str, checksum: &Fingerprint) -> Result<(), StoreError> {
        self.store
            .write(|tx| receipt::record_checksum(tx, computation, checksum.as_str()))
    }

    pub fn receipts(&self, kind: Option<&ReceiptKind>) -> Result<Vec<Receipt>, StoreError> {
        self.store.read(|conn| receipt::entries(conn, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOptions;
    use tempfile::TempDir;

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(temp.path().join("margie.db"), StoreOptions::default()).unwrap();
        (temp, store)
    }

    #[test]
    fn test_begin_run_writes_nothing() {
        let (_temp, store) = setup();
        let ledger = Ledger::new(&store);
        let fp = Fingerprint::of_bytes(b"input");

        let a = ledger.begin_run(&fp, "prodigal", Path::new("sample1.fasta"));
        let b = ledger.begin_run(&fp, "prodigal", Path::new("sample1.fasta"));

        assert_ne!(a.run_id(), b.run_id());
        assert!(ledger.runs(&RunFilter::default()).unwrap().is_empty());
    }

    #[test]
    fn test_complete_run_appends_one_row() {
        let (_temp, store) = setup();
        let ledger = Ledger::new(&store);
        let fp = Fingerprint::of_bytes(b"input");

        let handle = ledger.begin_run(&fp, "prodigal", Path::new("sample1.fasta"));
        let run_id = handle.run_id().to_string();
        let record = ledger.complete_run(handle, RunStatus::Failed, 0, 2).unwrap();

        assert_eq!(record.status, RunStatus::Failed);
        assert_eq!(record.rules_completed, 2);

        let stored = ledger.run(&run_id).unwrap().unwrap();
        assert_eq!(stored, record);
        assert_eq!(stored.input_path, "sample1.fasta");
    }

    #[test]
    fn test_runs_filters_and_orders_newest_first() {
        let (_temp, store) = setup();
        let ledger = Ledger::new(&store);
        let a = Fingerprint::of_bytes(b"a");
        let b = Fingerprint::of_bytes(b"b");

        for (fp, computation, run_status) in [
            (&a, "prodigal", RunStatus::Success),
            (&a, "prodigal,cog", RunStatus::Failed),
            (&b, "pfam", RunStatus::Success),
        ] {
            let handle = ledger.begin_run(fp, computation, Path::new("in.fasta"));
            ledger.complete_run(handle, run_status, 0, 1).unwrap();
        }

        let all = ledger.runs(&RunFilter::default()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].computation, "pfam");

        let for_a = ledger
            .runs(&RunFilter {
                fingerprint: Some(a.clone()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(for_a.len(), 2);

        let cog = ledger
            .runs(&RunFilter {
                computation: Some("cog".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cog.len(), 1);
        assert_eq!(cog[0].computation, "prodigal,cog");

        let prodigal = ledger
            .runs(&RunFilter {
                computation: Some("prodigal".to_string()),
                status: Some(RunStatus::Success),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(prodigal.len(), 1);

        let limited = ledger
            .runs(&RunFilter {
                limit: Some(1),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn test_computation_filter_matches_names_literally() {
        let (_temp, store) = setup();
        let ledger = Ledger::new(&store);
        let fp = Fingerprint::of_bytes(b"input");

        for computation in ["myXtool", "my_tool,pfam", "100%"] {
            let handle = ledger.begin_run(&fp, computation, Path::new("in.fasta"));
            ledger.complete_run(handle, RunStatus::Success, 0, 1).unwrap();
        }

        let matching = |name: &str| -> Vec<String> {
            ledger
                .runs(&RunFilter {
                    computation: Some(name.to_string()),
                    ..Default::default()
                })
                .unwrap()
                .into_iter()
                .map(|r| r.computation)
                .collect()
        };

        assert_eq!(matching("my_tool"), vec!["my_tool,pfam"]);
        assert_eq!(matching("100%"), vec!["100%"]);
        assert!(matching("%").is_empty());
        assert!(matching("my").is_empty());
    }

    #[test]
    fn test_unknown_run_id() {
        let (_temp, store) = setup();
        assert!(Ledger::new(&store).run("nope").unwrap().is_none());
    }
}
