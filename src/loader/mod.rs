//! Record loader: annotation output into the subject store
//!
//! Loading is memoized like any other computation. The GFF file's own
//! fingerprint is the checksum, scoped to `load:<source>`, so loading the
//! same file twice inserts nothing the second time, and loading a changed
//! file replaces that source's rows.

pub mod gff;

use rusqlite::params;
use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info};

use crate::cache::{CacheState, Fingerprint, FingerprintError, InvalidationPolicy};
use crate::ledger::{receipt, Ledger, RunHandle, RunRecord, RunStatus};
use crate::logging::{operations, status};
use crate::storage::{SqliteStore, StoreError};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Fingerprint(#[from] FingerprintError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write token file {}: {source}", path.display())]
    Token {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub source: String,
    pub state: CacheState,
    pub rows_loaded: u64,
    pub skipped_lines: usize,
    pub run: RunRecord,
}

/// Ledger computation name for loads of `source`
pub fn load_computation(source: &str) -> String {
    format!("load:{source}")
}

const INSERT_ANNOTATION: &str = "
INSERT INTO annotations
    (seqid, source, type, start, end, score, strand, phase, attributes,
     gene_id, partial, start_type, rbs_motif, gc_content, confidence)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

/// Load `gff_path` as annotations from `source`
///
/// `token`, when given, is written after a successful load (or skip) so a
/// workflow rule has a file to depend on.
pub fn load_gff(
    store: &SqliteStore,
    gff_path: &Path,
    source: &str,
    token: Option<&Path>,
) -> Result<LoadReport, LoadError> {
    let fingerprint = Fingerprint::of_file(gff_path)?;
    let computation = load_computation(source);
    let ledger = Ledger::new(store);
    let handle = ledger.begin_run(&fingerprint, &computation, gff_path);

    let (state, rows_loaded, skipped_lines) =
        match load_if_needed(store, gff_path, source, &fingerprint, &handle) {
            Ok(result) => result,
            Err(e) => {
                let run_id = handle.run_id().to_string();
                if let Err(record_err) = ledger.complete_run(handle, RunStatus::Failed, 0, 0) {
                    error!(run_id = %run_id, error = %record_err, "could not record failed load");
                }
                return Err(e);
            }
        };

    let run = ledger.complete_run(handle, RunStatus::Success, rows_loaded, 0)?;

    if let Some(token) = token {
        write_token(token, rows_loaded, source)?;
    }

    Ok(LoadReport {
        source: source.to_string(),
        state,
        rows_loaded,
        skipped_lines,
        run,
    })
}

fn load_if_needed(
    store: &SqliteStore,
    gff_path: &Path,
    source: &str,
    fingerprint: &Fingerprint,
    handle: &RunHandle,
) -> Result<(CacheState, u64, usize), LoadError> {
    let computation = handle.computation();
    let state = InvalidationPolicy::new(store).evaluate(computation, fingerprint)?;

    if state.is_cached() {
        info!(
            operation = operations::LOAD,
            status = status::HIT,
            source,
            fingerprint = %fingerprint,
            "annotations already loaded, skipping"
        );
        return Ok((state, 0, 0));
    }

    let file = File::open(gff_path).map_err(|e| LoadError::Read {
        path: gff_path.to_path_buf(),
        source: e,
    })?;
    let parsed = gff::parse(BufReader::new(file)).map_err(|e| LoadError::Read {
        path: gff_path.to_path_buf(),
        source: e,
    })?;

    let notes = format!(
        "loaded {} rows from {} into annotations under checksum {}",
        parsed.records.len(),
        source,
        fingerprint
    );

    let replaced = store.write(|tx| {
        let replaced = tx.execute("DELETE FROM annotations WHERE source = ?1", params![source])?;

        let mut insert = tx.prepare_cached(INSERT_ANNOTATION)?;
        for record in &parsed.records {
            insert.execute(params![
                record.seqid,
                source,
                record.feature_type,
                record.start,
                record.end,
                record.score,
                record.strand,
                record.phase,
                record.attributes,
                record.gene_id,
                record.partial,
                record.start_type,
                record.rbs_motif,
                record.gc_content,
                record.confidence
            ])?;
        }

        receipt::record_checksum(tx, computation, fingerprint.as_str())?;
        receipt::record_activity(tx, &notes, handle.run_id())?;
        Ok(replaced)
    })?;

    info!(
        operation = operations::LOAD,
        status = status::SUCCESS,
        source,
        rows = parsed.records.len(),
        replaced,
        skipped_lines = parsed.skipped,
        "loaded annotations"
    );

    Ok((state, parsed.records.len() as u64, parsed.skipped))
}

fn write_token(path: &Path, rows: u64, source: &str) -> Result<(), LoadError> {
    let token_err = |e| LoadError::Token {
        path: path.to_path_buf(),
        source: e,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(token_err)?;
    }
    fs::write(path, format!("{rows} rows loaded from {source}\n")).map_err(token_err)
}

/// Number of annotation rows currently stored for `source`
pub fn annotation_count(store: &SqliteStore, source: &str) -> Result<u64, StoreError> {
    store.read(|conn| {
        conn.query_row(
            "SELECT COUNT(*) FROM annotations WHERE source = ?1",
            params![source],
            |row| row.get::<_, i64>(0),
        )
    })
    .map(|n| n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StoreOptions;
    use tempfile::TempDir;

    const GFF: &str = "##gff-version 3\n\
contig_1\tProdigal_v2.6.3\tCDS\t3\t1136\t150.2\t+\t0\tID=1_1;partial=10;start_type=ATG;gc_cont=0.421;conf=99.99;\n\
contig_1\tProdigal_v2.6.3\tCDS\t1200\t1900\t88.0\t-\t0\tID=1_2;partial=00;start_type=GTG;gc_cont=0.398;conf=97.10;\n\
garbage line\n";

    fn setup() -> (TempDir, SqliteStore, PathBuf) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::open(temp.path().join("margie.db"), StoreOptions::default()).unwrap();
        let gff = temp.path().join("sample1-prodigal.gff");
        fs::write(&gff, GFF).unwrap();
        (temp, store, gff)
    }

    #[test]
    fn test_load_then_skip() {
        let (temp, store, gff) = setup();
        let token = temp.path().join("tokens/prodigal_db.tkn");

        let first = load_gff(&store, &gff, "prodigal", Some(&token)).unwrap();
        assert_eq!(first.state, CacheState::Absent);
        assert_eq!(first.rows_loaded, 2);
        assert_eq!(first.skipped_lines, 1);
        assert_eq!(first.run.row_count, 2);
        assert_eq!(
            fs::read_to_string(&token).unwrap(),
            "2 rows loaded from prodigal\n"
        );

        let second = load_gff(&store, &gff, "prodigal", None).unwrap();
        assert_eq!(second.state, CacheState::Cached);
        assert_eq!(second.rows_loaded, 0);
        assert_eq!(annotation_count(&store, "prodigal").unwrap(), 2);

        let ledger = Ledger::new(&store);
        assert_eq!(
            ledger
                .runs(&crate::ledger::RunFilter::default())
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_changed_file_replaces_rows() {
        let (_temp, store, gff) = setup();
        load_gff(&store, &gff, "prodigal", None).unwrap();

        fs::write(
            &gff,
            "contig_9\tProdigal\tCDS\t1\t90\t.\t+\t0\tID=9_1;conf=50.0\n",
        )
        .unwrap();
        let report = load_gff(&store, &gff, "prodigal", None).unwrap();

        assert!(matches!(report.state, CacheState::Stale { .. }));
        assert_eq!(annotation_count(&store, "prodigal").unwrap(), 1);
        assert_eq!(
            Ledger::new(&store)
                .checksum_history(&load_computation("prodigal"))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn test_sources_are_independent() {
        let (_temp, store, gff) = setup();
        load_gff(&store, &gff, "prodigal", None).unwrap();
        let other = load_gff(&store, &gff, "prodigal_rerun", None).unwrap();

        assert_eq!(other.state, CacheState::Absent);
        assert_eq!(annotation_count(&store, "prodigal").unwrap(), 2);
        assert_eq!(annotation_count(&store, "prodigal_rerun").unwrap(), 2);
    }

    #[test]
    fn test_missing_file_is_fatal_without_row() {
        let (temp, store, _gff) = setup();
        let err = load_gff(&store, &temp.path().join("none.gff"), "prodigal", None).unwrap_err();
        assert!(matches!(err, LoadError::Fingerprint(_)));
        assert!(Ledger::new(&store)
            .runs(&crate::ledger::RunFilter::default())
            .unwrap()
            .is_empty());
    }
}
