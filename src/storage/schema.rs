// Persisted layout of a MARGIE store file.
//
// One SQLite file per subject. The three tables below are the whole
// contract with other tools that read the file; column names are stable.

/// Content-addressed artifact blobs
pub const CREATE_OUTPUT_CACHE: &str = "
CREATE TABLE IF NOT EXISTS output_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    computation TEXT NOT NULL,
    artifact TEXT NOT NULL,
    content BLOB NOT NULL,
    size_bytes INTEGER NOT NULL,
    cached_at TEXT NOT NULL,
    UNIQUE(fingerprint, computation, artifact)
);
";

/// Append-only record of every execution attempt
pub const CREATE_RUN_LOG: &str = "
CREATE TABLE IF NOT EXISTS run_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    computation TEXT NOT NULL,
    input_path TEXT NOT NULL,
    row_count INTEGER NOT NULL DEFAULT 0,
    rules_completed INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_run_log_fingerprint ON run_log(fingerprint);
";

/// Receipt / changelog rows, append-only
pub const CREATE_METADATA: &str = "
CREATE TABLE IF NOT EXISTS _metadata (
    type TEXT NOT NULL,
    notes TEXT,
    value TEXT,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_metadata_type_notes ON _metadata(type, notes);
";

/// Annotation rows written by the GFF record loader
pub const CREATE_ANNOTATIONS: &str = "
CREATE TABLE IF NOT EXISTS annotations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    seqid TEXT NOT NULL,
    source TEXT NOT NULL,
    type TEXT NOT NULL,
    start INTEGER NOT NULL,
    end INTEGER NOT NULL,
    score REAL,
    strand TEXT,
    phase TEXT,
    attributes TEXT,
    gene_id TEXT,
    partial TEXT,
    start_type TEXT,
    rbs_motif TEXT,
    gc_content REAL,
    confidence REAL
);
CREATE INDEX IF NOT EXISTS idx_annotations_source ON annotations(source);
";

/// All statements, in creation order
pub fn all() -> [&'static str; 4] {
    [
        CREATE_OUTPUT_CACHE,
        CREATE_RUN_LOG,
        CREATE_METADATA,
        CREATE_ANNOTATIONS,
    ]
}
