//! `_metadata` receipt rows
//!
//! Rows are only ever inserted. Ordering is insertion order (rowid), which
//! is stable even when two rows share a timestamp.
//!
//! The functions take a plain [`Connection`] so they can join a caller's
//! transaction (`Transaction` derefs to `Connection`).

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::fmt;

use crate::storage::now_timestamp;

/// Value of the `type` column
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiptKind {
    /// Store initialisation, written once
    Created,
    /// Content checksum in effect for a computation (`notes`)
    Checksum,
    /// Human-readable activity line, `value` holds the run id
    Activity,
    /// Rows written by other tools sharing the store
    Other(String),
}

impl ReceiptKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Checksum => "checksum",
            Self::Activity => "activity",
            Self::Other(kind) => kind,
        }
    }
}

impl From<&str> for ReceiptKind {
    fn from(value: &str) -> Self {
        match value {
            "created" => Self::Created,
            "checksum" => Self::Checksum,
            "activity" => Self::Activity,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for ReceiptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Receipt {
    #[serde(rename = "type")]
    pub kind: String,
    pub notes: Option<String>,
    pub value: Option<String>,
    pub timestamp: String,
}

impl Receipt {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            kind: row.get(0)?,
            notes: row.get(1)?,
            value: row.get(2)?,
            timestamp: row.get(3)?,
        })
    }
}

pub fn append(
    conn: &Connection,
    kind: &ReceiptKind,
    notes: Option<&str>,
    value: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO _metadata (type, notes, value, timestamp) VALUES (?1, ?2, ?3, ?4)",
        params![kind.as_str(), notes, value, now_timestamp()],
    )?;
    Ok(())
}

/// Record the checksum now in effect for `computation`
pub fn record_checksum(conn: &Connection, computation: &str, checksum: &str) -> rusqlite::Result<()> {
    append(conn, &ReceiptKind::Checksum, Some(computation), Some(checksum))
}

pub fn record_activity(conn: &Connection, notes: &str, run_id: &str) -> rusqlite::Result<()> {
    append(conn, &ReceiptKind::Activity, Some(notes), Some(run_id))
}

/// Most recent checksum recorded for `computation`
pub fn latest_checksum(conn: &Connection, computation: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM _metadata
         WHERE type = 'checksum' AND notes = ?1
         ORDER BY rowid DESC LIMIT 1",
        params![computation],
        |row| row.get(0),
    )
    .optional()
    .map(Option::flatten)
}

/// Every checksum receipt for `computation`, oldest first
pub fn checksum_history(conn: &Connection, computation: &str) -> rusqlite::Result<Vec<Receipt>> {
    let mut stmt = conn.prepare(
        "SELECT type, notes, value, timestamp FROM _metadata
         WHERE type = 'checksum' AND notes = ?1
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![computation], Receipt::from_row)?;
    rows.collect()
}

/// All receipts, optionally of one kind, oldest first
pub fn entries(conn: &Connection, kind: Option<&ReceiptKind>) -> rusqlite::Result<Vec<Receipt>> {
    let mut stmt = conn.prepare(
        "SELECT type, notes, value, timestamp FROM _metadata
         WHERE ?1 IS NULL OR type = ?1
         ORDER BY rowid",
    )?;
    let rows = stmt.query_map(params![kind.map(|k| k.as_str())], Receipt::from_row)?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::schema;

    fn memory_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(schema::CREATE_METADATA).unwrap();
        conn
    }

    #[test]
    fn test_latest_checksum_tracks_last_append() {
        let conn = memory_db();
        assert_eq!(latest_checksum(&conn, "prodigal").unwrap(), None);

        record_checksum(&conn, "prodigal", "1111111111111111").unwrap();
        record_checksum(&conn, "pfam", "2222222222222222").unwrap();
        record_checksum(&conn, "prodigal", "3333333333333333").unwrap();

        assert_eq!(
            latest_checksum(&conn, "prodigal").unwrap().as_deref(),
            Some("3333333333333333")
        );

        let history = checksum_history(&conn, "prodigal").unwrap();
        let values: Vec<_> = history.iter().filter_map(|r| r.value.as_deref()).collect();
        assert_eq!(values, vec!["1111111111111111", "3333333333333333"]);
    }

    #[test]
    fn test_entries_filter_by_kind() {
        let conn = memory_db();
        record_checksum(&conn, "prodigal", "1111111111111111").unwrap();
        record_activity(&conn, "ran prodigal", "run-1").unwrap();
        append(&conn, &ReceiptKind::Other("note".into()), Some("by hand"), None).unwrap();

        assert_eq!(entries(&conn, None).unwrap().len(), 3);

        let activity = entries(&conn, Some(&ReceiptKind::Activity)).unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].value.as_deref(), Some("run-1"));
        assert_eq!(ReceiptKind::from(activity[0].kind.as_str()), ReceiptKind::Activity);
    }
}
