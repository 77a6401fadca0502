//! Tracking Store: an embedded single-file store of processed declarations,
//! error history, and processed-file paths.
//!
//! Every public method opens, commits, and closes its own connection rather
//! than holding one open across calls, so callers never carry a handle
//! across an `await` point.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Declaration, ErrorEntry, ProcessedEntry};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS processed (
    declaration_id   TEXT PRIMARY KEY,
    tax_code         TEXT NOT NULL,
    declaration_number TEXT NOT NULL,
    file_path        TEXT NOT NULL,
    processed_at     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS error_history (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp        TEXT NOT NULL,
    declaration_number TEXT NOT NULL,
    error_type       TEXT NOT NULL,
    error_message    TEXT NOT NULL,
    resolved         INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_error_history_timestamp ON error_history(timestamp);
CREATE INDEX IF NOT EXISTS idx_error_history_declaration_number ON error_history(declaration_number);
";

fn kind_to_tag(kind: ErrorKind) -> String {
    kind.to_string()
}

fn tag_to_kind(tag: &str) -> ErrorKind {
    match tag {
        "database" => ErrorKind::Database,
        "network" => ErrorKind::Network,
        "file_system" => ErrorKind::FileSystem,
        "data" => ErrorKind::Data,
        "configuration" => ErrorKind::Configuration,
        _ => ErrorKind::Unknown,
    }
}

/// Handle to the tracking store file. Cheap to clone-by-path; every
/// operation is its own connection lifecycle.
pub struct TrackingStore {
    path: PathBuf,
}

impl TrackingStore {
    /// Opens (creating if needed) the store at `path`, ensuring schema and
    /// indexes exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path).map_err(Error::SourceDb)?;
        conn.execute_batch(SCHEMA).map_err(Error::SourceDb)?;
        Ok(Self { path })
    }

    fn connect(&self) -> Result<Connection> {
        Connection::open(&self.path).map_err(Error::SourceDb)
    }

    pub fn is_processed(&self, declaration: &Declaration) -> Result<bool> {
        let conn = self.connect()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM processed WHERE declaration_id = ?1",
                params![declaration.id()],
                |row| row.get(0),
            )
            .map_err(Error::SourceDb)?;
        Ok(count > 0)
    }

    pub fn get_all_processed(&self) -> Result<HashSet<String>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare("SELECT declaration_id FROM processed")
            .map_err(Error::SourceDb)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(Error::SourceDb)?
            .collect::<std::result::Result<HashSet<_>, _>>()
            .map_err(Error::SourceDb)?;
        Ok(ids)
    }

    pub fn get_all_processed_details(&self) -> Result<Vec<ProcessedEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT declaration_id, tax_code, declaration_number, file_path, processed_at
                 FROM processed ORDER BY processed_at DESC",
            )
            .map_err(Error::SourceDb)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(ProcessedEntry {
                    declaration_id: row.get(0)?,
                    tax_code: row.get(1)?,
                    declaration_number: row.get(2)?,
                    file_path: row.get(3)?,
                    processed_at: row.get::<_, String>(4)?.parse().unwrap_or_default(),
                })
            })
            .map_err(Error::SourceDb)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::SourceDb)?;
        Ok(rows)
    }

    /// Upserts the processed row for `declaration` (testable property #8:
    /// idempotent, primary key on declaration id prevents duplicates).
    pub fn add_processed(&self, declaration: &Declaration, file_path: &str) -> Result<()> {
        let conn = self.connect()?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "INSERT INTO processed (declaration_id, tax_code, declaration_number, file_path, processed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(declaration_id) DO UPDATE SET
                file_path = excluded.file_path,
                processed_at = excluded.processed_at",
            params![
                declaration.id(),
                declaration.tax_code,
                declaration.declaration_number,
                file_path,
                now.to_string(),
            ],
        )
        .map_err(Error::SourceDb)?;
        Ok(())
    }

    pub fn update_processed_timestamp(&self, declaration: &Declaration) -> Result<()> {
        let conn = self.connect()?;
        let now = Utc::now().naive_utc();
        conn.execute(
            "UPDATE processed SET processed_at = ?1 WHERE declaration_id = ?2",
            params![now.to_string(), declaration.id()],
        )
        .map_err(Error::SourceDb)?;
        Ok(())
    }

    pub fn record_error(
        &self,
        declaration_number: &str,
        error_type: ErrorKind,
        message: &str,
        timestamp: Option<NaiveDateTime>,
    ) -> Result<()> {
        let conn = self.connect()?;
        let ts = timestamp.unwrap_or_else(|| Utc::now().naive_utc());
        conn.execute(
            "INSERT INTO error_history (timestamp, declaration_number, error_type, error_message, resolved)
             VALUES (?1, ?2, ?3, ?4, 0)",
            params![ts.to_string(), declaration_number, kind_to_tag(error_type), message],
        )
        .map_err(Error::SourceDb)?;
        Ok(())
    }

    pub fn get_error_history(&self, days: i64) -> Result<Vec<ErrorEntry>> {
        let conn = self.connect()?;
        let cutoff = (Utc::now() - chrono::Duration::days(days)).naive_utc();
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, declaration_number, error_type, error_message, resolved
                 FROM error_history WHERE timestamp >= ?1 ORDER BY timestamp DESC",
            )
            .map_err(Error::SourceDb)?;
        let rows = stmt
            .query_map(params![cutoff.to_string()], row_to_error_entry)
            .map_err(Error::SourceDb)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::SourceDb)?;
        Ok(rows)
    }

    pub fn get_errors_for_declaration(&self, declaration_number: &str) -> Result<Vec<ErrorEntry>> {
        let conn = self.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, timestamp, declaration_number, error_type, error_message, resolved
                 FROM error_history WHERE declaration_number = ?1 ORDER BY timestamp DESC",
            )
            .map_err(Error::SourceDb)?;
        let rows = stmt
            .query_map(params![declaration_number], row_to_error_entry)
            .map_err(Error::SourceDb)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::SourceDb)?;
        Ok(rows)
    }

    pub fn clear_old_errors(&self, days: i64) -> Result<usize> {
        let conn = self.connect()?;
        let cutoff = (Utc::now() - chrono::Duration::days(days)).naive_utc();
        let n = conn
            .execute(
                "DELETE FROM error_history WHERE timestamp < ?1",
                params![cutoff.to_string()],
            )
            .map_err(Error::SourceDb)?;
        Ok(n)
    }

    pub fn mark_resolved(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let n = conn
            .execute(
                "UPDATE error_history SET resolved = 1 WHERE id = ?1",
                params![id],
            )
            .map_err(Error::SourceDb)?;
        Ok(n > 0)
    }

    pub fn get_error_count(&self, days: i64) -> Result<i64> {
        let conn = self.connect()?;
        let cutoff = (Utc::now() - chrono::Duration::days(days)).naive_utc();
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(1) FROM error_history WHERE timestamp >= ?1",
                params![cutoff.to_string()],
                |row| row.get(0),
            )
            .map_err(Error::SourceDb)?;
        Ok(n)
    }
}

fn row_to_error_entry(row: &rusqlite::Row) -> rusqlite::Result<ErrorEntry> {
    Ok(ErrorEntry {
        id: row.get(0)?,
        timestamp: row.get::<_, String>(1)?.parse().unwrap_or_default(),
        declaration_number: row.get(2)?,
        error_type: tag_to_kind(&row.get::<_, String>(3)?),
        message: row.get(4)?,
        resolved: row.get::<_, i64>(5)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn sample_declaration() -> Declaration {
        Declaration {
            declaration_number: "107785877140".into(),
            tax_code: "2300944637".into(),
            declaration_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
            customs_office_code: "18A3".into(),
            transport_method: "1".into(),
            channel: "Xanh".into(),
            status: "T".into(),
            goods_description: None,
        }
    }

    #[test]
    fn add_processed_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("tracking.db")).unwrap();
        let d = sample_declaration();
        assert!(!store.is_processed(&d).unwrap());
        store.add_processed(&d, "/out/a.pdf").unwrap();
        assert!(store.is_processed(&d).unwrap());
        store.add_processed(&d, "/out/a.pdf").unwrap();
        assert_eq!(store.get_all_processed_details().unwrap().len(), 1);
    }

    #[test]
    fn error_round_trips_for_declaration() {
        let dir = tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("tracking.db")).unwrap();
        store
            .record_error("107785877140", ErrorKind::Network, "timeout", None)
            .unwrap();
        let errs = store.get_errors_for_declaration("107785877140").unwrap();
        assert_eq!(errs.len(), 1);
        assert_eq!(errs[0].error_type, ErrorKind::Network);
        assert_eq!(errs[0].message, "timeout");
        assert!(!errs[0].resolved);
    }

    #[test]
    fn mark_resolved_and_clear_old_errors() {
        let dir = tempdir().unwrap();
        let store = TrackingStore::open(dir.path().join("tracking.db")).unwrap();
        store
            .record_error("1", ErrorKind::Data, "bad xml", Some(Utc::now().naive_utc() - chrono::Duration::days(40)))
            .unwrap();
        store.record_error("2", ErrorKind::Data, "bad xml again", None).unwrap();
        assert_eq!(store.get_error_count(30).unwrap(), 1);
        let deleted = store.clear_old_errors(30).unwrap();
        assert_eq!(deleted, 1);
        let remaining = store.get_error_history(30).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(store.mark_resolved(remaining[0].id).unwrap());
    }
}
