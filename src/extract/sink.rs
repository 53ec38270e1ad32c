//! SQLite persistence for extracted rows and error records.
//!
//! One store per run. Schema and views are created in autocommit during
//! `create`; every insert afterwards lands in a single run-spanning
//! transaction that only becomes visible at `commit`. Dropping the store
//! without committing rolls the whole run back, so an interrupted run
//! leaves a destination with schema but no rows.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::extract::types::{FlatRow, Step};

const SCHEMA: &str = "
CREATE TABLE PROCESSED_FILES (
    id INTEGER PRIMARY KEY,
    file TEXT);
CREATE TABLE PLIST_DATA (
    id INTEGER PRIMARY KEY,
    pf_id INT,
    key_path TEXT,
    key TEXT,
    value TEXT,
    FOREIGN KEY (pf_id) REFERENCES PROCESSED_FILES (id));
CREATE TABLE ERRORS (
    id INTEGER PRIMARY KEY,
    pf_id INT,
    processing_step TEXT,
    error TEXT,
    FOREIGN KEY (pf_id) REFERENCES PROCESSED_FILES (id));
CREATE VIEW PLIST_DATA_VIEW AS SELECT
    file, key_path, key, value FROM PLIST_DATA INNER JOIN
    PROCESSED_FILES ON PROCESSED_FILES.id = PLIST_DATA.pf_id;
CREATE VIEW ERRORS_VIEW AS SELECT
    file, processing_step, error FROM ERRORS INNER JOIN
    PROCESSED_FILES ON PROCESSED_FILES.id = ERRORS.pf_id;
";

/// Run-scoped store over one SQLite connection.
pub struct SqliteStore {
    conn: Connection,
    db_path: PathBuf,
    data_rows: u64,
    error_rows: u64,
    archiver_anomaly: bool,
}

impl SqliteStore {
    /// Delete any previous database at `path` and create a fresh one.
    ///
    /// A destination that cannot be removed or initialized is a fatal
    /// startup error; nothing may be processed against a stale store.
    pub fn create(path: &Path) -> Result<Self> {
        if path.exists() {
            std::fs::remove_file(path).with_context(|| {
                format!("failed to remove previous database: {}", path.display())
            })?;
        }
        // stale WAL sidecars from a previous run must not outlive the db
        for suffix in ["-wal", "-shm"] {
            let mut sidecar = path.as_os_str().to_owned();
            sidecar.push(suffix);
            let sidecar = PathBuf::from(sidecar);
            if sidecar.exists() {
                std::fs::remove_file(&sidecar).with_context(|| {
                    format!("failed to remove stale sidecar: {}", sidecar.display())
                })?;
            }
        }

        let conn = Connection::open(path)
            .with_context(|| format!("failed to create database: {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("failed to set WAL journal mode")?;
        conn.execute_batch(SCHEMA)
            .context("failed to create schema")?;

        // one transaction for the whole run, committed in commit()
        conn.execute_batch("BEGIN")
            .context("failed to open run transaction")?;

        info!(db = %path.display(), "created destination store");
        Ok(SqliteStore {
            conn,
            db_path: path.to_path_buf(),
            data_rows: 0,
            error_rows: 0,
            archiver_anomaly: false,
        })
    }

    /// Register a file-processing attempt. Called before any decode is
    /// tried; the returned id owns every later data/error row for the file.
    pub fn insert_file(&self, file: &str) -> Result<i64> {
        self.conn
            .execute("INSERT INTO PROCESSED_FILES (file) VALUES (?1)", params![file])
            .context("failed to insert processed file")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_data(&mut self, pf_id: i64, row: &FlatRow) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO PLIST_DATA (pf_id, key_path, key, value)
                 VALUES (?1, ?2, ?3, ?4)",
                params![pf_id, row.key_path, row.key, row.value],
            )
            .context("failed to insert data row")?;
        self.data_rows += 1;
        Ok(())
    }

    pub fn insert_error(&mut self, pf_id: i64, step: Step, error: &str) -> Result<()> {
        debug!(pf_id, step = step.as_str(), error, "recording error");
        self.conn
            .execute(
                "INSERT INTO ERRORS (pf_id, processing_step, error)
                 VALUES (?1, ?2, ?3)",
                params![pf_id, step.as_str(), error],
            )
            .context("failed to insert error row")?;
        self.error_rows += 1;
        Ok(())
    }

    /// Record that an archiver re-decode failed or came back incomplete.
    pub fn note_archiver_anomaly(&mut self) {
        self.archiver_anomaly = true;
    }

    pub fn archiver_anomaly(&self) -> bool {
        self.archiver_anomaly
    }

    pub fn data_rows(&self) -> u64 {
        self.data_rows
    }

    pub fn error_rows(&self) -> u64 {
        self.error_rows
    }

    /// Commit the run. Until this succeeds no row from the run is visible
    /// to any other reader of the database.
    pub fn commit(self) -> Result<()> {
        self.conn
            .execute_batch("COMMIT")
            .context("failed to commit run")?;
        info!(
            db = %self.db_path.display(),
            data_rows = self.data_rows,
            error_rows = self.error_rows,
            "committed run"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn row_count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_insert_and_commit() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("out.db");

        let mut store = SqliteStore::create(&db_path).unwrap();
        let pf_id = store.insert_file("/tmp/a.plist").unwrap();
        store
            .insert_data(pf_id, &FlatRow::new("", "Name", "Alice"))
            .unwrap();
        store.insert_error(pf_id, Step::XmlPlist, "boom").unwrap();
        store.commit().unwrap();

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(row_count(&conn, "PROCESSED_FILES"), 1);
        assert_eq!(row_count(&conn, "PLIST_DATA"), 1);
        assert_eq!(row_count(&conn, "ERRORS"), 1);

        let (file, key, value): (String, String, String) = conn
            .query_row(
                "SELECT file, key, value FROM PLIST_DATA_VIEW",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .unwrap();
        assert_eq!(file, "/tmp/a.plist");
        assert_eq!(key, "Name");
        assert_eq!(value, "Alice");
    }

    #[test]
    fn test_uncommitted_run_leaves_no_rows() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("out.db");

        let mut store = SqliteStore::create(&db_path).unwrap();
        let pf_id = store.insert_file("/tmp/a.plist").unwrap();
        store
            .insert_data(pf_id, &FlatRow::new("", "Name", "Alice"))
            .unwrap();
        // simulated termination: drop without commit
        drop(store);

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(row_count(&conn, "PROCESSED_FILES"), 0);
        assert_eq!(row_count(&conn, "PLIST_DATA"), 0);
        // initialization itself is visible
        assert_eq!(row_count(&conn, "sqlite_master"), 5);
    }

    #[test]
    fn test_existing_destination_replaced() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("out.db");
        std::fs::write(&db_path, b"stale bytes").unwrap();

        let store = SqliteStore::create(&db_path).unwrap();
        store.commit().unwrap();

        let conn = Connection::open(&db_path).unwrap();
        assert_eq!(row_count(&conn, "PROCESSED_FILES"), 0);
    }
}
