pub mod migrations;
pub mod schema;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::Serialize;
use std::path::Path;

use crate::error::CortexError;

/// Soft size limit: log a warning above this.
pub const SIZE_WARN_BYTES: u64 = 50 * 1024 * 1024;
/// Hard size cap: refuse new writes above this.
pub const SIZE_CAP_BYTES: u64 = 100 * 1024 * 1024;

/// Open (or create) the Cortex database at the given path with the schema
/// initialized and migrations applied.
pub fn open_database(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path).with_context(|| {
        format!(
            "failed to open database at {}. If the file is corrupt, \
             restore from a backup or delete it to start fresh.",
            path.display()
        )
    })?;

    // WAL for concurrent readers, NORMAL sync is durable enough under WAL
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // Wait up to 5 seconds for locks instead of failing immediately
    conn.pragma_update(None, "busy_timeout", "5000")?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    // Quick integrity check after schema init
    let integrity: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if integrity != "ok" {
        anyhow::bail!(
            "database integrity check failed: {integrity}. \
             Restore from a backup before continuing."
        );
    }

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Run `f` inside a deferred transaction; committed on Ok, rolled back on Err
/// (or on panic, via Drop).
pub fn with_transaction<T, F>(conn: &mut Connection, f: F) -> Result<T, CortexError>
where
    F: FnOnce(&Transaction) -> Result<T, CortexError>,
{
    let tx = conn.transaction()?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// Run `f` inside an IMMEDIATE transaction, taking the write lock up front.
///
/// Use for multi-statement critical sections (consolidation, merges) that must
/// serialize against concurrent writers rather than fail at first write.
pub fn with_immediate_transaction<T, F>(conn: &mut Connection, f: F) -> Result<T, CortexError>
where
    F: FnOnce(&Transaction) -> Result<T, CortexError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let out = f(&tx)?;
    tx.commit()?;
    Ok(out)
}

/// On-disk size snapshot, including the WAL sidecar.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SizeInfo {
    pub bytes: u64,
    pub warn: bool,
    pub blocked: bool,
}

/// Measure the database file (plus `-wal`) against the size limits.
/// An unmeasurable path (in-memory DB) reports zero and never blocks.
pub fn size_info(path: &Path) -> SizeInfo {
    let mut bytes = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    let wal = path.with_extension("db-wal");
    if let Ok(meta) = std::fs::metadata(&wal) {
        bytes += meta.len();
    }
    SizeInfo {
        bytes,
        warn: bytes > SIZE_WARN_BYTES,
        blocked: bytes > SIZE_CAP_BYTES,
    }
}

/// Gate for write paths: `Err(OverCapacity)` above the hard cap.
pub fn check_writable(path: &Path) -> Result<(), CortexError> {
    let info = size_info(path);
    if info.blocked {
        return Err(CortexError::OverCapacity {
            size_bytes: info.bytes,
            cap_bytes: SIZE_CAP_BYTES,
        });
    }
    if info.warn {
        tracing::warn!(
            bytes = info.bytes,
            "database is above the {} MiB soft limit",
            SIZE_WARN_BYTES / (1024 * 1024)
        );
    }
    Ok(())
}

/// Open an in-memory database for testing.
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_commits_on_ok() {
        let mut conn = open_memory_database().unwrap();
        with_transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO memories (title, content, tags, last_accessed, created_at) \
                 VALUES ('t', 'c', '[]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn transaction_rolls_back_on_err() {
        let mut conn = open_memory_database().unwrap();
        let result: Result<(), CortexError> = with_transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO memories (title, content, tags, last_accessed, created_at) \
                 VALUES ('t', 'c', '[]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Err(CortexError::Internal("boom".into()))
        });
        assert!(result.is_err());

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn immediate_transaction_commits() {
        let mut conn = open_memory_database().unwrap();
        let n = with_immediate_transaction(&mut conn, |tx| {
            tx.execute(
                "INSERT INTO memories (title, content, tags, last_accessed, created_at) \
                 VALUES ('t', 'c', '[]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
                [],
            )?;
            Ok(7)
        })
        .unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn size_info_of_missing_path_is_zero() {
        let info = size_info(Path::new("/nonexistent/cortex.db"));
        assert_eq!(info.bytes, 0);
        assert!(!info.warn);
        assert!(!info.blocked);
    }

    #[test]
    fn open_database_creates_file_and_passes_integrity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memories.db");
        let conn = open_database(&path).unwrap();
        assert!(path.exists());

        let version = migrations::get_schema_version(&conn).unwrap();
        assert_eq!(version, migrations::CURRENT_SCHEMA_VERSION);
    }
}
