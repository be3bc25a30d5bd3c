//! SQLite database handle with WAL mode and the schema bootstrap.
//!
//! The [`Database`] struct wraps a single `rusqlite::Connection` behind an
//! `Arc<Mutex<>>` that is shared by every operation for the lifetime of the
//! handle.  Async methods dispatch onto the blocking pool via
//! `tokio::task::spawn_blocking` to avoid stalling the runtime.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};
use crate::migration;

/// Thread-safe handle to a SQLite database.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// Missing parent directories are created.  Blocking; call from
    /// `spawn_blocking` when inside the runtime.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening database");

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Connectivity(format!(
                    "cannot create database directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database — useful for tests.
    pub fn open_in_memory() -> StorageResult<Self> {
        debug!("opening in-memory database");

        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Delete the database file at `path` along with its WAL and shared
    /// memory side files.  Missing files are not an error.
    pub fn destroy(path: impl AsRef<Path>) -> StorageResult<()> {
        let path = path.as_ref();
        let mut removed = 0;
        for file in side_files(path) {
            match std::fs::remove_file(&file) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::Connectivity(format!(
                        "cannot remove {}: {e}",
                        file.display()
                    )));
                }
            }
        }
        if removed > 0 {
            warn!(path = %path.display(), removed, "existing database dropped");
        }
        Ok(())
    }

    /// Whether `other` shares this handle's connection.
    pub fn same_handle(&self, other: &Database) -> bool {
        Arc::ptr_eq(&self.conn, &other.conn)
    }

    /// Bring the schema to the current version and verify it.
    pub async fn prepare_schema(&self) -> StorageResult<()> {
        self.execute(|conn| {
            migration::run_all(conn)?;
            migration::verify(conn)
        })
        .await
    }

    /// Execute a closure against the connection on the blocking pool.
    ///
    /// ```ignore
    /// let count: i64 = db.execute(|conn| {
    ///     Ok(conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?)
    /// }).await?;
    /// ```
    pub async fn execute<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| StorageError::Connectivity(format!("mutex poisoned: {e}")))?;
            f(&conn)
        })
        .await?
    }

    /// Execute a mutable closure (for transactions) on the blocking pool.
    pub async fn execute_mut<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StorageError::Connectivity(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    // ── pragmas ──────────────────────────────────────────────────────

    fn apply_pragmas(conn: &Connection) -> StorageResult<()> {
        debug!("applying SQLite pragmas");

        // WAL mode: concurrent readers, non-blocking writes.
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // NORMAL sync is safe with WAL; a power loss costs at most the last
        // transaction, never the file.
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Concurrent writers wait instead of failing immediately.
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;

        Ok(())
    }
}

/// The database file plus its `-wal` and `-shm` companions.
fn side_files(path: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    };
    [path.to_path_buf(), with_suffix("-wal"), with_suffix("-shm")]
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_works() {
        let db = Database::open_in_memory().unwrap();
        let version: String = db
            .execute(|conn| {
                let v: String =
                    conn.query_row("SELECT sqlite_version()", [], |row| row.get(0))?;
                Ok(v)
            })
            .await
            .unwrap();
        assert!(!version.is_empty());
    }

    #[tokio::test]
    async fn prepare_schema_creates_tables() {
        let db = Database::open_in_memory().unwrap();
        db.prepare_schema().await.unwrap();

        let count: i64 = db
            .execute(|conn| {
                let c: i64 = conn.query_row("SELECT count(*) FROM users", [], |row| row.get(0))?;
                Ok(c)
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.db");
        Database::open(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn destroy_removes_file_and_tolerates_absence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        Database::open(&path).unwrap();
        assert!(path.exists());

        Database::destroy(&path).unwrap();
        assert!(!path.exists());
        assert!(!dir.path().join("store.db-wal").exists());

        // Second call finds nothing to remove.
        Database::destroy(&path).unwrap();
    }

    #[test]
    fn clones_share_one_connection() {
        let db = Database::open_in_memory().unwrap();
        let other = Database::open_in_memory().unwrap();
        assert!(db.same_handle(&db.clone()));
        assert!(!db.same_handle(&other));
    }

    #[test]
    fn side_files_append_suffixes() {
        let files = side_files(Path::new("/tmp/a.db"));
        assert_eq!(files[1], PathBuf::from("/tmp/a.db-wal"));
        assert_eq!(files[2], PathBuf::from("/tmp/a.db-shm"));
    }
}
