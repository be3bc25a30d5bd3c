//! Schema versioning for the embedded store.
//!
//! Migrations are static SQL strings keyed by version number.  The applied
//! version is tracked in a `_migrations` table, so an up-to-date database is
//! left untouched and only has its tables verified.  A migration replaces
//! both tables wholesale: any older layout is dropped and recreated with its
//! indexes inside the same transaction.

use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Tables that must exist once the schema is prepared.
pub const REQUIRED_TABLES: [&str; 2] = ["users", "user_technologies"];

/// A single migration definition.
struct Migration {
    /// Monotonically increasing version number (1, 2, 3, ...).
    version: u32,
    description: &'static str,
    /// Raw SQL to execute. May contain multiple statements separated by `;`.
    sql: &'static str,
}

/// All migrations in order. Add new migrations to the end of this array.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "users with unique email index, user_technologies relation",
    sql: r#"
        DROP TABLE IF EXISTS user_technologies;
        DROP TABLE IF EXISTS users;

        CREATE TABLE users (
            id              TEXT PRIMARY KEY,
            email           TEXT NOT NULL,
            password        TEXT NOT NULL,
            display_name    TEXT NOT NULL,
            role            TEXT NOT NULL,
            email_verified  BOOLEAN NOT NULL DEFAULT 0,
            profile         TEXT NOT NULL DEFAULT '{}',
            created_at      INTEGER NOT NULL,
            last_login_at   INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX idx_users_email ON users(email);

        CREATE TABLE user_technologies (
            user_id     TEXT NOT NULL,
            technology  TEXT NOT NULL,
            PRIMARY KEY (user_id, technology)
        );
        CREATE INDEX idx_user_technologies_user ON user_technologies(user_id);
    "#,
}];

/// The schema version this build expects.
pub fn schema_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

// ── public API ───────────────────────────────────────────────────────

/// Run all pending migrations against `conn`.
///
/// This is a **synchronous** function — call it from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StorageResult<()> {
    ensure_migrations_table(conn)?;

    let current = current_version(conn)?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        debug!(current_version = current, "database schema is up to date");
        return Ok(());
    }

    info!(
        current_version = current,
        pending = pending.len(),
        "upgrading database schema"
    );

    for migration in pending {
        apply(conn, migration)?;
    }

    info!(new_version = schema_version(), "schema upgrade complete");
    Ok(())
}

/// Return the latest applied migration version, or 0 if none.
pub fn current_version(conn: &Connection) -> StorageResult<u32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StorageError::Unknown(format!("failed to read schema version: {e}")))
}

/// Check that every table in [`REQUIRED_TABLES`] exists.
///
/// A missing table after migration means the file is not what we think it
/// is; this is reported as fatal and never retried.
pub fn verify(conn: &Connection) -> StorageResult<()> {
    for table in REQUIRED_TABLES {
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StorageError::Unknown(format!(
                "schema verification failed: table `{table}` is missing"
            )));
        }
    }
    Ok(())
}

// ── internals ────────────────────────────────────────────────────────

/// Create the `_migrations` bookkeeping table if it does not exist.
fn ensure_migrations_table(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version     INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at  INTEGER NOT NULL
        );",
    )?;
    Ok(())
}

/// Apply a single migration inside a transaction.
fn apply(conn: &Connection, migration: &Migration) -> StorageResult<()> {
    info!(
        version = migration.version,
        description = migration.description,
        "applying migration"
    );

    // `conn.transaction()` needs `&mut Connection`; manage it by hand.
    conn.execute_batch("BEGIN IMMEDIATE;")?;

    let result = (|| -> StorageResult<()> {
        conn.execute_batch(migration.sql).map_err(|e| {
            StorageError::Unknown(format!(
                "migration v{} failed: {e}",
                migration.version
            ))
        })?;

        let now = chrono::Utc::now().timestamp();
        conn.execute(
            "INSERT INTO _migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![migration.version, migration.description, now],
        )?;

        Ok(())
    })();

    match &result {
        Ok(()) => {
            conn.execute_batch("COMMIT;")?;
            debug!(version = migration.version, "migration committed");
        }
        Err(err) => {
            warn!(version = migration.version, %err, "migration failed, rolling back");
            let _ = conn.execute_batch("ROLLBACK;");
        }
    }

    result
}

// ── tests ────────────────────────────────────────────────────────────
