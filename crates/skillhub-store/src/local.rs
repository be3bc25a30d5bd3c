//! Embedded, offline-capable backend on SQLite.
//!
//! Two tables: `users` (primary key `id`, unique index on `email`) and
//! `user_technologies` (composite key `(user_id, technology)`, indexed by
//! `user_id`).  Every read assembles `technologies` from the relation; every
//! multi-table write runs in one transaction.
//!
//! The store opens lazily: any operation issued before
//! [`Storage::initialize`] opens the database first.  When an operation fails
//! because the handle itself is unusable, the store reopens once and retries
//! that operation once.

use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{StorageError, StorageResult};
use crate::model::{DebugDump, NewUser, TechnologyRow, User, UserPatch, UserProfile};
use crate::traits::{BackendKind, Storage};

/// Default on-disk location of the local database.
pub const DEFAULT_DB_PATH: &str = "data/skillhub.db";

// ═══════════════════════════════════════════════════════════════════════
//  Configuration
// ═══════════════════════════════════════════════════════════════════════

/// Settings for [`LocalStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    /// Database file.  `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Drop any existing database file on first initialization.
    pub reset_on_init: bool,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(DEFAULT_DB_PATH)),
            reset_on_init: false,
        }
    }
}

impl LocalStoreConfig {
    /// A database that lives only as long as the store.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            reset_on_init: false,
        }
    }

    /// A database file at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            reset_on_init: false,
        }
    }

    pub fn with_reset_on_init(mut self, reset: bool) -> Self {
        self.reset_on_init = reset;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  LocalStore
// ═══════════════════════════════════════════════════════════════════════

struct LocalState {
    db: Option<Database>,
    /// Cleared once the configured reset has happened.
    reset_pending: bool,
}

/// [`Storage`] on an embedded SQLite database.
pub struct LocalStore {
    config: LocalStoreConfig,
    state: Mutex<LocalState>,
}

impl LocalStore {
    /// Create a store.  Nothing is opened until first use.
    pub fn new(config: LocalStoreConfig) -> Self {
        let reset_pending = config.reset_on_init && config.path.is_some();
        Self {
            config,
            state: Mutex::new(LocalState {
                db: None,
                reset_pending,
            }),
        }
    }

    pub fn config(&self) -> &LocalStoreConfig {
        &self.config
    }

    /// Whether a database handle is currently open.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.db.is_some()
    }

    /// The shared handle, opening the database on first use.
    async fn handle(&self) -> StorageResult<Database> {
        let mut state = self.state.lock().await;
        if let Some(db) = &state.db {
            return Ok(db.clone());
        }
        self.open(&mut state).await
    }

    /// Replace `stale` with a freshly opened handle.  If another task has
    /// already replaced it, that handle is returned instead.
    async fn reinitialize(&self, stale: &Database) -> StorageResult<Database> {
        let mut state = self.state.lock().await;
        if let Some(db) = &state.db
            && !db.same_handle(stale)
        {
            return Ok(db.clone());
        }
        state.db = None;
        self.open(&mut state).await
    }

    async fn open(&self, state: &mut LocalState) -> StorageResult<Database> {
        let path = self.config.path.clone();
        let reset = state.reset_pending;

        let db = tokio::task::spawn_blocking(move || match &path {
            Some(path) => {
                if reset {
                    Database::destroy(path)?;
                }
                Database::open(path)
            }
            None => Database::open_in_memory(),
        })
        .await??;

        db.prepare_schema().await?;

        state.reset_pending = false;
        state.db = Some(db.clone());
        info!(
            path = ?self.config.path,
            reset,
            "local store initialized"
        );
        Ok(db)
    }

    /// Run `op` on the shared connection, reopening and retrying exactly
    /// once if the handle turns out to be unusable.
    async fn run<F, T>(&self, op: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Clone + Send + 'static,
        T: Send + 'static,
    {
        let db = self.handle().await?;
        match db.execute_mut(op.clone()).await {
            Err(err) if err.is_connectivity() => {
                warn!(%err, "database handle failed, re-initializing");
                let db = self.reinitialize(&db).await?;
                db.execute_mut(op).await
            }
            other => other,
        }
    }

    #[cfg(test)]
    async fn swap_handle(&self, db: Database) {
        self.state.lock().await.db = Some(db);
    }
}

#[async_trait]
impl Storage for LocalStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn initialize(&self) -> StorageResult<()> {
        self.handle().await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> StorageResult<()> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM user_technologies", [])?;
            tx.execute("DELETE FROM users", [])?;
            tx.commit()?;
            Ok(())
        })
        .await?;
        info!("local store cleared");
        Ok(())
    }

    #[instrument(skip(self, user), fields(email = %user.email))]
    async fn create_user(&self, user: NewUser) -> StorageResult<User> {
        let user = User::from_new(Uuid::now_v7().to_string(), user, now_millis());
        let profile = serde_json::to_string(&user.profile)?;

        let record = user.clone();
        self.run(move |conn| {
            conn.execute(
                "INSERT INTO users (id, email, password, display_name, role, email_verified, profile, created_at, last_login_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    record.id,
                    record.email,
                    record.password,
                    record.display_name,
                    record.role,
                    record.email_verified,
                    profile,
                    record.created_at.timestamp_millis(),
                    record.last_login_at.timestamp_millis(),
                ],
            )
            .map_err(|e| email_conflict(e, &record.email))?;
            Ok(())
        })
        .await?;

        debug!(user_id = %user.id, "user created");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>> {
        let id = id.to_string();
        self.run(move |conn| select_user(conn, "id", &id)).await
    }

    #[instrument(skip(self))]
    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>> {
        let email = email.to_string();
        self.run(move |conn| select_user(conn, "email", &email)).await
    }

    #[instrument(skip(self, patch))]
    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User> {
        let id = id.to_string();
        let user = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let mut user = select_user(&tx, "id", &id)?
                    .ok_or_else(|| StorageError::user_not_found(id.as_str()))?;

                user.apply(patch);
                user.last_login_at = truncate_millis(user.last_login_at);
                let profile = serde_json::to_string(&user.profile)?;

                tx.execute(
                    "UPDATE users SET email = ?2, password = ?3, display_name = ?4, role = ?5, \
                     email_verified = ?6, profile = ?7, last_login_at = ?8 WHERE id = ?1",
                    rusqlite::params![
                        user.id,
                        user.email,
                        user.password,
                        user.display_name,
                        user.role,
                        user.email_verified,
                        profile,
                        user.last_login_at.timestamp_millis(),
                    ],
                )
                .map_err(|e| email_conflict(e, &user.email))?;
                tx.commit()?;
                Ok(user)
            })
            .await?;

        debug!(user_id = %user.id, "user updated");
        Ok(user)
    }

    #[instrument(skip(self))]
    async fn delete_user(&self, id: &str) -> StorageResult<()> {
        let id = id.to_string();
        let removed = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [&id])?;
                if deleted == 0 {
                    return Err(StorageError::user_not_found(id.as_str()));
                }
                let removed =
                    tx.execute("DELETE FROM user_technologies WHERE user_id = ?1", [&id])?;
                tx.commit()?;
                Ok(removed)
            })
            .await?;

        debug!(technologies = removed, "user deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn add_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let user_id = user_id.to_string();
        let technology = technology.to_string();
        let inserted = self
            .run(move |conn| {
                let tx = conn.transaction()?;
                if !user_exists(&tx, &user_id)? {
                    return Err(StorageError::user_not_found(user_id.as_str()));
                }
                let inserted = tx.execute(
                    "INSERT OR IGNORE INTO user_technologies (user_id, technology) VALUES (?1, ?2)",
                    [&user_id, &technology],
                )?;
                tx.commit()?;
                Ok(inserted)
            })
            .await?;

        if inserted == 0 {
            debug!("technology already present");
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_technology(&self, user_id: &str, technology: &str) -> StorageResult<()> {
        let user_id = user_id.to_string();
        let technology = technology.to_string();
        self.run(move |conn| {
            conn.execute(
                "DELETE FROM user_technologies WHERE user_id = ?1 AND technology = ?2",
                [&user_id, &technology],
            )?;
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn get_user_technologies(&self, user_id: &str) -> StorageResult<Vec<String>> {
        let user_id = user_id.to_string();
        self.run(move |conn| select_technologies(conn, &user_id))
            .await
    }

    #[instrument(skip(self))]
    async fn get_all_users(&self) -> StorageResult<Vec<User>> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let users = select_all_users(&tx)?;
            tx.commit()?;
            Ok(users)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn debug_database(&self) -> StorageResult<DebugDump> {
        self.run(|conn| {
            let tx = conn.transaction()?;
            let users = select_all_users(&tx)?;
            let technologies = select_technology_rows(&tx)?;
            tx.commit()?;
            Ok(DebugDump {
                users,
                technologies,
            })
        })
        .await
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Queries
// ═══════════════════════════════════════════════════════════════════════

const USER_COLUMNS: &str =
    "id, email, password, display_name, role, email_verified, profile, created_at, last_login_at";

/// Fetch one user by a unique column, with technologies assembled.
fn select_user(conn: &Connection, column: &str, value: &str) -> StorageResult<Option<User>> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1");
    let row = conn
        .query_row(&sql, [value], UserRow::from_row)
        .optional()?;

    match row {
        Some(row) => {
            let technologies = select_technologies(conn, &row.id)?;
            row.into_user(technologies).map(Some)
        }
        None => Ok(None),
    }
}

fn select_all_users(conn: &Connection) -> StorageResult<Vec<User>> {
    let mut by_user: HashMap<String, Vec<String>> = HashMap::new();
    for row in select_technology_rows(conn)? {
        by_user.entry(row.user_id).or_default().push(row.technology);
    }

    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM users ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt
        .query_map([], UserRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|row| {
            let technologies = by_user.remove(&row.id).unwrap_or_default();
            row.into_user(technologies)
        })
        .collect()
}

/// Technologies of one user, in insertion order.
fn select_technologies(conn: &Connection, user_id: &str) -> StorageResult<Vec<String>> {
    let mut stmt = conn.prepare_cached(
        "SELECT technology FROM user_technologies WHERE user_id = ?1 ORDER BY rowid",
    )?;
    let technologies = stmt
        .query_map([user_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(technologies)
}

fn select_technology_rows(conn: &Connection) -> StorageResult<Vec<TechnologyRow>> {
    let mut stmt =
        conn.prepare("SELECT user_id, technology FROM user_technologies ORDER BY rowid")?;
    let rows = stmt
        .query_map([], |row| {
            Ok(TechnologyRow {
                user_id: row.get(0)?,
                technology: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn user_exists(conn: &Connection, id: &str) -> StorageResult<bool> {
    let exists = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists)
}

/// Name the offending email when the unique index rejects a write.
fn email_conflict(err: rusqlite::Error, email: &str) -> StorageError {
    match StorageError::from(err) {
        StorageError::Conflict(_) => {
            StorageError::Conflict(format!("email already registered: {email}"))
        }
        other => other,
    }
}

/// SQLite keeps millisecond precision; trim before handing records out so
/// what `create_user` returns equals what a later read returns.
fn now_millis() -> DateTime<Utc> {
    truncate_millis(Utc::now())
}

fn truncate_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

fn from_millis(ms: i64) -> StorageResult<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| StorageError::Unknown(format!("timestamp out of range: {ms}")))
}

// ═══════════════════════════════════════════════════════════════════════
//  Internal row mapping
// ═══════════════════════════════════════════════════════════════════════

/// Raw row data from SQLite before the profile JSON is parsed.
struct UserRow {
    id: String,
    email: String,
    password: String,
    display_name: String,
    role: String,
    email_verified: bool,
    profile: String,
    created_at: i64,
    last_login_at: i64,
}

impl UserRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            password: row.get(2)?,
            display_name: row.get(3)?,
            role: row.get(4)?,
            email_verified: row.get(5)?,
            profile: row.get(6)?,
            created_at: row.get(7)?,
            last_login_at: row.get(8)?,
        })
    }

    fn into_user(self, technologies: Vec<String>) -> StorageResult<User> {
        let profile: UserProfile = serde_json::from_str(&self.profile)?;
        Ok(User {
            id: self.id,
            email: self.email,
            password: self.password,
            display_name: self.display_name,
            role: self.role,
            email_verified: self.email_verified,
            profile,
            technologies,
            created_at: from_millis(self.created_at)?,
            last_login_at: from_millis(self.last_login_at)?,
        })
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conformance;

    fn memory_store() -> LocalStore {
        LocalStore::new(LocalStoreConfig::in_memory())
    }

    #[tokio::test]
    async fn contract_suite_passes() {
        let store = memory_store();
        store.initialize().await.unwrap();
        conformance::run_all(&store).await;
    }

    #[tokio::test]
    async fn operations_initialize_lazily() {
        let store = memory_store();
        assert!(!store.is_initialized().await);

        let users = store.get_all_users().await.unwrap();
        assert!(users.is_empty());
        assert!(store.is_initialized().await);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let store = memory_store();
        store.initialize().await.unwrap();
        let user = store
            .create_user(conformance::sample_user("idem@x.com", "Idem"))
            .await
            .unwrap();

        store.initialize().await.unwrap();
        assert!(store.get_user_by_id(&user.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_empties_both_tables() {
        let store = memory_store();
        let user = store
            .create_user(conformance::sample_user("clear@x.com", "Clear"))
            .await
            .unwrap();
        store.add_technology(&user.id, "Rust").await.unwrap();

        store.clear().await.unwrap();

        let dump = store.debug_database().await.unwrap();
        assert!(dump.users.is_empty());
        assert!(dump.technologies.is_empty());
    }

    #[tokio::test]
    async fn update_does_not_touch_technologies() {
        let store = memory_store();
        let user = store
            .create_user(conformance::sample_user("tech@x.com", "Tech"))
            .await
            .unwrap();
        store.add_technology(&user.id, "Go").await.unwrap();

        let updated = store
            .update_user(
                &user.id,
                UserPatch {
                    profile: UserProfile {
                        bio: Some("now with bio".into()),
                        ..Default::default()
                    },
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.technologies, vec!["Go".to_string()]);
        assert_eq!(updated.profile.bio.as_deref(), Some("now with bio"));
        assert_eq!(updated.created_at, user.created_at);
    }

    #[tokio::test]
    async fn update_to_taken_email_conflicts() {
        let store = memory_store();
        store
            .create_user(conformance::sample_user("first@x.com", "First"))
            .await
            .unwrap();
        let second = store
            .create_user(conformance::sample_user("second@x.com", "Second"))
            .await
            .unwrap();

        let err = store
            .update_user(
                &second.id,
                UserPatch {
                    email: Some("first@x.com".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        match err {
            StorageError::Conflict(msg) => assert!(msg.contains("first@x.com"), "got: {msg}"),
            other => panic!("expected Conflict, got: {other}"),
        }
    }

    #[tokio::test]
    async fn add_technology_for_missing_user_is_not_found() {
        let store = memory_store();
        let err = store.add_technology("ghost", "Rust").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound { entity: "user", .. }));
    }

    #[tokio::test]
    async fn ids_are_unique_under_rapid_creation() {
        let store = memory_store();
        let mut ids = std::collections::HashSet::new();
        for i in 0..50 {
            let user = store
                .create_user(conformance::sample_user(&format!("rapid{i}@x.com"), "R"))
                .await
                .unwrap();
            assert!(ids.insert(user.id));
        }
    }

    #[tokio::test]
    async fn broken_handle_is_reopened_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalStore::new(LocalStoreConfig::at(dir.path().join("store.db")));
        let user = store
            .create_user(conformance::sample_user("retry@x.com", "Retry"))
            .await
            .unwrap();

        // A handle on a database without our tables: every query fails with
        // "no such table".
        store
            .swap_handle(Database::open_in_memory().unwrap())
            .await;

        let fetched = store.get_user_by_id(&user.id).await.unwrap();
        assert_eq!(fetched.map(|u| u.email), Some("retry@x.com".to_string()));
    }

    #[tokio::test]
    async fn debug_dump_includes_relation_rows() {
        let store = memory_store();
        let user = store
            .create_user(conformance::sample_user("dump@x.com", "Dump"))
            .await
            .unwrap();
        store.add_technology(&user.id, "Rust").await.unwrap();
        store.add_technology(&user.id, "Go").await.unwrap();

        let dump = store.debug_database().await.unwrap();
        assert_eq!(dump.users.len(), 1);
        assert_eq!(dump.users[0].technologies, vec!["Rust", "Go"]);
        assert_eq!(
            dump.technologies,
            vec![
                TechnologyRow {
                    user_id: user.id.clone(),
                    technology: "Rust".into()
                },
                TechnologyRow {
                    user_id: user.id,
                    technology: "Go".into()
                },
            ]
        );
    }
}
