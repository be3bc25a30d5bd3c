//! The storage capability contract.
//!
//! Every backend (embedded SQLite, document database, REST API) implements
//! [`Storage`], so callers holding an `Arc<dyn Storage>` never need to know
//! which one is active.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StorageResult;
use crate::model::{DebugDump, NewUser, User, UserPatch};

// ---------------------------------------------------------------------------
// Backend selection
// ---------------------------------------------------------------------------

/// Which backend a [`Storage`] instance talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BackendKind {
    /// Embedded transactional store.
    #[default]
    #[serde(rename = "indexeddb", alias = "local", alias = "sqlite")]
    Local,
    /// Remote document database.
    #[serde(rename = "firebase", alias = "document", alias = "mongodb")]
    Document,
    /// Remote REST API.
    #[serde(rename = "backend", alias = "api")]
    Api,
}

impl BackendKind {
    /// The canonical selection tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "indexeddb",
            Self::Document => "firebase",
            Self::Api => "backend",
        }
    }

    /// Resolve a selection tag.  Unrecognized tags resolve to
    /// [`BackendKind::Local`].
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "indexeddb" | "local" | "sqlite" => Self::Local,
            "firebase" | "document" | "mongodb" => Self::Document,
            "backend" | "api" => Self::Api,
            other => {
                warn!(tag = other, "unrecognized storage backend, using local store");
                Self::Local
            }
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Core trait
// ---------------------------------------------------------------------------

/// The storage interface shared by all backends.
///
/// Not-found is a normal result for lookups (`Ok(None)`) but an error for
/// operations that require the user to exist.
#[async_trait]
pub trait Storage: Send + Sync {
    /// The backend this instance talks to.
    fn backend(&self) -> BackendKind;

    /// Prepare the backend for use.  Idempotent.
    async fn initialize(&self) -> StorageResult<()>;

    /// Destructively remove every record.
    async fn clear(&self) -> StorageResult<()>;

    /// Persist a new user and return the stored record.
    async fn create_user(&self, user: NewUser) -> StorageResult<User>;

    async fn get_user_by_id(&self, id: &str) -> StorageResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> StorageResult<Option<User>>;

    /// Merge `patch` into the stored user and return the result.
    async fn update_user(&self, id: &str, patch: UserPatch) -> StorageResult<User>;

    /// Remove a user together with all of its technology rows.
    async fn delete_user(&self, id: &str) -> StorageResult<()>;

    async fn add_technology(&self, user_id: &str, technology: &str) -> StorageResult<()>;

    async fn remove_technology(&self, user_id: &str, technology: &str) -> StorageResult<()>;

    /// Technologies of a user; empty when the user does not exist.
    async fn get_user_technologies(&self, user_id: &str) -> StorageResult<Vec<String>>;

    async fn get_all_users(&self) -> StorageResult<Vec<User>>;

    /// Full dump of users and relation rows, for developer tooling.
    async fn debug_database(&self) -> StorageResult<DebugDump>;
}
