//! # skillhub-store
//!
//! User storage for SkillHub: the backend-agnostic [`Storage`] contract, its
//! entity model and error taxonomy, and the embedded [`LocalStore`] backend.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Storage trait (+ StorageError)         │
//! ├──────────────┬──────────────┬───────────┤
//! │  LocalStore  │ DocumentStore│  ApiStore │
//! │  (this crate)│  (adapters)  │ (adapters)│
//! ├──────────────┴──────────────┴───────────┤
//! │  Database (rusqlite WAL, one handle)    │
//! │  Migrations (versioned, transactional)  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use skillhub_store::{LocalStore, LocalStoreConfig, Storage};
//!
//! let store = LocalStore::new(LocalStoreConfig::at("data/skillhub.db"));
//! store.initialize().await?;
//! let user = store.create_user(new_user).await?;
//! store.add_technology(&user.id, "Rust").await?;
//! ```

pub mod db;
pub mod error;
pub mod local;
pub mod migration;
pub mod model;
pub mod traits;

#[cfg(any(test, feature = "conformance"))]
pub mod conformance;

// ── re-exports ───────────────────────────────────────────────────────

pub use db::Database;
pub use error::{StorageError, StorageResult};
pub use local::{LocalStore, LocalStoreConfig};
pub use model::{DebugDump, NewUser, TechnologyRow, User, UserPatch, UserProfile};
pub use traits::{BackendKind, Storage};
