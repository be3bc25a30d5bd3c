//! # skillhub-adapters
//!
//! Remote [`Storage`] backends and the selector that picks between them:
//!
//! - [`DocumentStore`]: MongoDB `users` collection.
//! - [`ApiStore`]: a REST service reached over `reqwest`.
//! - [`StorageSelector`]: activates the configured backend and falls back to
//!   the embedded [`LocalStore`](skillhub_store::LocalStore) when a remote
//!   one cannot be reached.
//!
//! Configuration for all of them lives in [`StorageConfig`].

pub mod api;
pub mod config;
pub mod document;
pub mod selector;

// ── re-exports ───────────────────────────────────────────────────────

pub use api::{ApiStore, ApiStoreConfig};
pub use config::{ConfigError, StorageConfig};
pub use document::{DocumentStore, DocumentStoreConfig};
pub use selector::StorageSelector;

pub use skillhub_store::{BackendKind, Storage, StorageError, StorageResult};
