//! Backend selection.
//!
//! [`StorageSelector`] owns the configuration, the shared local store and
//! the currently active backend.  Callers take an `Arc<dyn Storage>` from
//! it per operation; switching backends never disturbs a call that already
//! holds the previous one.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{info, instrument, warn};

use skillhub_store::{BackendKind, LocalStore, Storage, StorageResult};

use crate::api::ApiStore;
use crate::config::StorageConfig;
use crate::document::DocumentStore;

/// Chooses, initializes and hands out the active storage backend.
pub struct StorageSelector {
    config: StorageConfig,
    local: Arc<LocalStore>,
    active: RwLock<Arc<dyn Storage>>,
}

impl StorageSelector {
    /// Create a selector whose active backend is the (not yet opened)
    /// local store.
    pub fn new(config: StorageConfig) -> Self {
        let local = Arc::new(LocalStore::new(config.local.clone()));
        let active: Arc<dyn Storage> = local.clone();
        Self {
            config,
            local,
            active: RwLock::new(active),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// The shared local store, also used as the fallback.
    pub fn local_store(&self) -> Arc<LocalStore> {
        Arc::clone(&self.local)
    }

    /// Initialize and activate the backend named in the configuration.
    pub async fn initialize_configured(&self) -> StorageResult<Arc<dyn Storage>> {
        self.initialize_storage(self.config.backend).await
    }

    /// Build, initialize and activate `kind`.
    ///
    /// If a remote backend fails to come up, the local store is activated
    /// in its place and returned.  A failure of the local store itself is
    /// returned to the caller.
    #[instrument(skip(self))]
    pub async fn initialize_storage(&self, kind: BackendKind) -> StorageResult<Arc<dyn Storage>> {
        match self.build(kind).await {
            Ok(storage) => {
                self.activate(Arc::clone(&storage));
                info!(backend = %kind, "storage backend active");
                Ok(storage)
            }
            Err(err) if kind != BackendKind::Local => {
                warn!(
                    requested = %kind,
                    %err,
                    "storage backend unavailable, falling back to local store"
                );
                let local: Arc<dyn Storage> = self.local_store();
                local.initialize().await?;
                self.activate(Arc::clone(&local));
                info!(backend = %BackendKind::Local, "storage backend active");
                Ok(local)
            }
            Err(err) => Err(err),
        }
    }

    /// The active backend.  Before any `initialize_storage` call this is
    /// the local store, which opens itself on first use.
    pub fn current_storage(&self) -> Arc<dyn Storage> {
        let active = self.active.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*active)
    }

    /// Which backend [`current_storage`](Self::current_storage) returns.
    pub fn active_backend(&self) -> BackendKind {
        self.current_storage().backend()
    }

    async fn build(&self, kind: BackendKind) -> StorageResult<Arc<dyn Storage>> {
        let storage: Arc<dyn Storage> = match kind {
            BackendKind::Local => self.local_store(),
            BackendKind::Document => Arc::new(DocumentStore::connect(&self.config.document).await?),
            BackendKind::Api => Arc::new(ApiStore::new(&self.config.api)?),
        };
        storage.initialize().await?;
        Ok(storage)
    }

    fn activate(&self, storage: Arc<dyn Storage>) {
        let mut active = self.active.write().unwrap_or_else(PoisonError::into_inner);
        *active = storage;
    }
}

// ── tests ────────────────────────────────────────────────────────────
