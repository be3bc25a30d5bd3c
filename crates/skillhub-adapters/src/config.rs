//! Storage configuration.
//!
//! Settings come from the `[storage]` table of a TOML file, then
//! `SKILLHUB_*` environment variables override individual keys:
//!
//! ```toml
//! [storage]
//! backend = "indexeddb"          # or "firebase", "backend"
//!
//! [storage.local]
//! path = "data/skillhub.db"
//! reset_on_init = false
//!
//! [storage.document]
//! uri = "mongodb://localhost:27017"
//! database = "skillhub"
//!
//! [storage.api]
//! base_url = "http://localhost:3000/api"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

use skillhub_store::{BackendKind, LocalStoreConfig};

use crate::api::ApiStoreConfig;
use crate::document::DocumentStoreConfig;

/// Default location of the configuration file, relative to the working
/// directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Value of `SKILLHUB_LOCAL_DB_PATH` that selects an in-memory database.
const IN_MEMORY: &str = ":memory:";

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file exists but could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The file is not valid TOML or has the wrong shape.
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override could not be interpreted.
    #[error("invalid value for {key}: `{value}`")]
    Invalid { key: &'static str, value: String },
}

/// Everything needed to build any backend.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The backend to activate on startup.
    #[serde(deserialize_with = "backend_tag")]
    pub backend: BackendKind,
    pub local: LocalStoreConfig,
    pub document: DocumentStoreConfig,
    pub api: ApiStoreConfig,
}

/// Accept any tag; unknown ones resolve to the local store.
fn backend_tag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BackendKind, D::Error> {
    let tag = String::deserialize(deserializer)?;
    Ok(BackendKind::from_tag(&tag))
}

impl StorageConfig {
    /// Load `path` (a missing file means defaults) and apply environment
    /// overrides from the process environment.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load `path` without consulting the environment.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "loading storage configuration");
                Self::from_toml_str(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Parse the `[storage]` table out of a TOML document.  A document
    /// without one yields defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let table: toml::Table = content.parse()?;
        match table.get("storage") {
            Some(storage) => Ok(storage.clone().try_into()?),
            None => Ok(Self::default()),
        }
    }

    /// Override fields from `SKILLHUB_*` variables resolved through
    /// `lookup`.  Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(tag) = get("SKILLHUB_STORAGE_BACKEND") {
            self.backend = BackendKind::from_tag(&tag);
        }
        if let Some(path) = get("SKILLHUB_LOCAL_DB_PATH") {
            self.local.path = if path == IN_MEMORY {
                None
            } else {
                Some(PathBuf::from(path))
            };
        }
        if let Some(flag) = get("SKILLHUB_LOCAL_RESET_ON_INIT") {
            self.local.reset_on_init = parse_bool("SKILLHUB_LOCAL_RESET_ON_INIT", &flag)?;
        }
        if let Some(uri) = get("SKILLHUB_MONGODB_URI") {
            self.document.uri = uri;
        }
        if let Some(database) = get("SKILLHUB_MONGODB_DATABASE") {
            self.document.database = database;
        }
        if let Some(base_url) = get("SKILLHUB_API_URL") {
            self.api.base_url = base_url;
        }

        if self.local.reset_on_init {
            warn!("local store will be wiped on first initialization");
        }
        Ok(())
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
        }),
    }
}

// ── tests ────────────────────────────────────────────────────────────
