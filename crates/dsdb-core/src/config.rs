//! # Catalog Configuration
//!
//! Everything a `Catalog` needs at construction. There is no process-wide
//! state: the blob store location in particular is passed in here.

use crate::blob::BlobStoreConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// User recorded on runs when none is configured.
pub const DEFAULT_USER: &str = "dsdb";

/// Construction parameters of a `Catalog`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CatalogConfig {
    /// redb database file. `None` keeps the catalog in memory.
    pub database: Option<PathBuf>,
    /// Blob store root. Defaults to `<database>.blobs` next to the database.
    pub blobs: Option<BlobStoreConfig>,
    /// Worker threads for table decomposition. `None` uses rayon's global pool.
    pub parallelism: Option<usize>,
    /// User recorded on runs.
    pub user: Option<String>,
}

impl CatalogConfig {
    /// An in-memory catalog.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A persistent catalog at `database`.
    pub fn persistent(database: impl Into<PathBuf>) -> Self {
        Self {
            database: Some(database.into()),
            ..Self::default()
        }
    }

    /// The blob store to use, if the catalog is file-backed.
    #[must_use]
    pub fn blob_config(&self) -> Option<BlobStoreConfig> {
        if let Some(blobs) = &self.blobs {
            return Some(blobs.clone());
        }
        self.database.as_ref().map(|db| {
            let mut root = db.clone().into_os_string();
            root.push(".blobs");
            BlobStoreConfig::new(root)
        })
    }

    #[must_use]
    pub fn user_name(&self) -> &str {
        self.user
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or(DEFAULT_USER)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_has_no_blob_dir() {
        assert!(CatalogConfig::in_memory().blob_config().is_none());
    }

    #[test]
    fn blobs_default_next_to_database() {
        let config = CatalogConfig::persistent("/data/catalog.redb");
        assert_eq!(
            config.blob_config().unwrap().root,
            PathBuf::from("/data/catalog.redb.blobs")
        );
    }

    #[test]
    fn explicit_blob_root_wins() {
        let config = CatalogConfig {
            blobs: Some(BlobStoreConfig::new("/blobs")),
            ..CatalogConfig::persistent("/data/catalog.redb")
        };
        assert_eq!(config.blob_config().unwrap().root, PathBuf::from("/blobs"));
    }

    #[test]
    fn blank_user_falls_back() {
        let config = CatalogConfig {
            user: Some(" ".to_string()),
            ..CatalogConfig::default()
        };
        assert_eq!(config.user_name(), DEFAULT_USER);
    }
}
