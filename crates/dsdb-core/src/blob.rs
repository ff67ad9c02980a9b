//! # Blob Stores
//!
//! Content-addressed storage for opaque payloads. The address of a blob is
//! the BLAKE3 hash of its bytes, so `get_or_create` is idempotent.
//!
//! - `MemoryBlobStore`: process-local map, used by in-memory catalogs
//! - `FsBlobStore`: one file per blob under an explicitly configured root

use crate::store::store_err;
use crate::{ContentAddress, DsdbError};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error};

/// Content-addressed get-or-create storage.
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    /// Store `bytes` if absent and return their address.
    fn get_or_create(&self, bytes: &[u8]) -> Result<ContentAddress, DsdbError>;

    /// The bytes stored under `address`, if any.
    fn read(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, DsdbError>;

    fn contains(&self, address: &ContentAddress) -> Result<bool, DsdbError> {
        Ok(self.read(address)?.is_some())
    }

    /// Filesystem path of a stored blob, for stores that keep one file per blob.
    fn locate(&self, _address: &ContentAddress) -> Option<PathBuf> {
        None
    }
}

// =============================================================================
// IN-MEMORY
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<BTreeMap<ContentAddress, Vec<u8>>>,
}

impl MemoryBlobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get_or_create(&self, bytes: &[u8]) -> Result<ContentAddress, DsdbError> {
        let address = ContentAddress::of(bytes);
        self.blobs
            .write()
            .entry(address)
            .or_insert_with(|| bytes.to_vec());
        Ok(address)
    }

    fn read(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, DsdbError> {
        Ok(self.blobs.read().get(address).cloned())
    }

    fn contains(&self, address: &ContentAddress) -> Result<bool, DsdbError> {
        Ok(self.blobs.read().contains_key(address))
    }
}

// =============================================================================
// FILESYSTEM
// =============================================================================

/// Location of a filesystem blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobStoreConfig {
    pub root: PathBuf,
}

impl BlobStoreConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

/// Blobs as files `<root>/<first two hex chars>/<full hex>`.
#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl FsBlobStore {
    /// Open a store, creating its root directory.
    pub fn new(config: BlobStoreConfig) -> Result<Self, DsdbError> {
        fs::create_dir_all(&config.root).map_err(store_err)?;
        Ok(Self {
            root: config.root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, address: &ContentAddress) -> PathBuf {
        let hex = address.to_hex();
        self.root.join(&hex[..2]).join(hex)
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), DsdbError> {
        let Some(parent) = path.parent() else {
            return Err(DsdbError::StoreUnavailable(format!(
                "blob path {} has no parent",
                path.display()
            )));
        };
        fs::create_dir_all(parent).map_err(store_err)?;

        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp_path = parent.join(format!(".tmp-{}-{n}", std::process::id()));
        {
            let mut file = File::create(&tmp_path).map_err(store_err)?;
            file.write_all(bytes).map_err(store_err)?;
            file.sync_all().map_err(store_err)?;
        }
        fs::rename(&tmp_path, path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            store_err(e)
        })
    }
}

impl BlobStore for FsBlobStore {
    fn get_or_create(&self, bytes: &[u8]) -> Result<ContentAddress, DsdbError> {
        let address = ContentAddress::of(bytes);
        let path = self.blob_path(&address);
        if path.exists() {
            debug!(address = %address, "blob already stored");
            return Ok(address);
        }
        self.write_atomic(&path, bytes)?;
        debug!(address = %address, size = bytes.len(), "wrote blob");
        Ok(address)
    }

    fn read(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, DsdbError> {
        let path = self.blob_path(address);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(store_err(e)),
        };
        let actual = ContentAddress::of(&bytes);
        if actual != *address {
            error!(expected = %address, actual = %actual, "blob content mismatch");
            return Err(DsdbError::StoreUnavailable(format!(
                "blob {address} is corrupt (content hashes to {actual})"
            )));
        }
        Ok(Some(bytes))
    }

    fn contains(&self, address: &ContentAddress) -> Result<bool, DsdbError> {
        Ok(self.blob_path(address).exists())
    }

    fn locate(&self, address: &ContentAddress) -> Option<PathBuf> {
        Some(self.blob_path(address))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn memory_get_or_create_is_idempotent() {
        let store = MemoryBlobStore::new();
        let a = store.get_or_create(b"payload").unwrap();
        let b = store.get_or_create(b"payload").unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
        assert_eq!(store.read(&a).unwrap().unwrap(), b"payload");
    }

    #[test]
    fn memory_unknown_address() {
        let store = MemoryBlobStore::new();
        let address = ContentAddress::of(b"nothing");
        assert!(store.read(&address).unwrap().is_none());
        assert!(!store.contains(&address).unwrap());
    }

    #[test]
    fn fs_roundtrip_and_sharding() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(BlobStoreConfig::new(dir.path())).unwrap();
        let address = store.get_or_create(b"weights").unwrap();
        let hex = address.to_hex();
        assert!(dir.path().join(&hex[..2]).join(&hex).is_file());
        assert_eq!(store.get_or_create(b"weights").unwrap(), address);
        assert_eq!(store.read(&address).unwrap().unwrap(), b"weights");
        assert!(store.contains(&address).unwrap());
    }

    #[test]
    fn only_fs_store_locates_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let fs_store = FsBlobStore::new(BlobStoreConfig::new(dir.path())).unwrap();
        let address = fs_store.get_or_create(b"scan").unwrap();
        let path = fs_store.locate(&address).unwrap();
        assert_eq!(fs::read(path).unwrap(), b"scan");

        let memory = MemoryBlobStore::new();
        let address = memory.get_or_create(b"scan").unwrap();
        assert!(memory.locate(&address).is_none());
    }

    #[test]
    fn fs_detects_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(BlobStoreConfig::new(dir.path())).unwrap();
        let address = store.get_or_create(b"original").unwrap();
        let hex = address.to_hex();
        fs::write(dir.path().join(&hex[..2]).join(&hex), b"tampered").unwrap();
        assert!(matches!(
            store.read(&address),
            Err(DsdbError::StoreUnavailable(_))
        ));
    }

    #[test]
    fn fs_missing_blob_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(BlobStoreConfig::new(dir.path().join("nested"))).unwrap();
        assert!(store.read(&ContentAddress::of(b"x")).unwrap().is_none());
    }
}
