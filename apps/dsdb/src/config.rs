//! # Configuration
//!
//! Resolution of the catalog configuration for one CLI invocation.
//!
//! Sources, later ones winning:
//!
//! 1. Built-in defaults (`dsdb.redb` next to the working directory)
//! 2. TOML file: `--config`, or `dsdb.toml` when present
//! 3. Environment: `DSDB_PROCESS_LIMIT`, `DSDB_USER`
//! 4. Command-line flags: `--database`, `--blobs`
//!
//! ```toml
//! [catalog]
//! database = "catalog.redb"
//! parallelism = 4
//! user = "alice"
//!
//! [catalog.blobs]
//! root = "blobs"
//! ```
//!
//! Relative paths in the file are resolved against the file's directory.

use dsdb_core::{BlobStoreConfig, CatalogConfig, DsdbError};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "dsdb.toml";

/// Database used when neither the file nor the flags name one.
pub const DEFAULT_DATABASE: &str = "dsdb.redb";

/// Worker thread limit for deconstruction.
pub const ENV_PROCESS_LIMIT: &str = "DSDB_PROCESS_LIMIT";

/// User recorded on runs.
pub const ENV_USER: &str = "DSDB_USER";

/// On-disk layout of `dsdb.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub catalog: CatalogConfig,
}

impl FileConfig {
    /// Parse a config file's text.
    pub fn parse(text: &str) -> Result<Self, DsdbError> {
        toml::from_str(text)
            .map_err(|e| DsdbError::SerializationError(format!("Invalid config: {e}")))
    }

    /// Read and parse a config file, resolving relative paths against its directory.
    pub fn load(path: &Path) -> Result<Self, DsdbError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            DsdbError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let mut config = Self::parse(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        if let Some(database) = self.catalog.database.take() {
            self.catalog.database = Some(base.join(database));
        }
        if let Some(blobs) = self.catalog.blobs.take() {
            self.catalog.blobs = Some(BlobStoreConfig::new(base.join(blobs.root)));
        }
    }
}

/// Command-line overrides.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config: Option<PathBuf>,
    pub database: Option<PathBuf>,
    pub blobs: Option<PathBuf>,
}

/// Build the effective configuration.
///
/// `env` looks up an environment variable; `main` passes `std::env::var`,
/// tests pass a closure over fixed values.
pub fn resolve<E>(overrides: &Overrides, env: E) -> Result<CatalogConfig, DsdbError>
where
    E: Fn(&str) -> Option<String>,
{
    let mut config = match &overrides.config {
        Some(path) => FileConfig::load(path)?.catalog,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if default.is_file() {
                FileConfig::load(default)?.catalog
            } else {
                CatalogConfig::default()
            }
        }
    };

    if let Some(raw) = env(ENV_PROCESS_LIMIT) {
        let limit = raw.trim().parse::<usize>().map_err(|_| {
            DsdbError::InvalidObject(format!(
                "{ENV_PROCESS_LIMIT} must be a non-negative integer, got '{raw}'"
            ))
        })?;
        config.parallelism = Some(limit);
    }
    if let Some(user) = env(ENV_USER)
        && !user.trim().is_empty()
    {
        config.user = Some(user);
    }

    if let Some(database) = &overrides.database {
        config.database = Some(database.clone());
    }
    if let Some(blobs) = &overrides.blobs {
        config.blobs = Some(BlobStoreConfig::new(blobs.clone()));
    }
    if config.database.is_none() {
        config.database = Some(PathBuf::from(DEFAULT_DATABASE));
    }

    tracing::debug!(
        database = ?config.database,
        blobs = ?config.blob_config().map(|b| b.root),
        parallelism = ?config.parallelism,
        "configuration resolved"
    );
    Ok(config)
}
