//! # Catalog Primitives
//!
//! Fixed constants of the dsdb engine. Changing any of the hash domains or
//! format versions changes every content identity in existing catalogs.

use uuid::Uuid;

/// Key of the single atomic unit produced for an opaque object.
pub const OPAQUE_KEY: &str = "obj";

/// Format version prefixed to every encoded `Value`.
pub const VALUE_FORMAT_VERSION: u8 = 1;

/// Format version prefixed to every stored record.
pub const RECORD_FORMAT_VERSION: u8 = 1;

/// Format version prefixed to a whole object kept in the blob store.
pub const OBJECT_FORMAT_VERSION: u8 = 1;

/// Type name of opaque objects ingested from raw blob bytes.
pub const BLOB_TYPE_NAME: &str = "blob";

// =============================================================================
// HASH DOMAINS
// =============================================================================

/// Domain tag for atomic unit index digests.
pub const IOTA_DOMAIN: &[u8] = b"dsdb.iota.v1";

/// Domain tag for group content hashes.
pub const GROUP_DOMAIN: &[u8] = b"dsdb.group.v1";

/// Domain tag for dataset content hashes.
pub const DATASET_DOMAIN: &[u8] = b"dsdb.dataset.v1";

/// Namespace for the synthetic labels of mapping and opaque groups.
pub const LABEL_NAMESPACE: Uuid = Uuid::from_bytes([
    0x6d, 0x73, 0x64, 0x62, 0x2d, 0x6c, 0x61, 0x62, 0x65, 0x6c, 0x2d, 0x6e, 0x73, 0x2d, 0x76, 0x31,
]);

// =============================================================================
// LIMITS
// =============================================================================

/// Tables with at least this many rows are decomposed in parallel.
pub const PARALLEL_ROW_THRESHOLD: usize = 256;

/// Maximum number of run hops walked by a lineage query.
pub const MAX_LINEAGE_DEPTH: usize = 100;

/// Maximum `@vN` suffix tried when versioning a conflicting dataset name.
pub const MAX_NAME_VERSIONS: u32 = 1000;

/// Maximum length of an atomic unit key (column or mapping key).
pub const MAX_KEY_LENGTH: usize = 256;

/// Maximum length of a dataset name.
pub const MAX_NAME_LENGTH: usize = 512;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_domains_are_distinct() {
        assert_ne!(IOTA_DOMAIN, GROUP_DOMAIN);
        assert_ne!(GROUP_DOMAIN, DATASET_DOMAIN);
        assert_ne!(IOTA_DOMAIN, DATASET_DOMAIN);
    }

    #[test]
    fn label_namespace_is_stable() {
        assert_eq!(
            LABEL_NAMESPACE.to_string(),
            "6d736462-2d6c-6162-656c-2d6e732d7631"
        );
    }
}
