//! # Core Type Definitions
//!
//! This module contains all core types for the dsdb catalog:
//! - Store identifiers (`IotaId`, `GroupId`, `DatasetId`, ...)
//! - Content identity (`ContentHash`)
//! - Catalog records (`Iota`, `Group`, `Dataset`, `Run`, ...)
//! - Native object variants (`Value`, `Table`, `Mapping`, `OpaqueObject`)
//! - Error types (`DsdbError`, `ValidationFailure`)
//!
//! ## Immutability
//!
//! Every record in this module is written once and never updated. Corrections
//! are expressed as new Datasets and Runs.

mod object;
mod value;

pub use object::{CatalogObject, Mapping, OpaqueObject, Table};
pub use value::{Value, ValueType};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Timestamp type used on every record.
pub type Timestamp = DateTime<Utc>;

// =============================================================================
// STORE IDENTIFIERS
// =============================================================================

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of an atomic unit (Iota).
    IotaId
);
define_id!(
    /// Identifier of a content-addressed group of atomic units.
    GroupId
);
define_id!(
    /// Identifier of a named catalog entry.
    DatasetId
);
define_id!(
    /// Identifier of an algorithm (name + version).
    AlgorithmId
);
define_id!(
    /// Identifier of one algorithm execution.
    RunId
);
define_id!(
    /// Identifier of a dataset source record.
    SourceId
);
define_id!(
    /// Identifier of a catalog user.
    UserId
);

// =============================================================================
// CONTENT IDENTITY
// =============================================================================

/// A 32-byte BLAKE3 digest.
///
/// Used as the dedup key of Groups and Datasets and as the content address
/// of blobs.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

/// Blobs are addressed by the digest of their bytes.
pub type ContentAddress = ContentHash;

impl ContentHash {
    /// Digest of an arbitrary byte slice.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering (64 characters).
    #[must_use]
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    /// Parse a 64-character hex digest.
    pub fn from_hex(hex: &str) -> Result<Self, DsdbError> {
        blake3::Hash::from_hex(hex)
            .map(|h| Self(*h.as_bytes()))
            .map_err(|e| DsdbError::SerializationError(format!("invalid content hash: {e}")))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

// =============================================================================
// INTROSPECTOR VARIANTS
// =============================================================================

/// Declared object variant, recorded on every Dataset.
///
/// Reads select the reconstruction path from this tag alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntrospectorKind {
    /// Rows by named columns.
    Tabular,
    /// Flat key → value structure.
    Mapping,
    /// Serialized object held in the blob store.
    Opaque,
}

impl IntrospectorKind {
    /// All variants in tag order.
    pub const ALL: [IntrospectorKind; 3] = [
        IntrospectorKind::Tabular,
        IntrospectorKind::Mapping,
        IntrospectorKind::Opaque,
    ];

    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IntrospectorKind::Tabular => "tabular",
            IntrospectorKind::Mapping => "mapping",
            IntrospectorKind::Opaque => "opaque",
        }
    }

    /// Single-byte tag mixed into dataset hashes.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            IntrospectorKind::Tabular => 1,
            IntrospectorKind::Mapping => 2,
            IntrospectorKind::Opaque => 3,
        }
    }
}

impl fmt::Display for IntrospectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntrospectorKind {
    type Err = DsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tabular" | "table" => Ok(IntrospectorKind::Tabular),
            "mapping" | "map" | "dict" => Ok(IntrospectorKind::Mapping),
            "opaque" | "object" => Ok(IntrospectorKind::Opaque),
            other => Err(DsdbError::InvalidObject(format!(
                "unknown introspector kind: {other}"
            ))),
        }
    }
}

/// Whether the order of a group's members is part of its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MemberOrdering {
    /// Member order is significant (tabular rows, column order).
    Ordered,
    /// Members form a set; the hash sorts them first.
    Unordered,
}

impl MemberOrdering {
    /// Single-byte tag mixed into group hashes.
    #[must_use]
    pub fn tag(&self) -> u8 {
        match self {
            MemberOrdering::Ordered => 1,
            MemberOrdering::Unordered => 2,
        }
    }
}

// =============================================================================
// CATALOG RECORDS
// =============================================================================

/// The smallest fact: a key and a serialized value.
///
/// Unique on `(key, value)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Iota {
    pub id: IotaId,
    pub key: String,
    /// Encoded `Value` (see `formats::encode_value`).
    pub value: Vec<u8>,
    pub created: Timestamp,
}

/// A content-addressed record made of atomic units.
///
/// Membership lives in the store's member table and never changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub content_hash: ContentHash,
    pub ordering: MemberOrdering,
    pub created: Timestamp,
}

/// Join of a Group into a Dataset under a label.
///
/// Unique on `(group, dataset, label)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupDataset {
    pub group: GroupId,
    pub dataset: DatasetId,
    /// Row index for tabular data, a synthetic UUID otherwise.
    pub label: String,
    pub created: Timestamp,
}

/// A named, immutable, content-addressed catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub name: String,
    pub description: Option<String>,
    pub introspector: IntrospectorKind,
    pub content_hash: ContentHash,
    /// Fields declared as filesystem references at ingest.
    pub path_columns: Vec<String>,
    pub created: Timestamp,
}

/// Fields of a Dataset before the store assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDataset {
    pub name: String,
    pub description: Option<String>,
    pub introspector: IntrospectorKind,
    pub content_hash: ContentHash,
    pub path_columns: Vec<String>,
}

/// A catalog user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub created: Timestamp,
}

/// An algorithm, unique on `(name, version)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Algorithm {
    pub id: AlgorithmId,
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub created: Timestamp,
}

/// Name, version and description identifying an algorithm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmSpec {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
}

impl AlgorithmSpec {
    /// Name and version, no description.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
        }
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One execution of an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub algorithm: AlgorithmId,
    pub user: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, Value>,
    pub begin: Timestamp,
    pub end: Timestamp,
}

/// Fields of a Run before the store assigns its id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub algorithm: AlgorithmId,
    pub user: UserId,
    pub name: Option<String>,
    pub description: Option<String>,
    pub parameters: BTreeMap<String, Value>,
    pub begin: Timestamp,
    pub end: Timestamp,
}

/// A RunInput or RunOutput edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunEdge {
    pub run: RunId,
    pub dataset: DatasetId,
    pub created: Timestamp,
}

/// How a Dataset entered the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SourceKind {
    /// Handed over in-process.
    #[default]
    Inline,
    /// Read from a file on disk.
    File { path: String },
    /// Read from a blob-store object.
    Blob { address: ContentAddress },
    /// Produced by a recorded Run.
    Run,
}

impl SourceKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Inline => "inline",
            SourceKind::File { .. } => "file",
            SourceKind::Blob { .. } => "blob",
            SourceKind::Run => "run",
        }
    }
}

/// Source record of a Dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: SourceId,
    pub dataset: DatasetId,
    pub kind: SourceKind,
    pub created: Timestamp,
}

/// Links a Source to the Run that generated it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSource {
    pub source: SourceId,
    pub run: RunId,
    pub created: Timestamp,
}

/// The logical tables of the catalog, used for row counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CatalogTable {
    Iota,
    Group,
    IotaGroup,
    GroupDataset,
    Dataset,
    User,
    Algorithm,
    Run,
    RunInput,
    RunOutput,
    Source,
    RunSource,
}

impl CatalogTable {
    /// All tables in creation order.
    pub const ALL: [CatalogTable; 12] = [
        CatalogTable::Iota,
        CatalogTable::Group,
        CatalogTable::IotaGroup,
        CatalogTable::GroupDataset,
        CatalogTable::Dataset,
        CatalogTable::User,
        CatalogTable::Algorithm,
        CatalogTable::Run,
        CatalogTable::RunInput,
        CatalogTable::RunOutput,
        CatalogTable::Source,
        CatalogTable::RunSource,
    ];

    /// Table name as shown in status reports.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            CatalogTable::Iota => "Iota",
            CatalogTable::Group => "Group",
            CatalogTable::IotaGroup => "IotaGroup",
            CatalogTable::GroupDataset => "GroupDataset",
            CatalogTable::Dataset => "Dataset",
            CatalogTable::User => "User",
            CatalogTable::Algorithm => "Algorithm",
            CatalogTable::Run => "Run",
            CatalogTable::RunInput => "RunInput",
            CatalogTable::RunOutput => "RunOutput",
            CatalogTable::Source => "Source",
            CatalogTable::RunSource => "RunSource",
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Which validation step rejected the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    TypeMismatch,
    ValueRejected,
    FileMissing,
    /// A referenced file could not be copied into the blob store.
    FileNotStored,
    CoercionFailure,
    /// A rule names a field the object does not have.
    MissingField,
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationKind::TypeMismatch => "type mismatch",
            ValidationKind::ValueRejected => "value rejected",
            ValidationKind::FileMissing => "file missing",
            ValidationKind::FileNotStored => "file not stored",
            ValidationKind::CoercionFailure => "coercion failure",
            ValidationKind::MissingField => "missing field",
        };
        f.write_str(s)
    }
}

/// Where in the object a validation failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Column, key, or `obj` for opaque objects.
    pub field: String,
    /// Row index for tabular objects.
    pub record: Option<usize>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.record {
            Some(row) => write!(f, "field '{}', row {}", self.field, row),
            None => write!(f, "field '{}'", self.field),
        }
    }
}

/// First failing record of a validation step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at {location}: {detail}")]
pub struct ValidationFailure {
    pub kind: ValidationKind,
    pub location: Location,
    pub detail: String,
}

/// Errors that can occur in the dsdb engine.
///
/// - No silent failures
/// - Store failures are propagated unchanged, never retried
#[derive(Debug, Error)]
pub enum DsdbError {
    /// The object failed the validation pipeline; nothing was persisted.
    #[error("Validation failed: {0}")]
    Validation(ValidationFailure),

    /// A Dataset name is already bound to different content.
    #[error("Dataset name '{name}' is already bound to dataset {existing} with different content")]
    DuplicateNameConflict { name: String, existing: DatasetId },

    /// The persistent store or blob store failed.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored data cannot be rebuilt into the requested object.
    #[error("Reconstruction mismatch: {0}")]
    ReconstructionMismatch(String),

    /// An introspector was handed an object of another variant.
    #[error("Variant mismatch: expected {expected}, found {found}")]
    VariantMismatch {
        expected: IntrospectorKind,
        found: IntrospectorKind,
    },

    /// The requested dataset does not exist.
    #[error("Dataset not found: {0}")]
    DatasetNotFound(DatasetId),

    /// No dataset matches the given id, name or content hash.
    #[error("No dataset matches '{0}'")]
    UnknownDataset(String),

    /// The requested run does not exist.
    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    /// The object is structurally unusable (ragged rows, duplicate columns, ...).
    #[error("Invalid object: {0}")]
    InvalidObject(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A local I/O error outside the stores occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl From<ValidationFailure> for DsdbError {
    fn from(failure: ValidationFailure) -> Self {
        DsdbError::Validation(failure)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_hex_roundtrip() {
        let hash = ContentHash::of(b"dsdb");
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex).expect("parse"), hash);
    }

    #[test]
    fn content_hash_rejects_garbage() {
        assert!(ContentHash::from_hex("not-a-hash").is_err());
    }

    #[test]
    fn introspector_kind_parses_aliases() {
        assert_eq!(
            "table".parse::<IntrospectorKind>().expect("parse"),
            IntrospectorKind::Tabular
        );
        assert_eq!(
            "Dict".parse::<IntrospectorKind>().expect("parse"),
            IntrospectorKind::Mapping
        );
        assert_eq!(
            "object".parse::<IntrospectorKind>().expect("parse"),
            IntrospectorKind::Opaque
        );
        assert!("ndarray".parse::<IntrospectorKind>().is_err());
    }

    #[test]
    fn kind_tags_are_distinct() {
        let tags: std::collections::BTreeSet<u8> =
            IntrospectorKind::ALL.iter().map(|k| k.tag()).collect();
        assert_eq!(tags.len(), IntrospectorKind::ALL.len());
        assert_ne!(MemberOrdering::Ordered.tag(), MemberOrdering::Unordered.tag());
    }

    #[test]
    fn validation_failure_display_names_location() {
        let failure = ValidationFailure {
            kind: ValidationKind::FileMissing,
            location: Location {
                field: "path".to_string(),
                record: Some(3),
            },
            detail: "/nope".to_string(),
        };
        let text = DsdbError::from(failure).to_string();
        assert!(text.contains("file missing"));
        assert!(text.contains("row 3"));
    }
}
