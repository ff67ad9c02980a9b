//! # dsdb-core
//!
//! The content-addressed dataset catalog engine.
//!
//! Objects (tables, mappings, opaque values) are decomposed into atomic
//! `(key, value)` units, grouped into records, and cataloged as immutable,
//! named Datasets. Identical content always collapses onto the same stored
//! identity through a three-tier hash cascade (unit → group → dataset).
//! Runs of algorithms link input Datasets to the Datasets they produce.
//!
//! ## Architectural Constraints
//!
//! - Synchronous, in-process: NO async, NO network dependencies
//! - Deterministic: within one catalog, identical content always resolves to
//!   identical ids and hashes; timestamps never enter a hash
//! - Immutable: no record is ever updated or deleted
//! - Atomic: every multi-record write commits whole or not at all

// =============================================================================
// MODULES
// =============================================================================

pub mod blob;
pub mod catalog;
pub mod config;
pub mod formats;
pub mod identity;
pub mod introspect;
pub mod primitives;
pub mod provenance;
pub mod store;
pub mod types;
pub mod validation;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    Algorithm, AlgorithmId, AlgorithmSpec, CatalogObject, CatalogTable, ContentAddress,
    ContentHash, Dataset, DatasetId, DsdbError, Group, GroupDataset, GroupId, IntrospectorKind,
    Iota, IotaId, Location, Mapping, MemberOrdering, NewDataset, NewRun, OpaqueObject, Run,
    RunEdge, RunId, RunSource, Source, SourceId, SourceKind, Table, Timestamp, User, UserId,
    ValidationFailure, ValidationKind, Value, ValueType,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use catalog::{Catalog, IngestRequest, RecordedRun, RunDetails, RunRequest};
pub use config::CatalogConfig;
pub use identity::{IngestReport, NameConflictPolicy};
pub use introspect::{
    Deconstruction, Introspector, IntrospectorRegistry, MappingIntrospector, OpaqueIntrospector,
    Package, TabularIntrospector, UnitLookup,
};
pub use provenance::{DatasetRuns, Lineage};
pub use validation::ValidationRules;

// =============================================================================
// RE-EXPORTS: Storage
// =============================================================================

pub use blob::{BlobStore, BlobStoreConfig, FsBlobStore, MemoryBlobStore};
pub use store::{CatalogStore, MemoryCatalog, RedbCatalog, StorageBackend};
