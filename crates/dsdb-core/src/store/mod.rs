//! # Catalog Stores
//!
//! Typed table access over the catalog's persistent state.
//!
//! - `TableReader`: lookups by id and by unique key, row counts
//! - `TableWriter`: unique inserts, reporting `Insert::Conflict` instead of
//!   failing when a unique key already exists
//! - `CatalogStore`: `read` and atomic `write` closures
//!
//! Two backends implement them: `MemoryCatalog` and `RedbCatalog`.
//! `StorageBackend` selects one at runtime.

mod memory;
mod redb_catalog;

pub use memory::MemoryCatalog;
pub use redb_catalog::RedbCatalog;

use crate::{
    Algorithm, AlgorithmId, AlgorithmSpec, CatalogTable, ContentHash, Dataset, DatasetId,
    DsdbError, Group, GroupDataset, GroupId, Iota, IotaId, MemberOrdering, NewDataset, NewRun,
    Run, RunEdge, RunId, RunSource, Source, SourceId, SourceKind, Timestamp, User, UserId,
};

/// Outcome of a unique insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insert<T> {
    Created(T),
    /// A row with the same unique key already exists.
    Conflict,
}

/// Read access to every catalog table.
pub trait TableReader {
    /// Unit with exactly this `(key, value)`.
    fn find_iota(&self, key: &str, value: &[u8]) -> Result<Option<IotaId>, DsdbError>;
    fn iota(&self, id: IotaId) -> Result<Option<Iota>, DsdbError>;

    fn find_group(&self, hash: &ContentHash) -> Result<Option<GroupId>, DsdbError>;
    fn group(&self, id: GroupId) -> Result<Option<Group>, DsdbError>;
    /// Member units in stored order.
    fn group_members(&self, id: GroupId) -> Result<Vec<IotaId>, DsdbError>;

    fn find_dataset_by_hash(&self, hash: &ContentHash) -> Result<Option<DatasetId>, DsdbError>;
    fn find_dataset_by_name(&self, name: &str) -> Result<Option<DatasetId>, DsdbError>;
    fn dataset(&self, id: DatasetId) -> Result<Option<Dataset>, DsdbError>;
    /// All datasets in id order.
    fn datasets(&self) -> Result<Vec<Dataset>, DsdbError>;
    fn dataset_groups(&self, id: DatasetId) -> Result<Vec<GroupDataset>, DsdbError>;

    fn find_user(&self, name: &str) -> Result<Option<UserId>, DsdbError>;
    fn user(&self, id: UserId) -> Result<Option<User>, DsdbError>;

    fn find_algorithm(&self, name: &str, version: &str) -> Result<Option<AlgorithmId>, DsdbError>;
    fn algorithm(&self, id: AlgorithmId) -> Result<Option<Algorithm>, DsdbError>;

    fn run(&self, id: RunId) -> Result<Option<Run>, DsdbError>;
    fn run_inputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError>;
    fn run_outputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError>;
    /// Runs that list the dataset as an input.
    fn runs_consuming(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError>;
    /// Runs that list the dataset as an output.
    fn runs_producing(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError>;

    fn sources(&self, dataset: DatasetId) -> Result<Vec<Source>, DsdbError>;
    fn source_runs(&self, source: SourceId) -> Result<Vec<RunSource>, DsdbError>;

    fn count(&self, table: CatalogTable) -> Result<u64, DsdbError>;
}

/// Write access. Every insert enforces its table's unique key.
pub trait TableWriter: TableReader {
    fn insert_iota(
        &mut self,
        key: &str,
        value: &[u8],
        created: Timestamp,
    ) -> Result<Insert<IotaId>, DsdbError>;

    fn insert_group(
        &mut self,
        hash: ContentHash,
        ordering: MemberOrdering,
        members: &[IotaId],
        created: Timestamp,
    ) -> Result<Insert<GroupId>, DsdbError>;

    /// Unique on `(dataset, label)`.
    fn insert_group_dataset(&mut self, link: GroupDataset) -> Result<Insert<()>, DsdbError>;

    /// Unique on both content hash and name.
    fn insert_dataset(
        &mut self,
        dataset: NewDataset,
        created: Timestamp,
    ) -> Result<Insert<DatasetId>, DsdbError>;

    fn insert_user(&mut self, name: &str, created: Timestamp) -> Result<Insert<UserId>, DsdbError>;

    /// Unique on `(name, version)`.
    fn insert_algorithm(
        &mut self,
        spec: &AlgorithmSpec,
        created: Timestamp,
    ) -> Result<Insert<AlgorithmId>, DsdbError>;

    fn insert_run(&mut self, run: NewRun) -> Result<RunId, DsdbError>;

    fn insert_run_input(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError>;
    fn insert_run_output(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError>;

    fn insert_source(
        &mut self,
        dataset: DatasetId,
        kind: SourceKind,
        created: Timestamp,
    ) -> Result<SourceId, DsdbError>;

    fn insert_run_source(&mut self, link: RunSource) -> Result<Insert<()>, DsdbError>;
}

/// Transactional access to a catalog.
pub trait CatalogStore: Send + Sync {
    /// Run `f` against a consistent snapshot.
    fn read<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&dyn TableReader) -> Result<T, DsdbError>;

    /// Run `f` in one transaction: committed if `f` returns `Ok`, discarded
    /// otherwise.
    fn write<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&mut dyn TableWriter) -> Result<T, DsdbError>;
}

/// Storage backend for a catalog.
#[derive(Debug)]
pub enum StorageBackend {
    InMemory(MemoryCatalog),
    Persistent(RedbCatalog),
}

impl StorageBackend {
    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, StorageBackend::Persistent(_))
    }
}

impl CatalogStore for StorageBackend {
    fn read<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&dyn TableReader) -> Result<T, DsdbError>,
    {
        match self {
            StorageBackend::InMemory(store) => store.read(f),
            StorageBackend::Persistent(store) => store.read(f),
        }
    }

    fn write<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&mut dyn TableWriter) -> Result<T, DsdbError>,
    {
        match self {
            StorageBackend::InMemory(store) => store.write(f),
            StorageBackend::Persistent(store) => store.write(f),
        }
    }
}

/// Maps an external store failure to `StoreUnavailable`.
pub(crate) fn store_err(e: impl std::fmt::Display) -> DsdbError {
    DsdbError::StoreUnavailable(e.to_string())
}

// =============================================================================
// SHARED BACKEND TESTS
// =============================================================================
