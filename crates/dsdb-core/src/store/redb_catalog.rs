//! # redb-backed Catalog Storage
//!
//! A disk-backed catalog using the redb embedded database.
//!
//! - One table per catalog entity, plus unique-key index tables
//! - Every `write` is a single redb write transaction, committed on success
//!   and aborted on error
//! - Per-table id counters live in the `metadata` table and roll back with
//!   the transaction that advanced them

use super::{CatalogStore, Insert, TableReader, TableWriter, store_err};
use crate::formats::{decode_record, encode_record};
use crate::identity::iota_digest;
use crate::{
    Algorithm, AlgorithmId, AlgorithmSpec, CatalogTable, ContentHash, Dataset, DatasetId,
    DsdbError, Group, GroupDataset, GroupId, Iota, IotaId, MemberOrdering, NewDataset, NewRun,
    Run, RunEdge, RunId, RunSource, Source, SourceId, SourceKind, Timestamp, User, UserId,
};
use redb::{
    Database, ReadTransaction, ReadableDatabase, ReadableTable, ReadableTableMetadata,
    TableDefinition, WriteTransaction,
};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Units: IotaId -> encoded Iota
const IOTAS: TableDefinition<u64, &[u8]> = TableDefinition::new("iotas");

/// Unit index: BLAKE3 digest of (key, value) -> IotaId
const IOTA_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("iota_index");

/// Groups: GroupId -> encoded Group
const GROUPS: TableDefinition<u64, &[u8]> = TableDefinition::new("groups");

/// Group index: content hash -> GroupId
const GROUP_INDEX: TableDefinition<&[u8], u64> = TableDefinition::new("group_index");

/// IotaGroup join: (GroupId, position) -> IotaId
const GROUP_MEMBERS: TableDefinition<(u64, u64), u64> = TableDefinition::new("group_members");

/// Datasets: DatasetId -> encoded Dataset
const DATASETS: TableDefinition<u64, &[u8]> = TableDefinition::new("datasets");

/// Dataset index: content hash -> DatasetId
const DATASET_HASH_INDEX: TableDefinition<&[u8], u64> =
    TableDefinition::new("dataset_hash_index");

/// Dataset index: name -> DatasetId
const DATASET_NAME_INDEX: TableDefinition<&str, u64> = TableDefinition::new("dataset_name_index");

/// GroupDataset join: (DatasetId, label) -> encoded GroupDataset
const GROUP_DATASETS: TableDefinition<(u64, &str), &[u8]> =
    TableDefinition::new("group_datasets");

const USERS: TableDefinition<u64, &[u8]> = TableDefinition::new("users");
const USER_INDEX: TableDefinition<&str, u64> = TableDefinition::new("user_index");

const ALGORITHMS: TableDefinition<u64, &[u8]> = TableDefinition::new("algorithms");

/// Algorithm index: (name, version) -> AlgorithmId
const ALGORITHM_INDEX: TableDefinition<(&str, &str), u64> =
    TableDefinition::new("algorithm_index");

const RUNS: TableDefinition<u64, &[u8]> = TableDefinition::new("runs");

/// RunInput: (RunId, DatasetId) -> encoded RunEdge
const RUN_INPUTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("run_inputs");

/// Reverse RunInput: (DatasetId, RunId) -> RunId
const INPUTS_BY_DATASET: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("inputs_by_dataset");

/// RunOutput: (RunId, DatasetId) -> encoded RunEdge
const RUN_OUTPUTS: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("run_outputs");

/// Reverse RunOutput: (DatasetId, RunId) -> RunId
const OUTPUTS_BY_DATASET: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("outputs_by_dataset");

const SOURCES: TableDefinition<u64, &[u8]> = TableDefinition::new("sources");

/// (DatasetId, SourceId) -> SourceId
const SOURCES_BY_DATASET: TableDefinition<(u64, u64), u64> =
    TableDefinition::new("sources_by_dataset");

/// RunSource: (SourceId, RunId) -> encoded RunSource
const RUN_SOURCES: TableDefinition<(u64, u64), &[u8]> = TableDefinition::new("run_sources");

/// Table for metadata: key string -> value u64
const METADATA: TableDefinition<&str, u64> = TableDefinition::new("metadata");

/// A disk-backed catalog store using redb.
pub struct RedbCatalog {
    db: Database,
    path: PathBuf,
}

impl std::fmt::Debug for RedbCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbCatalog")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl RedbCatalog {
    /// Open or create a catalog database at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DsdbError> {
        let path = path.as_ref().to_path_buf();
        let db = Database::create(&path).map_err(store_err)?;

        // Initialize tables if they don't exist
        {
            let write_txn = db.begin_write().map_err(store_err)?;
            write_txn.open_table(IOTAS).map_err(store_err)?;
            write_txn.open_table(IOTA_INDEX).map_err(store_err)?;
            write_txn.open_table(GROUPS).map_err(store_err)?;
            write_txn.open_table(GROUP_INDEX).map_err(store_err)?;
            write_txn.open_table(GROUP_MEMBERS).map_err(store_err)?;
            write_txn.open_table(DATASETS).map_err(store_err)?;
            write_txn.open_table(DATASET_HASH_INDEX).map_err(store_err)?;
            write_txn.open_table(DATASET_NAME_INDEX).map_err(store_err)?;
            write_txn.open_table(GROUP_DATASETS).map_err(store_err)?;
            write_txn.open_table(USERS).map_err(store_err)?;
            write_txn.open_table(USER_INDEX).map_err(store_err)?;
            write_txn.open_table(ALGORITHMS).map_err(store_err)?;
            write_txn.open_table(ALGORITHM_INDEX).map_err(store_err)?;
            write_txn.open_table(RUNS).map_err(store_err)?;
            write_txn.open_table(RUN_INPUTS).map_err(store_err)?;
            write_txn.open_table(INPUTS_BY_DATASET).map_err(store_err)?;
            write_txn.open_table(RUN_OUTPUTS).map_err(store_err)?;
            write_txn.open_table(OUTPUTS_BY_DATASET).map_err(store_err)?;
            write_txn.open_table(SOURCES).map_err(store_err)?;
            write_txn.open_table(SOURCES_BY_DATASET).map_err(store_err)?;
            write_txn.open_table(RUN_SOURCES).map_err(store_err)?;
            write_txn.open_table(METADATA).map_err(store_err)?;
            write_txn.commit().map_err(store_err)?;
        }

        tracing::debug!(path = %path.display(), "opened redb catalog");
        Ok(Self { db, path })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CatalogStore for RedbCatalog {
    fn read<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&dyn TableReader) -> Result<T, DsdbError>,
    {
        let txn = self.db.begin_read().map_err(store_err)?;
        f(&RedbTxn::Read(txn))
    }

    fn write<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&mut dyn TableWriter) -> Result<T, DsdbError>,
    {
        let txn = self.db.begin_write().map_err(store_err)?;
        let mut handle = RedbTxn::Write(txn);
        let result = f(&mut handle);
        let RedbTxn::Write(txn) = handle else {
            return Err(DsdbError::StoreUnavailable(
                "write transaction was replaced".to_string(),
            ));
        };
        match result {
            Ok(value) => {
                txn.commit().map_err(store_err)?;
                Ok(value)
            }
            Err(e) => {
                if let Err(abort) = txn.abort() {
                    tracing::warn!(error = %abort, "failed to abort catalog transaction");
                }
                Err(e)
            }
        }
    }
}

// =============================================================================
// TRANSACTION HANDLE
// =============================================================================

enum RedbTxn {
    Read(ReadTransaction),
    Write(WriteTransaction),
}

/// Open `$def` on either transaction kind and evaluate `$body` with it.
macro_rules! with_table {
    ($txn:expr, $def:expr, |$table:ident| $body:expr) => {
        match $txn {
            RedbTxn::Read(txn) => {
                let $table = txn.open_table($def).map_err(store_err)?;
                $body
            }
            RedbTxn::Write(txn) => {
                let $table = txn.open_table($def).map_err(store_err)?;
                $body
            }
        }
    };
}

impl RedbTxn {
    fn writable(&self) -> Result<&WriteTransaction, DsdbError> {
        match self {
            RedbTxn::Write(txn) => Ok(txn),
            RedbTxn::Read(_) => Err(DsdbError::StoreUnavailable(
                "insert attempted on a read transaction".to_string(),
            )),
        }
    }
}

fn load<T, Tbl>(table: &Tbl, id: u64) -> Result<Option<T>, DsdbError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(store_err)? {
        Some(guard) => decode_record(guard.value()).map(Some),
        None => Ok(None),
    }
}

/// Second key component of every `(prefix, _)` entry.
fn suffixes<Tbl>(table: &Tbl, prefix: u64) -> Result<Vec<u64>, DsdbError>
where
    Tbl: ReadableTable<(u64, u64), u64>,
{
    let mut out = Vec::new();
    for entry in table
        .range((prefix, 0u64)..=(prefix, u64::MAX))
        .map_err(store_err)?
    {
        let (key, _) = entry.map_err(store_err)?;
        out.push(key.value().1);
    }
    Ok(out)
}

/// Decoded records of every `(prefix, _)` entry.
fn records<T, Tbl>(table: &Tbl, prefix: u64) -> Result<Vec<T>, DsdbError>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<(u64, u64), &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table
        .range((prefix, 0u64)..=(prefix, u64::MAX))
        .map_err(store_err)?
    {
        let (_, value) = entry.map_err(store_err)?;
        out.push(decode_record(value.value())?);
    }
    Ok(out)
}

fn next_id(txn: &WriteTransaction, table: CatalogTable) -> Result<u64, DsdbError> {
    let key = format!("last_id.{}", table.name());
    let mut metadata = txn.open_table(METADATA).map_err(store_err)?;
    let last = metadata
        .get(key.as_str())
        .map_err(store_err)?
        .map(|v| v.value())
        .unwrap_or(0);
    let next = last + 1;
    metadata.insert(key.as_str(), next).map_err(store_err)?;
    Ok(next)
}

fn put_record<T: serde::Serialize>(
    txn: &WriteTransaction,
    def: TableDefinition<'_, u64, &'static [u8]>,
    id: u64,
    record: &T,
) -> Result<(), DsdbError> {
    let bytes = encode_record(record)?;
    let mut table = txn.open_table(def).map_err(store_err)?;
    table.insert(id, bytes.as_slice()).map_err(store_err)?;
    Ok(())
}

// =============================================================================
// READS
// =============================================================================

impl TableReader for RedbTxn {
    fn find_iota(&self, key: &str, value: &[u8]) -> Result<Option<IotaId>, DsdbError> {
        let digest = iota_digest(key, value);
        let id = with_table!(self, IOTA_INDEX, |index| index
            .get(digest.as_slice())
            .map_err(store_err)?
            .map(|v| v.value()));
        let Some(id) = id else {
            return Ok(None);
        };
        match self.iota(IotaId(id))? {
            Some(iota) if iota.key == key && iota.value == value => Ok(Some(IotaId(id))),
            Some(_) => Err(DsdbError::StoreUnavailable(format!(
                "unit index digest collision at iota {id}"
            ))),
            None => Err(DsdbError::StoreUnavailable(format!(
                "unit index points at missing iota {id}"
            ))),
        }
    }

    fn iota(&self, id: IotaId) -> Result<Option<Iota>, DsdbError> {
        with_table!(self, IOTAS, |table| load(&table, id.0))
    }

    fn find_group(&self, hash: &ContentHash) -> Result<Option<GroupId>, DsdbError> {
        with_table!(self, GROUP_INDEX, |index| Ok(index
            .get(hash.as_bytes().as_slice())
            .map_err(store_err)?
            .map(|v| GroupId(v.value()))))
    }

    fn group(&self, id: GroupId) -> Result<Option<Group>, DsdbError> {
        with_table!(self, GROUPS, |table| load(&table, id.0))
    }

    fn group_members(&self, id: GroupId) -> Result<Vec<IotaId>, DsdbError> {
        with_table!(self, GROUP_MEMBERS, |table| {
            let mut members = Vec::new();
            for entry in table
                .range((id.0, 0u64)..=(id.0, u64::MAX))
                .map_err(store_err)?
            {
                let (_, iota) = entry.map_err(store_err)?;
                members.push(IotaId(iota.value()));
            }
            Ok(members)
        })
    }

    fn find_dataset_by_hash(&self, hash: &ContentHash) -> Result<Option<DatasetId>, DsdbError> {
        with_table!(self, DATASET_HASH_INDEX, |index| Ok(index
            .get(hash.as_bytes().as_slice())
            .map_err(store_err)?
            .map(|v| DatasetId(v.value()))))
    }

    fn find_dataset_by_name(&self, name: &str) -> Result<Option<DatasetId>, DsdbError> {
        with_table!(self, DATASET_NAME_INDEX, |index| Ok(index
            .get(name)
            .map_err(store_err)?
            .map(|v| DatasetId(v.value()))))
    }

    fn dataset(&self, id: DatasetId) -> Result<Option<Dataset>, DsdbError> {
        with_table!(self, DATASETS, |table| load(&table, id.0))
    }

    fn datasets(&self) -> Result<Vec<Dataset>, DsdbError> {
        with_table!(self, DATASETS, |table| {
            let mut datasets = Vec::new();
            for entry in table.iter().map_err(store_err)? {
                let (_, value) = entry.map_err(store_err)?;
                datasets.push(decode_record(value.value())?);
            }
            Ok(datasets)
        })
    }

    fn dataset_groups(&self, id: DatasetId) -> Result<Vec<GroupDataset>, DsdbError> {
        with_table!(self, GROUP_DATASETS, |table| {
            let mut links = Vec::new();
            let start: (u64, &str) = (id.0, "");
            for entry in table.range(start..).map_err(store_err)? {
                let (key, value) = entry.map_err(store_err)?;
                if key.value().0 != id.0 {
                    break;
                }
                links.push(decode_record(value.value())?);
            }
            Ok(links)
        })
    }

    fn find_user(&self, name: &str) -> Result<Option<UserId>, DsdbError> {
        with_table!(self, USER_INDEX, |index| Ok(index
            .get(name)
            .map_err(store_err)?
            .map(|v| UserId(v.value()))))
    }

    fn user(&self, id: UserId) -> Result<Option<User>, DsdbError> {
        with_table!(self, USERS, |table| load(&table, id.0))
    }

    fn find_algorithm(&self, name: &str, version: &str) -> Result<Option<AlgorithmId>, DsdbError> {
        with_table!(self, ALGORITHM_INDEX, |index| Ok(index
            .get((name, version))
            .map_err(store_err)?
            .map(|v| AlgorithmId(v.value()))))
    }

    fn algorithm(&self, id: AlgorithmId) -> Result<Option<Algorithm>, DsdbError> {
        with_table!(self, ALGORITHMS, |table| load(&table, id.0))
    }

    fn run(&self, id: RunId) -> Result<Option<Run>, DsdbError> {
        with_table!(self, RUNS, |table| load(&table, id.0))
    }

    fn run_inputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError> {
        with_table!(self, RUN_INPUTS, |table| records(&table, run.0))
    }

    fn run_outputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError> {
        with_table!(self, RUN_OUTPUTS, |table| records(&table, run.0))
    }

    fn runs_consuming(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError> {
        let ids = with_table!(self, INPUTS_BY_DATASET, |table| suffixes(&table, dataset.0))?;
        Ok(ids.into_iter().map(RunId).collect())
    }

    fn runs_producing(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError> {
        let ids = with_table!(self, OUTPUTS_BY_DATASET, |table| suffixes(&table, dataset.0))?;
        Ok(ids.into_iter().map(RunId).collect())
    }

    fn sources(&self, dataset: DatasetId) -> Result<Vec<Source>, DsdbError> {
        let ids = with_table!(self, SOURCES_BY_DATASET, |table| suffixes(&table, dataset.0))?;
        with_table!(self, SOURCES, |table| {
            let mut sources = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(source) = load(&table, id)? {
                    sources.push(source);
                }
            }
            Ok(sources)
        })
    }

    fn source_runs(&self, source: SourceId) -> Result<Vec<RunSource>, DsdbError> {
        with_table!(self, RUN_SOURCES, |table| records(&table, source.0))
    }

    fn count(&self, table: CatalogTable) -> Result<u64, DsdbError> {
        match table {
            CatalogTable::Iota => with_table!(self, IOTAS, |t| t.len().map_err(store_err)),
            CatalogTable::Group => with_table!(self, GROUPS, |t| t.len().map_err(store_err)),
            CatalogTable::IotaGroup => {
                with_table!(self, GROUP_MEMBERS, |t| t.len().map_err(store_err))
            }
            CatalogTable::GroupDataset => {
                with_table!(self, GROUP_DATASETS, |t| t.len().map_err(store_err))
            }
            CatalogTable::Dataset => with_table!(self, DATASETS, |t| t.len().map_err(store_err)),
            CatalogTable::User => with_table!(self, USERS, |t| t.len().map_err(store_err)),
            CatalogTable::Algorithm => {
                with_table!(self, ALGORITHMS, |t| t.len().map_err(store_err))
            }
            CatalogTable::Run => with_table!(self, RUNS, |t| t.len().map_err(store_err)),
            CatalogTable::RunInput => {
                with_table!(self, RUN_INPUTS, |t| t.len().map_err(store_err))
            }
            CatalogTable::RunOutput => {
                with_table!(self, RUN_OUTPUTS, |t| t.len().map_err(store_err))
            }
            CatalogTable::Source => with_table!(self, SOURCES, |t| t.len().map_err(store_err)),
            CatalogTable::RunSource => {
                with_table!(self, RUN_SOURCES, |t| t.len().map_err(store_err))
            }
        }
    }
}

// =============================================================================
// WRITES
// =============================================================================

impl TableWriter for RedbTxn {
    fn insert_iota(
        &mut self,
        key: &str,
        value: &[u8],
        created: Timestamp,
    ) -> Result<Insert<IotaId>, DsdbError> {
        let txn = self.writable()?;
        let digest = iota_digest(key, value);
        {
            let index = txn.open_table(IOTA_INDEX).map_err(store_err)?;
            if index.get(digest.as_slice()).map_err(store_err)?.is_some() {
                return Ok(Insert::Conflict);
            }
        }
        let id = next_id(txn, CatalogTable::Iota)?;
        let iota = Iota {
            id: IotaId(id),
            key: key.to_string(),
            value: value.to_vec(),
            created,
        };
        put_record(txn, IOTAS, id, &iota)?;
        let mut index = txn.open_table(IOTA_INDEX).map_err(store_err)?;
        index.insert(digest.as_slice(), id).map_err(store_err)?;
        Ok(Insert::Created(IotaId(id)))
    }

    fn insert_group(
        &mut self,
        hash: ContentHash,
        ordering: MemberOrdering,
        members: &[IotaId],
        created: Timestamp,
    ) -> Result<Insert<GroupId>, DsdbError> {
        let txn = self.writable()?;
        {
            let index = txn.open_table(GROUP_INDEX).map_err(store_err)?;
            if index
                .get(hash.as_bytes().as_slice())
                .map_err(store_err)?
                .is_some()
            {
                return Ok(Insert::Conflict);
            }
        }
        let id = next_id(txn, CatalogTable::Group)?;
        let group = Group {
            id: GroupId(id),
            content_hash: hash,
            ordering,
            created,
        };
        put_record(txn, GROUPS, id, &group)?;
        {
            let mut index = txn.open_table(GROUP_INDEX).map_err(store_err)?;
            index
                .insert(hash.as_bytes().as_slice(), id)
                .map_err(store_err)?;
        }
        let mut table = txn.open_table(GROUP_MEMBERS).map_err(store_err)?;
        for (position, member) in members.iter().enumerate() {
            table
                .insert((id, position as u64), member.0)
                .map_err(store_err)?;
        }
        Ok(Insert::Created(GroupId(id)))
    }

    fn insert_group_dataset(&mut self, link: GroupDataset) -> Result<Insert<()>, DsdbError> {
        let txn = self.writable()?;
        let bytes = encode_record(&link)?;
        let mut table = txn.open_table(GROUP_DATASETS).map_err(store_err)?;
        let key = (link.dataset.0, link.label.as_str());
        if table.get(key).map_err(store_err)?.is_some() {
            return Ok(Insert::Conflict);
        }
        table.insert(key, bytes.as_slice()).map_err(store_err)?;
        Ok(Insert::Created(()))
    }

    fn insert_dataset(
        &mut self,
        dataset: NewDataset,
        created: Timestamp,
    ) -> Result<Insert<DatasetId>, DsdbError> {
        if self.find_dataset_by_hash(&dataset.content_hash)?.is_some()
            || self.find_dataset_by_name(&dataset.name)?.is_some()
        {
            return Ok(Insert::Conflict);
        }
        let txn = self.writable()?;
        let id = next_id(txn, CatalogTable::Dataset)?;
        let record = Dataset {
            id: DatasetId(id),
            name: dataset.name,
            description: dataset.description,
            introspector: dataset.introspector,
            content_hash: dataset.content_hash,
            path_columns: dataset.path_columns,
            created,
        };
        put_record(txn, DATASETS, id, &record)?;
        {
            let mut index = txn.open_table(DATASET_HASH_INDEX).map_err(store_err)?;
            index
                .insert(record.content_hash.as_bytes().as_slice(), id)
                .map_err(store_err)?;
        }
        let mut names = txn.open_table(DATASET_NAME_INDEX).map_err(store_err)?;
        names.insert(record.name.as_str(), id).map_err(store_err)?;
        Ok(Insert::Created(DatasetId(id)))
    }

    fn insert_user(&mut self, name: &str, created: Timestamp) -> Result<Insert<UserId>, DsdbError> {
        if self.find_user(name)?.is_some() {
            return Ok(Insert::Conflict);
        }
        let txn = self.writable()?;
        let id = next_id(txn, CatalogTable::User)?;
        let user = User {
            id: UserId(id),
            name: name.to_string(),
            created,
        };
        put_record(txn, USERS, id, &user)?;
        let mut index = txn.open_table(USER_INDEX).map_err(store_err)?;
        index.insert(name, id).map_err(store_err)?;
        Ok(Insert::Created(UserId(id)))
    }

    fn insert_algorithm(
        &mut self,
        spec: &AlgorithmSpec,
        created: Timestamp,
    ) -> Result<Insert<AlgorithmId>, DsdbError> {
        if self.find_algorithm(&spec.name, &spec.version)?.is_some() {
            return Ok(Insert::Conflict);
        }
        let txn = self.writable()?;
        let id = next_id(txn, CatalogTable::Algorithm)?;
        let algorithm = Algorithm {
            id: AlgorithmId(id),
            name: spec.name.clone(),
            version: spec.version.clone(),
            description: spec.description.clone(),
            created,
        };
        put_record(txn, ALGORITHMS, id, &algorithm)?;
        let mut index = txn.open_table(ALGORITHM_INDEX).map_err(store_err)?;
        index
            .insert((spec.name.as_str(), spec.version.as_str()), id)
            .map_err(store_err)?;
        Ok(Insert::Created(AlgorithmId(id)))
    }

    fn insert_run(&mut self, run: NewRun) -> Result<RunId, DsdbError> {
        let txn = self.writable()?;
        let id = next_id(txn, CatalogTable::Run)?;
        let record = Run {
            id: RunId(id),
            algorithm: run.algorithm,
            user: run.user,
            name: run.name,
            description: run.description,
            parameters: run.parameters,
            begin: run.begin,
            end: run.end,
        };
        put_record(txn, RUNS, id, &record)?;
        Ok(RunId(id))
    }

    fn insert_run_input(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError> {
        let txn = self.writable()?;
        insert_edge(txn, RUN_INPUTS, INPUTS_BY_DATASET, &edge)
    }

    fn insert_run_output(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError> {
        let txn = self.writable()?;
        insert_edge(txn, RUN_OUTPUTS, OUTPUTS_BY_DATASET, &edge)
    }

    fn insert_source(
        &mut self,
        dataset: DatasetId,
        kind: SourceKind,
        created: Timestamp,
    ) -> Result<SourceId, DsdbError> {
        let txn = self.writable()?;
        let id = next_id(txn, CatalogTable::Source)?;
        let source = Source {
            id: SourceId(id),
            dataset,
            kind,
            created,
        };
        put_record(txn, SOURCES, id, &source)?;
        let mut index = txn.open_table(SOURCES_BY_DATASET).map_err(store_err)?;
        index.insert((dataset.0, id), id).map_err(store_err)?;
        Ok(SourceId(id))
    }

    fn insert_run_source(&mut self, link: RunSource) -> Result<Insert<()>, DsdbError> {
        let txn = self.writable()?;
        let bytes = encode_record(&link)?;
        let mut table = txn.open_table(RUN_SOURCES).map_err(store_err)?;
        let key = (link.source.0, link.run.0);
        if table.get(key).map_err(store_err)?.is_some() {
            return Ok(Insert::Conflict);
        }
        table.insert(key, bytes.as_slice()).map_err(store_err)?;
        Ok(Insert::Created(()))
    }
}

fn insert_edge(
    txn: &WriteTransaction,
    edges: TableDefinition<'_, (u64, u64), &'static [u8]>,
    reverse: TableDefinition<'_, (u64, u64), u64>,
    edge: &RunEdge,
) -> Result<Insert<()>, DsdbError> {
    let bytes = encode_record(edge)?;
    {
        let mut table = txn.open_table(edges).map_err(store_err)?;
        let key = (edge.run.0, edge.dataset.0);
        if table.get(key).map_err(store_err)?.is_some() {
            return Ok(Insert::Conflict);
        }
        table.insert(key, bytes.as_slice()).map_err(store_err)?;
    }
    let mut index = txn.open_table(reverse).map_err(store_err)?;
    index
        .insert((edge.dataset.0, edge.run.0), edge.run.0)
        .map_err(store_err)?;
    Ok(Insert::Created(()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use tempfile::tempdir;

    fn open_temp() -> (tempfile::TempDir, RedbCatalog) {
        let dir = tempdir().expect("Failed to create temp dir");
        let store = RedbCatalog::open(dir.path().join("catalog.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn iota_uniqueness() {
        let (_dir, store) = open_temp();
        conformance::iota_uniqueness(&store);
    }

    #[test]
    fn group_members_keep_order() {
        let (_dir, store) = open_temp();
        conformance::group_members_keep_order(&store);
    }

    #[test]
    fn dataset_unique_on_hash_and_name() {
        let (_dir, store) = open_temp();
        conformance::dataset_unique_on_hash_and_name(&store);
    }

    #[test]
    fn failed_write_leaves_no_trace() {
        let (_dir, store) = open_temp();
        conformance::failed_write_leaves_no_trace(&store);
    }

    #[test]
    fn failed_write_keeps_committed_rows() {
        let (_dir, store) = open_temp();
        conformance::failed_write_keeps_committed_rows(&store);
    }

    #[test]
    fn run_edges_indexed_both_ways() {
        let (_dir, store) = open_temp();
        conformance::run_edges_indexed_both_ways(&store);
    }

    #[test]
    fn group_dataset_labels() {
        let (_dir, store) = open_temp();
        conformance::group_dataset_labels(&store);
    }

    #[test]
    fn data_survives_reopen() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("catalog.redb");
        let now = chrono::Utc::now();
        {
            let store = RedbCatalog::open(&path).unwrap();
            store
                .write(|tx| tx.insert_iota("k", b"v", now))
                .unwrap();
        }
        let store = RedbCatalog::open(&path).unwrap();
        let id = store.read(|r| r.find_iota("k", b"v")).unwrap();
        assert_eq!(id, Some(IotaId(1)));
        let next = store
            .write(|tx| tx.insert_iota("k2", b"v", now))
            .unwrap();
        assert_eq!(next, Insert::Created(IotaId(2)));
    }
}
