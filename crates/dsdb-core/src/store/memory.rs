//! In-memory catalog store.
//!
//! All tables live in `BTreeMap`s behind one `RwLock`. A write mutates the
//! live tables in place and journals every row it adds; a failed write
//! replays the journal backwards to remove them.

use super::{CatalogStore, Insert, TableReader, TableWriter};
use crate::{
    Algorithm, AlgorithmId, AlgorithmSpec, CatalogTable, ContentHash, Dataset, DatasetId,
    DsdbError, Group, GroupDataset, GroupId, Iota, IotaId, MemberOrdering, NewDataset, NewRun,
    Run, RunEdge, RunId, RunSource, Source, SourceId, SourceKind, Timestamp, User, UserId,
};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// One row added during the current write, with the keys needed to remove it.
#[derive(Debug)]
enum Undo {
    Iota(IotaId, (String, Vec<u8>)),
    Group(GroupId, ContentHash),
    GroupDataset((DatasetId, String)),
    Dataset(DatasetId, ContentHash, String),
    User(UserId, String),
    Algorithm(AlgorithmId, (String, String)),
    Run(RunId),
    RunInput(RunId, DatasetId),
    RunOutput(RunId, DatasetId),
    Source(DatasetId, SourceId),
    RunSource((SourceId, RunId)),
}

#[derive(Debug, Default)]
struct Tables {
    iotas: BTreeMap<IotaId, Iota>,
    iota_index: BTreeMap<(String, Vec<u8>), IotaId>,
    groups: BTreeMap<GroupId, Group>,
    group_index: BTreeMap<ContentHash, GroupId>,
    group_members: BTreeMap<GroupId, Vec<IotaId>>,
    datasets: BTreeMap<DatasetId, Dataset>,
    dataset_hash_index: BTreeMap<ContentHash, DatasetId>,
    dataset_name_index: BTreeMap<String, DatasetId>,
    group_datasets: BTreeMap<(DatasetId, String), GroupDataset>,
    users: BTreeMap<UserId, User>,
    user_index: BTreeMap<String, UserId>,
    algorithms: BTreeMap<AlgorithmId, Algorithm>,
    algorithm_index: BTreeMap<(String, String), AlgorithmId>,
    runs: BTreeMap<RunId, Run>,
    run_inputs: BTreeMap<(RunId, DatasetId), RunEdge>,
    inputs_by_dataset: BTreeSet<(DatasetId, RunId)>,
    run_outputs: BTreeMap<(RunId, DatasetId), RunEdge>,
    outputs_by_dataset: BTreeSet<(DatasetId, RunId)>,
    sources: BTreeMap<SourceId, Source>,
    sources_by_dataset: BTreeSet<(DatasetId, SourceId)>,
    run_sources: BTreeMap<(SourceId, RunId), RunSource>,
    last_ids: BTreeMap<CatalogTable, u64>,
    journal: Vec<Undo>,
}

impl Tables {
    /// Next id of `table`, starting at 1.
    fn next_id(&mut self, table: CatalogTable) -> u64 {
        let last = self.last_ids.entry(table).or_insert(0);
        *last += 1;
        *last
    }

    /// Remove every journaled row, newest first, and restore the id counters.
    fn rollback(&mut self, last_ids: BTreeMap<CatalogTable, u64>) {
        while let Some(entry) = self.journal.pop() {
            match entry {
                Undo::Iota(id, unique) => {
                    self.iotas.remove(&id);
                    self.iota_index.remove(&unique);
                }
                Undo::Group(id, hash) => {
                    self.groups.remove(&id);
                    self.group_index.remove(&hash);
                    self.group_members.remove(&id);
                }
                Undo::GroupDataset(key) => {
                    self.group_datasets.remove(&key);
                }
                Undo::Dataset(id, hash, name) => {
                    self.datasets.remove(&id);
                    self.dataset_hash_index.remove(&hash);
                    self.dataset_name_index.remove(&name);
                }
                Undo::User(id, name) => {
                    self.users.remove(&id);
                    self.user_index.remove(&name);
                }
                Undo::Algorithm(id, unique) => {
                    self.algorithms.remove(&id);
                    self.algorithm_index.remove(&unique);
                }
                Undo::Run(id) => {
                    self.runs.remove(&id);
                }
                Undo::RunInput(run, dataset) => {
                    self.run_inputs.remove(&(run, dataset));
                    self.inputs_by_dataset.remove(&(dataset, run));
                }
                Undo::RunOutput(run, dataset) => {
                    self.run_outputs.remove(&(run, dataset));
                    self.outputs_by_dataset.remove(&(dataset, run));
                }
                Undo::Source(dataset, id) => {
                    self.sources.remove(&id);
                    self.sources_by_dataset.remove(&(dataset, id));
                }
                Undo::RunSource(key) => {
                    self.run_sources.remove(&key);
                }
            }
        }
        self.last_ids = last_ids;
    }
}

/// A catalog held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    tables: RwLock<Tables>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CatalogStore for MemoryCatalog {
    fn read<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&dyn TableReader) -> Result<T, DsdbError>,
    {
        let tables = self.tables.read();
        f(&*tables)
    }

    fn write<T, F>(&self, f: F) -> Result<T, DsdbError>
    where
        F: FnOnce(&mut dyn TableWriter) -> Result<T, DsdbError>,
    {
        let mut tables = self.tables.write();
        let last_ids = tables.last_ids.clone();
        match f(&mut *tables) {
            Ok(out) => {
                tables.journal.clear();
                Ok(out)
            }
            Err(e) => {
                tables.rollback(last_ids);
                Err(e)
            }
        }
    }
}

fn edges_of(edges: &BTreeMap<(RunId, DatasetId), RunEdge>, run: RunId) -> Vec<RunEdge> {
    edges
        .range((run, DatasetId(0))..=(run, DatasetId(u64::MAX)))
        .map(|(_, edge)| edge.clone())
        .collect()
}

fn runs_of(index: &BTreeSet<(DatasetId, RunId)>, dataset: DatasetId) -> Vec<RunId> {
    index
        .range((dataset, RunId(0))..=(dataset, RunId(u64::MAX)))
        .map(|&(_, run)| run)
        .collect()
}

impl TableReader for Tables {
    fn find_iota(&self, key: &str, value: &[u8]) -> Result<Option<IotaId>, DsdbError> {
        Ok(self
            .iota_index
            .get(&(key.to_string(), value.to_vec()))
            .copied())
    }

    fn iota(&self, id: IotaId) -> Result<Option<Iota>, DsdbError> {
        Ok(self.iotas.get(&id).cloned())
    }

    fn find_group(&self, hash: &ContentHash) -> Result<Option<GroupId>, DsdbError> {
        Ok(self.group_index.get(hash).copied())
    }

    fn group(&self, id: GroupId) -> Result<Option<Group>, DsdbError> {
        Ok(self.groups.get(&id).cloned())
    }

    fn group_members(&self, id: GroupId) -> Result<Vec<IotaId>, DsdbError> {
        Ok(self.group_members.get(&id).cloned().unwrap_or_default())
    }

    fn find_dataset_by_hash(&self, hash: &ContentHash) -> Result<Option<DatasetId>, DsdbError> {
        Ok(self.dataset_hash_index.get(hash).copied())
    }

    fn find_dataset_by_name(&self, name: &str) -> Result<Option<DatasetId>, DsdbError> {
        Ok(self.dataset_name_index.get(name).copied())
    }

    fn dataset(&self, id: DatasetId) -> Result<Option<Dataset>, DsdbError> {
        Ok(self.datasets.get(&id).cloned())
    }

    fn datasets(&self) -> Result<Vec<Dataset>, DsdbError> {
        Ok(self.datasets.values().cloned().collect())
    }

    fn dataset_groups(&self, id: DatasetId) -> Result<Vec<GroupDataset>, DsdbError> {
        Ok(self
            .group_datasets
            .range((id, String::new())..)
            .take_while(|((dataset, _), _)| *dataset == id)
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn find_user(&self, name: &str) -> Result<Option<UserId>, DsdbError> {
        Ok(self.user_index.get(name).copied())
    }

    fn user(&self, id: UserId) -> Result<Option<User>, DsdbError> {
        Ok(self.users.get(&id).cloned())
    }

    fn find_algorithm(&self, name: &str, version: &str) -> Result<Option<AlgorithmId>, DsdbError> {
        Ok(self
            .algorithm_index
            .get(&(name.to_string(), version.to_string()))
            .copied())
    }

    fn algorithm(&self, id: AlgorithmId) -> Result<Option<Algorithm>, DsdbError> {
        Ok(self.algorithms.get(&id).cloned())
    }

    fn run(&self, id: RunId) -> Result<Option<Run>, DsdbError> {
        Ok(self.runs.get(&id).cloned())
    }

    fn run_inputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError> {
        Ok(edges_of(&self.run_inputs, run))
    }

    fn run_outputs(&self, run: RunId) -> Result<Vec<RunEdge>, DsdbError> {
        Ok(edges_of(&self.run_outputs, run))
    }

    fn runs_consuming(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError> {
        Ok(runs_of(&self.inputs_by_dataset, dataset))
    }

    fn runs_producing(&self, dataset: DatasetId) -> Result<Vec<RunId>, DsdbError> {
        Ok(runs_of(&self.outputs_by_dataset, dataset))
    }

    fn sources(&self, dataset: DatasetId) -> Result<Vec<Source>, DsdbError> {
        Ok(self
            .sources_by_dataset
            .range((dataset, SourceId(0))..=(dataset, SourceId(u64::MAX)))
            .filter_map(|(_, id)| self.sources.get(id).cloned())
            .collect())
    }

    fn source_runs(&self, source: SourceId) -> Result<Vec<RunSource>, DsdbError> {
        Ok(self
            .run_sources
            .range((source, RunId(0))..=(source, RunId(u64::MAX)))
            .map(|(_, link)| link.clone())
            .collect())
    }

    fn count(&self, table: CatalogTable) -> Result<u64, DsdbError> {
        let n = match table {
            CatalogTable::Iota => self.iotas.len(),
            CatalogTable::Group => self.groups.len(),
            CatalogTable::IotaGroup => self.group_members.values().map(Vec::len).sum(),
            CatalogTable::GroupDataset => self.group_datasets.len(),
            CatalogTable::Dataset => self.datasets.len(),
            CatalogTable::User => self.users.len(),
            CatalogTable::Algorithm => self.algorithms.len(),
            CatalogTable::Run => self.runs.len(),
            CatalogTable::RunInput => self.run_inputs.len(),
            CatalogTable::RunOutput => self.run_outputs.len(),
            CatalogTable::Source => self.sources.len(),
            CatalogTable::RunSource => self.run_sources.len(),
        };
        Ok(n as u64)
    }
}

impl TableWriter for Tables {
    fn insert_iota(
        &mut self,
        key: &str,
        value: &[u8],
        created: Timestamp,
    ) -> Result<Insert<IotaId>, DsdbError> {
        let unique = (key.to_string(), value.to_vec());
        if self.iota_index.contains_key(&unique) {
            return Ok(Insert::Conflict);
        }
        let id = IotaId(self.next_id(CatalogTable::Iota));
        self.iotas.insert(
            id,
            Iota {
                id,
                key: unique.0.clone(),
                value: unique.1.clone(),
                created,
            },
        );
        self.iota_index.insert(unique.clone(), id);
        self.journal.push(Undo::Iota(id, unique));
        Ok(Insert::Created(id))
    }

    fn insert_group(
        &mut self,
        hash: ContentHash,
        ordering: MemberOrdering,
        members: &[IotaId],
        created: Timestamp,
    ) -> Result<Insert<GroupId>, DsdbError> {
        if self.group_index.contains_key(&hash) {
            return Ok(Insert::Conflict);
        }
        let id = GroupId(self.next_id(CatalogTable::Group));
        self.groups.insert(
            id,
            Group {
                id,
                content_hash: hash,
                ordering,
                created,
            },
        );
        self.group_index.insert(hash, id);
        self.group_members.insert(id, members.to_vec());
        self.journal.push(Undo::Group(id, hash));
        Ok(Insert::Created(id))
    }

    fn insert_group_dataset(&mut self, link: GroupDataset) -> Result<Insert<()>, DsdbError> {
        let key = (link.dataset, link.label.clone());
        if self.group_datasets.contains_key(&key) {
            return Ok(Insert::Conflict);
        }
        self.group_datasets.insert(key.clone(), link);
        self.journal.push(Undo::GroupDataset(key));
        Ok(Insert::Created(()))
    }

    fn insert_dataset(
        &mut self,
        dataset: NewDataset,
        created: Timestamp,
    ) -> Result<Insert<DatasetId>, DsdbError> {
        if self.dataset_hash_index.contains_key(&dataset.content_hash)
            || self.dataset_name_index.contains_key(&dataset.name)
        {
            return Ok(Insert::Conflict);
        }
        let id = DatasetId(self.next_id(CatalogTable::Dataset));
        self.dataset_hash_index.insert(dataset.content_hash, id);
        self.dataset_name_index.insert(dataset.name.clone(), id);
        self.journal.push(Undo::Dataset(
            id,
            dataset.content_hash,
            dataset.name.clone(),
        ));
        self.datasets.insert(
            id,
            Dataset {
                id,
                name: dataset.name,
                description: dataset.description,
                introspector: dataset.introspector,
                content_hash: dataset.content_hash,
                path_columns: dataset.path_columns,
                created,
            },
        );
        Ok(Insert::Created(id))
    }

    fn insert_user(&mut self, name: &str, created: Timestamp) -> Result<Insert<UserId>, DsdbError> {
        if self.user_index.contains_key(name) {
            return Ok(Insert::Conflict);
        }
        let id = UserId(self.next_id(CatalogTable::User));
        self.user_index.insert(name.to_string(), id);
        self.journal.push(Undo::User(id, name.to_string()));
        self.users.insert(
            id,
            User {
                id,
                name: name.to_string(),
                created,
            },
        );
        Ok(Insert::Created(id))
    }

    fn insert_algorithm(
        &mut self,
        spec: &AlgorithmSpec,
        created: Timestamp,
    ) -> Result<Insert<AlgorithmId>, DsdbError> {
        let unique = (spec.name.clone(), spec.version.clone());
        if self.algorithm_index.contains_key(&unique) {
            return Ok(Insert::Conflict);
        }
        let id = AlgorithmId(self.next_id(CatalogTable::Algorithm));
        self.algorithm_index.insert(unique.clone(), id);
        self.journal.push(Undo::Algorithm(id, unique));
        self.algorithms.insert(
            id,
            Algorithm {
                id,
                name: spec.name.clone(),
                version: spec.version.clone(),
                description: spec.description.clone(),
                created,
            },
        );
        Ok(Insert::Created(id))
    }

    fn insert_run(&mut self, run: NewRun) -> Result<RunId, DsdbError> {
        let id = RunId(self.next_id(CatalogTable::Run));
        self.journal.push(Undo::Run(id));
        self.runs.insert(
            id,
            Run {
                id,
                algorithm: run.algorithm,
                user: run.user,
                name: run.name,
                description: run.description,
                parameters: run.parameters,
                begin: run.begin,
                end: run.end,
            },
        );
        Ok(id)
    }

    fn insert_run_input(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError> {
        let key = (edge.run, edge.dataset);
        if self.run_inputs.contains_key(&key) {
            return Ok(Insert::Conflict);
        }
        self.inputs_by_dataset.insert((edge.dataset, edge.run));
        self.journal.push(Undo::RunInput(edge.run, edge.dataset));
        self.run_inputs.insert(key, edge);
        Ok(Insert::Created(()))
    }

    fn insert_run_output(&mut self, edge: RunEdge) -> Result<Insert<()>, DsdbError> {
        let key = (edge.run, edge.dataset);
        if self.run_outputs.contains_key(&key) {
            return Ok(Insert::Conflict);
        }
        self.outputs_by_dataset.insert((edge.dataset, edge.run));
        self.journal.push(Undo::RunOutput(edge.run, edge.dataset));
        self.run_outputs.insert(key, edge);
        Ok(Insert::Created(()))
    }

    fn insert_source(
        &mut self,
        dataset: DatasetId,
        kind: SourceKind,
        created: Timestamp,
    ) -> Result<SourceId, DsdbError> {
        let id = SourceId(self.next_id(CatalogTable::Source));
        self.sources_by_dataset.insert((dataset, id));
        self.journal.push(Undo::Source(dataset, id));
        self.sources.insert(
            id,
            Source {
                id,
                dataset,
                kind,
                created,
            },
        );
        Ok(id)
    }

    fn insert_run_source(&mut self, link: RunSource) -> Result<Insert<()>, DsdbError> {
        let key = (link.source, link.run);
        if self.run_sources.contains_key(&key) {
            return Ok(Insert::Conflict);
        }
        self.run_sources.insert(key, link);
        self.journal.push(Undo::RunSource(key));
        Ok(Insert::Created(()))
    }
}
