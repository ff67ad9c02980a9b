//! # Catalog
//!
//! The write and read entry points of the engine.
//!
//! ## Write path
//!
//! 1. Select the introspector from the object's variant
//! 2. Validate (may coerce or rewrite values, and copy referenced files into
//!    the blob store)
//! 3. Deconstruct, in the catalog's worker pool
//! 4. Put blobs in the blob store
//! 5. One store transaction: intern units and groups, resolve the dataset,
//!    record its source (and for runs: algorithm, run, edges)
//!
//! Nothing reaches the store before step 5, and step 5 commits whole or not
//! at all. Blobs written in step 4 for a failed write stay behind; being
//! content-addressed they are simply reused by the next identical write.
//!
//! ## Read path
//!
//! The dataset's recorded introspector kind selects the reconstruction path.

use crate::blob::{BlobStore, FsBlobStore, MemoryBlobStore};
use crate::config::CatalogConfig;
use crate::formats::{decode_object, decode_value};
use crate::identity::{DatasetMeta, IngestReport, NameConflictPolicy, persist_dataset, resolve};
use crate::introspect::{Deconstruction, Introspector, IntrospectorRegistry, Package, UnitLookup};
use crate::primitives::BLOB_TYPE_NAME;
use crate::provenance::{self, DatasetRuns, Lineage};
use crate::store::{CatalogStore, MemoryCatalog, RedbCatalog, StorageBackend, TableReader};
use crate::validation::ValidationRules;
use crate::{
    Algorithm, AlgorithmSpec, CatalogObject, CatalogTable, ContentAddress, ContentHash, Dataset,
    DatasetId, DsdbError, GroupId, IntrospectorKind, NewRun, OpaqueObject, Run, RunEdge, RunId,
    RunSource, Source, SourceKind, User, Value,
};
use chrono::Utc;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// =============================================================================
// REQUESTS
// =============================================================================

/// Options for `Catalog::ingest`.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    /// Defaults to the content hash in hex.
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: ValidationRules,
    pub source: SourceKind,
    pub on_name_conflict: NameConflictPolicy,
}

impl IngestRequest {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_rules(mut self, rules: ValidationRules) -> Self {
        self.rules = rules;
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    #[must_use]
    pub fn versioned(mut self) -> Self {
        self.on_name_conflict = NameConflictPolicy::Version;
        self
    }
}

/// One execution of an algorithm and the object it produced.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub algorithm: AlgorithmSpec,
    pub inputs: Vec<DatasetId>,
    pub parameters: BTreeMap<String, Value>,
    pub output: CatalogObject,
    pub output_name: Option<String>,
    pub output_description: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: ValidationRules,
    pub on_name_conflict: NameConflictPolicy,
}

impl RunRequest {
    pub fn new(algorithm: AlgorithmSpec, output: impl Into<CatalogObject>) -> Self {
        Self {
            algorithm,
            inputs: Vec::new(),
            parameters: BTreeMap::new(),
            output: output.into(),
            output_name: None,
            output_description: None,
            name: None,
            description: None,
            rules: ValidationRules::default(),
            on_name_conflict: NameConflictPolicy::default(),
        }
    }

    #[must_use]
    pub fn input(mut self, dataset: DatasetId) -> Self {
        self.inputs.push(dataset);
        self
    }

    #[must_use]
    pub fn parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.output_name = Some(name.into());
        self
    }
}

/// Outcome of `Catalog::record_run`.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRun {
    pub run: Run,
    pub output: Dataset,
    /// False when the output deduplicated onto an existing dataset.
    pub output_created: bool,
}

/// A run with its resolved algorithm, user and edges.
#[derive(Debug, Clone, PartialEq)]
pub struct RunDetails {
    pub run: Run,
    pub algorithm: Algorithm,
    pub user: User,
    pub inputs: Vec<DatasetId>,
    pub outputs: Vec<DatasetId>,
}

// =============================================================================
// CATALOG
// =============================================================================

/// A dataset catalog over one store and one blob store.
#[derive(Debug)]
pub struct Catalog {
    store: StorageBackend,
    blobs: Box<dyn BlobStore>,
    registry: IntrospectorRegistry,
    pool: Option<rayon::ThreadPool>,
    user: String,
}

impl Catalog {
    /// A volatile catalog with in-memory tables and blobs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            store: StorageBackend::InMemory(MemoryCatalog::new()),
            blobs: Box::new(MemoryBlobStore::new()),
            registry: IntrospectorRegistry::standard(),
            pool: None,
            user: CatalogConfig::default().user_name().to_string(),
        }
    }

    /// Open a catalog with the standard introspectors.
    pub fn open(config: &CatalogConfig) -> Result<Self, DsdbError> {
        Self::with_registry(config, IntrospectorRegistry::standard())
    }

    /// Open a catalog with a custom introspector registry.
    pub fn with_registry(
        config: &CatalogConfig,
        registry: IntrospectorRegistry,
    ) -> Result<Self, DsdbError> {
        let store = match &config.database {
            Some(path) => StorageBackend::Persistent(RedbCatalog::open(path)?),
            None => StorageBackend::InMemory(MemoryCatalog::new()),
        };
        let blobs: Box<dyn BlobStore> = match config.blob_config() {
            Some(blobs) => Box::new(FsBlobStore::new(blobs)?),
            None => Box::new(MemoryBlobStore::new()),
        };
        let pool = match config.parallelism {
            Some(threads) if threads > 0 => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("dsdb-worker-{i}"))
                    .build()
                    .map_err(|e| DsdbError::IoError(format!("worker pool: {e}")))?,
            ),
            _ => None,
        };
        debug!(
            persistent = store.is_persistent(),
            threads = ?config.parallelism,
            "catalog opened"
        );
        Ok(Self {
            store,
            blobs,
            registry,
            pool,
            user: config.user_name().to_string(),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.store.is_persistent()
    }

    /// Name recorded as the user of every run.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    // =========================================================================
    // WRITE PATH
    // =========================================================================

    /// Validate, deconstruct and persist an object as a Dataset.
    ///
    /// Identical content returns the existing Dataset with `created == false`.
    pub fn ingest(
        &self,
        object: CatalogObject,
        request: IngestRequest,
    ) -> Result<IngestReport, DsdbError> {
        let IngestRequest {
            name,
            description,
            rules,
            source,
            on_name_conflict,
        } = request;
        let decon = self.prepare(object, &rules)?;
        let meta = DatasetMeta {
            name,
            description,
            path_columns: rules.path_columns(),
            on_name_conflict,
        };

        let now = Utc::now();
        let report = self.store.write(|tx| {
            let report = persist_dataset(tx, &decon, &meta, now)?;
            if report.created {
                tx.insert_source(report.dataset.id, source, now)?;
            }
            Ok(report)
        })?;

        if report.created {
            info!(
                dataset = %report.dataset.id,
                name = %report.dataset.name,
                kind = %report.dataset.introspector,
                units_created = report.units_created,
                units_reused = report.units_reused,
                groups_created = report.groups_created,
                groups_reused = report.groups_reused,
                "dataset created"
            );
        } else {
            debug!(dataset = %report.dataset.id, "ingest deduplicated onto existing dataset");
        }
        Ok(report)
    }

    /// Ingest an object already held in the blob store.
    ///
    /// For `Opaque` the blob's raw bytes become the payload. `Tabular` and
    /// `Mapping` blobs must hold an object written by `formats::encode_object`.
    /// The dataset's source records the blob address.
    pub fn ingest_blob(
        &self,
        address: &ContentAddress,
        kind: IntrospectorKind,
        request: IngestRequest,
    ) -> Result<IngestReport, DsdbError> {
        let bytes = self.blobs.read(address)?.ok_or_else(|| {
            DsdbError::InvalidObject(format!("blob {address} is not in the blob store"))
        })?;
        let object: CatalogObject = match kind {
            IntrospectorKind::Opaque => OpaqueObject::from_bytes(BLOB_TYPE_NAME, bytes).into(),
            IntrospectorKind::Tabular | IntrospectorKind::Mapping => {
                let object = decode_object(&bytes)?;
                if object.kind() != kind {
                    return Err(DsdbError::VariantMismatch {
                        expected: kind,
                        found: object.kind(),
                    });
                }
                object
            }
        };
        debug!(address = %address, kind = %kind, "ingesting blob");
        self.ingest(
            object,
            request.with_source(SourceKind::Blob { address: *address }),
        )
    }

    /// Store raw bytes in the catalog's blob store.
    pub fn put_blob(&self, bytes: &[u8]) -> Result<ContentAddress, DsdbError> {
        self.blobs.get_or_create(bytes)
    }

    /// Bytes stored under `address`, if any.
    pub fn blob(&self, address: &ContentAddress) -> Result<Option<Vec<u8>>, DsdbError> {
        self.blobs.read(address)
    }

    /// Record one execution of an algorithm and persist its output.
    ///
    /// Algorithm, output dataset, run and edges are written in a single
    /// transaction.
    pub fn record_run(&self, request: RunRequest) -> Result<RecordedRun, DsdbError> {
        let RunRequest {
            algorithm,
            inputs,
            parameters,
            output,
            output_name,
            output_description,
            name,
            description,
            rules,
            on_name_conflict,
        } = request;
        let begin = Utc::now();

        self.store.read(|r| {
            for &input in &inputs {
                if r.dataset(input)?.is_none() {
                    return Err(DsdbError::DatasetNotFound(input));
                }
            }
            Ok(())
        })?;

        let decon = self.prepare(output, &rules)?;
        let meta = DatasetMeta {
            name: output_name,
            description: output_description,
            path_columns: rules.path_columns(),
            on_name_conflict,
        };
        let mut input_set = inputs;
        input_set.sort_unstable();
        input_set.dedup();
        let user = self.user.as_str();

        let recorded = self.store.write(|tx| {
            let user_id = resolve(tx, |r| r.find_user(user), |w| w.insert_user(user, begin))?.id;
            let algorithm_id = resolve(
                tx,
                |r| r.find_algorithm(&algorithm.name, &algorithm.version),
                |w| w.insert_algorithm(&algorithm, begin),
            )?
            .id;

            let report = persist_dataset(tx, &decon, &meta, begin)?;
            let end = Utc::now().max(begin);
            let run_id = tx.insert_run(NewRun {
                algorithm: algorithm_id,
                user: user_id,
                name,
                description,
                parameters,
                begin,
                end,
            })?;

            let edge = |dataset| RunEdge {
                run: run_id,
                dataset,
                created: end,
            };
            for &input in &input_set {
                tx.insert_run_input(edge(input))?;
            }
            tx.insert_run_output(edge(report.dataset.id))?;

            if report.created {
                let source = tx.insert_source(report.dataset.id, SourceKind::Run, end)?;
                tx.insert_run_source(RunSource {
                    source,
                    run: run_id,
                    created: end,
                })?;
            }

            let run = tx.run(run_id)?.ok_or(DsdbError::RunNotFound(run_id))?;
            Ok(RecordedRun {
                run,
                output: report.dataset,
                output_created: report.created,
            })
        })?;

        if input_set.contains(&recorded.output.id) {
            warn!(
                run = %recorded.run.id,
                dataset = %recorded.output.id,
                "run output is also one of its inputs"
            );
        }
        info!(
            run = %recorded.run.id,
            algorithm = %algorithm.name,
            version = %algorithm.version,
            inputs = input_set.len(),
            output = %recorded.output.id,
            "run recorded"
        );
        Ok(recorded)
    }

    fn introspector(&self, kind: IntrospectorKind) -> Result<&dyn Introspector, DsdbError> {
        self.registry.get(kind).ok_or_else(|| {
            DsdbError::InvalidObject(format!("no introspector registered for {kind}"))
        })
    }

    /// Validate, deconstruct, and write blobs. Touches no catalog table.
    fn prepare(
        &self,
        mut object: CatalogObject,
        rules: &ValidationRules,
    ) -> Result<Deconstruction, DsdbError> {
        let introspector = self.introspector(object.kind())?;
        introspector.validate(&mut object, rules, self.blobs.as_ref())?;
        let decon = self.in_pool(|| introspector.deconstruct(&object))?;
        debug!(
            kind = %decon.kind,
            units = decon.units.len(),
            groups = decon.groups.len(),
            edges = decon.edges.len(),
            "object deconstructed"
        );

        for blob in &decon.blobs {
            let expected = ContentAddress::of(blob);
            let address = self.blobs.get_or_create(blob)?;
            if address != expected {
                return Err(DsdbError::StoreUnavailable(format!(
                    "blob store returned {address} for content hashing to {expected}"
                )));
            }
        }
        Ok(decon)
    }

    fn in_pool<T, F>(&self, f: F) -> T
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    // =========================================================================
    // READ PATH
    // =========================================================================

    pub fn dataset(&self, id: DatasetId) -> Result<Dataset, DsdbError> {
        self.store
            .read(|r| r.dataset(id)?.ok_or(DsdbError::DatasetNotFound(id)))
    }

    pub fn dataset_by_name(&self, name: &str) -> Result<Option<Dataset>, DsdbError> {
        self.store.read(|r| match r.find_dataset_by_name(name)? {
            Some(id) => r.dataset(id),
            None => Ok(None),
        })
    }

    pub fn dataset_by_hash(&self, hash: &ContentHash) -> Result<Option<Dataset>, DsdbError> {
        self.store.read(|r| match r.find_dataset_by_hash(hash)? {
            Some(id) => r.dataset(id),
            None => Ok(None),
        })
    }

    /// Find a dataset by numeric id, then by name, then by content hash.
    pub fn find(&self, ident: &str) -> Result<Dataset, DsdbError> {
        if let Ok(raw) = ident.parse::<u64>()
            && let Ok(dataset) = self.dataset(DatasetId(raw))
        {
            return Ok(dataset);
        }
        if let Some(dataset) = self.dataset_by_name(ident)? {
            return Ok(dataset);
        }
        if let Ok(hash) = ContentHash::from_hex(ident)
            && let Some(dataset) = self.dataset_by_hash(&hash)?
        {
            return Ok(dataset);
        }
        Err(DsdbError::UnknownDataset(ident.to_string()))
    }

    /// Every dataset in id order.
    pub fn datasets(&self) -> Result<Vec<Dataset>, DsdbError> {
        self.store.read(|r| r.datasets())
    }

    /// Rebuild a dataset's object with its recorded introspector.
    pub fn load(&self, id: DatasetId) -> Result<CatalogObject, DsdbError> {
        self.reconstruct(id, None).map(|(_, object)| object)
    }

    /// Rebuild a dataset, failing if it was not written as `kind`.
    pub fn load_as(
        &self,
        id: DatasetId,
        kind: IntrospectorKind,
    ) -> Result<CatalogObject, DsdbError> {
        self.reconstruct(id, Some(kind)).map(|(_, object)| object)
    }

    /// Rebuild a dataset together with the files its path columns reference.
    pub fn package(&self, id: DatasetId) -> Result<Package, DsdbError> {
        let (dataset, object) = self.reconstruct(id, None)?;
        self.introspector(dataset.introspector)?
            .package(object, &dataset.path_columns)
    }

    fn reconstruct(
        &self,
        id: DatasetId,
        expected: Option<IntrospectorKind>,
    ) -> Result<(Dataset, CatalogObject), DsdbError> {
        self.store.read(|r| {
            let dataset = r.dataset(id)?.ok_or(DsdbError::DatasetNotFound(id))?;
            if let Some(kind) = expected
                && kind != dataset.introspector
            {
                return Err(DsdbError::ReconstructionMismatch(format!(
                    "dataset {id} was written as {}, not {kind}",
                    dataset.introspector
                )));
            }
            let introspector = self.registry.get(dataset.introspector).ok_or_else(|| {
                DsdbError::ReconstructionMismatch(format!(
                    "no introspector registered for {}",
                    dataset.introspector
                ))
            })?;
            let edges = r.dataset_groups(id)?;
            let lookup = StoreLookup {
                reader: r,
                blobs: self.blobs.as_ref(),
            };
            let object = introspector.reconstruct(&edges, &lookup)?;
            debug!(dataset = %id, groups = edges.len(), "dataset reconstructed");
            Ok((dataset, object))
        })
    }

    /// Row count of every catalog table.
    pub fn counts(&self) -> Result<BTreeMap<CatalogTable, u64>, DsdbError> {
        self.store.read(|r| {
            CatalogTable::ALL
                .iter()
                .map(|&table| Ok((table, r.count(table)?)))
                .collect()
        })
    }

    pub fn run(&self, id: RunId) -> Result<Run, DsdbError> {
        self.store
            .read(|r| r.run(id)?.ok_or(DsdbError::RunNotFound(id)))
    }

    pub fn run_details(&self, id: RunId) -> Result<RunDetails, DsdbError> {
        self.store.read(|r| {
            let run = r.run(id)?.ok_or(DsdbError::RunNotFound(id))?;
            let algorithm = r.algorithm(run.algorithm)?.ok_or_else(|| {
                DsdbError::StoreUnavailable(format!("run {id} references missing algorithm"))
            })?;
            let user = r.user(run.user)?.ok_or_else(|| {
                DsdbError::StoreUnavailable(format!("run {id} references missing user"))
            })?;
            let inputs = r.run_inputs(id)?.into_iter().map(|e| e.dataset).collect();
            let outputs = r.run_outputs(id)?.into_iter().map(|e| e.dataset).collect();
            Ok(RunDetails {
                run,
                algorithm,
                user,
                inputs,
                outputs,
            })
        })
    }

    pub fn algorithm(&self, name: &str, version: &str) -> Result<Option<Algorithm>, DsdbError> {
        self.store.read(|r| match r.find_algorithm(name, version)? {
            Some(id) => r.algorithm(id),
            None => Ok(None),
        })
    }

    /// How a dataset entered the catalog.
    pub fn sources(&self, id: DatasetId) -> Result<Vec<Source>, DsdbError> {
        self.store.read(|r| r.sources(id))
    }

    pub fn ancestors(&self, id: DatasetId) -> Result<Lineage, DsdbError> {
        self.store.read(|r| provenance::ancestors(r, id))
    }

    pub fn descendants(&self, id: DatasetId) -> Result<Lineage, DsdbError> {
        self.store.read(|r| provenance::descendants(r, id))
    }

    pub fn runs_for(&self, id: DatasetId) -> Result<DatasetRuns, DsdbError> {
        self.store.read(|r| {
            if r.dataset(id)?.is_none() {
                return Err(DsdbError::DatasetNotFound(id));
            }
            provenance::runs_for(r, id)
        })
    }
}

/// Resolves units and blobs for an introspector from committed state.
struct StoreLookup<'a> {
    reader: &'a dyn TableReader,
    blobs: &'a dyn BlobStore,
}

impl UnitLookup for StoreLookup<'_> {
    fn group_units(&self, group: GroupId) -> Result<Vec<(String, Value)>, DsdbError> {
        if self.reader.group(group)?.is_none() {
            return Err(DsdbError::ReconstructionMismatch(format!(
                "group {group} is missing"
            )));
        }
        self.reader
            .group_members(group)?
            .into_iter()
            .map(|id| {
                let iota = self.reader.iota(id)?.ok_or_else(|| {
                    DsdbError::ReconstructionMismatch(format!(
                        "unit {id} of group {group} is missing"
                    ))
                })?;
                let value = decode_value(&iota.value).map_err(|e| {
                    DsdbError::ReconstructionMismatch(format!("unit {id}: {e}"))
                })?;
                Ok((iota.key, value))
            })
            .collect()
    }

    fn blob(&self, address: &ContentAddress) -> Result<Vec<u8>, DsdbError> {
        match self.blobs.read(address) {
            Ok(Some(bytes)) => Ok(bytes),
            Ok(None) => Err(DsdbError::ReconstructionMismatch(format!(
                "blob {address} is missing"
            ))),
            // Unreadable or corrupt: the unit's reference cannot be resolved.
            Err(DsdbError::StoreUnavailable(detail)) => Err(DsdbError::ReconstructionMismatch(
                format!("blob {address}: {detail}"),
            )),
            Err(e) => Err(e),
        }
    }
}
