//! # Identity & Deduplication
//!
//! The three-tier hash cascade:
//!
//! 1. Unit: identity is the exact `(key, encoded value)` pair.
//! 2. Group: BLAKE3 over the ordering tag and member unit ids, sorted first
//!    for `Unordered` groups.
//! 3. Dataset: BLAKE3 over the introspector kind and group ids in edge order
//!    for tabular data, sorted otherwise.
//!
//! Every tier resolves through `resolve`: find by unique key, insert if
//! absent, and on a lost insert race re-read and reuse the winner's row.

use crate::introspect::Deconstruction;
use crate::primitives::{DATASET_DOMAIN, GROUP_DOMAIN, IOTA_DOMAIN, MAX_NAME_LENGTH, MAX_NAME_VERSIONS};
use crate::store::{Insert, TableWriter};
use crate::{
    ContentHash, Dataset, DatasetId, DsdbError, GroupDataset, GroupId, IntrospectorKind, IotaId,
    MemberOrdering, NewDataset, Timestamp,
};
use tracing::debug;

// =============================================================================
// HASHES
// =============================================================================

/// Index digest of a unit's `(key, value)` pair.
#[must_use]
pub fn iota_digest(key: &str, value: &[u8]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(IOTA_DOMAIN);
    hasher.update(&(key.len() as u64).to_le_bytes());
    hasher.update(key.as_bytes());
    hasher.update(value);
    *hasher.finalize().as_bytes()
}

/// Content hash of a group from its member unit ids.
#[must_use]
pub fn group_hash(ordering: MemberOrdering, members: &[IotaId]) -> ContentHash {
    let mut ids: Vec<u64> = members.iter().map(|m| m.0).collect();
    if ordering == MemberOrdering::Unordered {
        ids.sort_unstable();
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(GROUP_DOMAIN);
    hasher.update(&[ordering.tag()]);
    hash_ids(&mut hasher, &ids);
    ContentHash(*hasher.finalize().as_bytes())
}

/// Content hash of a dataset from its group ids, given in edge order.
#[must_use]
pub fn dataset_hash(kind: IntrospectorKind, groups: &[GroupId]) -> ContentHash {
    let mut ids: Vec<u64> = groups.iter().map(|g| g.0).collect();
    if edge_ordering(kind) == MemberOrdering::Unordered {
        ids.sort_unstable();
    }
    let mut hasher = blake3::Hasher::new();
    hasher.update(DATASET_DOMAIN);
    hasher.update(&[kind.tag()]);
    hash_ids(&mut hasher, &ids);
    ContentHash(*hasher.finalize().as_bytes())
}

/// Whether the order of a dataset's groups is part of its identity.
#[must_use]
pub fn edge_ordering(kind: IntrospectorKind) -> MemberOrdering {
    match kind {
        IntrospectorKind::Tabular => MemberOrdering::Ordered,
        IntrospectorKind::Mapping | IntrospectorKind::Opaque => MemberOrdering::Unordered,
    }
}

fn hash_ids(hasher: &mut blake3::Hasher, ids: &[u64]) {
    hasher.update(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        hasher.update(&id.to_le_bytes());
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// An id found or created by `resolve`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved<T> {
    pub id: T,
    pub created: bool,
}

/// Find → insert → on conflict re-read.
pub fn resolve<W, T, F, I>(store: &mut W, find: F, insert: I) -> Result<Resolved<T>, DsdbError>
where
    W: TableWriter + ?Sized,
    F: Fn(&W) -> Result<Option<T>, DsdbError>,
    I: FnOnce(&mut W) -> Result<Insert<T>, DsdbError>,
{
    if let Some(id) = find(&*store)? {
        return Ok(Resolved { id, created: false });
    }
    match insert(store)? {
        Insert::Created(id) => Ok(Resolved { id, created: true }),
        Insert::Conflict => find(&*store)?
            .map(|id| Resolved { id, created: false })
            .ok_or_else(missing_winner),
    }
}

/// A unique insert conflicted, yet the re-read found no row.
fn missing_winner() -> DsdbError {
    DsdbError::StoreUnavailable(
        "insert reported a conflict but no existing row was found".to_string(),
    )
}

// =============================================================================
// DATASET PERSISTENCE
// =============================================================================

/// What to do when a dataset name is already bound to other content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NameConflictPolicy {
    /// Fail with `DuplicateNameConflict`.
    #[default]
    Reject,
    /// Use the first free `name@vN`, N ≥ 2.
    Version,
}

/// Descriptive fields of a dataset being written.
#[derive(Debug, Clone, Default)]
pub struct DatasetMeta {
    /// Defaults to the content hash in hex.
    pub name: Option<String>,
    pub description: Option<String>,
    pub path_columns: Vec<String>,
    pub on_name_conflict: NameConflictPolicy,
}

/// Outcome of persisting one deconstructed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub dataset: Dataset,
    /// False when identical content was already cataloged.
    pub created: bool,
    pub units_created: usize,
    pub units_reused: usize,
    pub groups_created: usize,
    pub groups_reused: usize,
}

/// Persist a deconstruction inside an open write transaction.
///
/// Interns units and groups, then resolves the dataset by content hash.
/// Identical content returns the existing dataset untouched.
pub fn persist_dataset<W>(
    tx: &mut W,
    decon: &Deconstruction,
    meta: &DatasetMeta,
    now: Timestamp,
) -> Result<IngestReport, DsdbError>
where
    W: TableWriter + ?Sized,
{
    let mut units_created = 0;
    let mut unit_ids = Vec::with_capacity(decon.units.len());
    for unit in &decon.units {
        let resolved = resolve(
            tx,
            |r| r.find_iota(&unit.key, &unit.value),
            |w| w.insert_iota(&unit.key, &unit.value, now),
        )?;
        units_created += usize::from(resolved.created);
        unit_ids.push(resolved.id);
    }

    let mut groups_created = 0;
    let mut group_ids = Vec::with_capacity(decon.groups.len());
    for draft in &decon.groups {
        let members = draft
            .members
            .iter()
            .map(|&m| {
                unit_ids.get(m).copied().ok_or_else(|| {
                    DsdbError::InvalidObject(format!("group references unknown unit {m}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let hash = group_hash(draft.ordering, &members);
        let resolved = resolve(
            tx,
            |r| r.find_group(&hash),
            |w| w.insert_group(hash, draft.ordering, &members, now),
        )?;
        groups_created += usize::from(resolved.created);
        group_ids.push(resolved.id);
    }

    let edges = decon
        .edges
        .iter()
        .map(|e| {
            group_ids
                .get(e.group)
                .copied()
                .map(|g| (g, e.label.as_str()))
                .ok_or_else(|| {
                    DsdbError::InvalidObject(format!("edge references unknown group {}", e.group))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    let edge_groups: Vec<GroupId> = edges.iter().map(|(g, _)| *g).collect();
    let content_hash = dataset_hash(decon.kind, &edge_groups);

    let report = |dataset: Dataset, created: bool| IngestReport {
        dataset,
        created,
        units_created,
        units_reused: decon.units.len() - units_created,
        groups_created,
        groups_reused: decon.groups.len() - groups_created,
    };

    if let Some(existing) = tx.find_dataset_by_hash(&content_hash)? {
        let dataset = load_dataset(&*tx, existing)?;
        debug!(dataset = %dataset.id, hash = %content_hash, "content already cataloged");
        return Ok(report(dataset, false));
    }

    let name = choose_name(&*tx, meta, &content_hash)?;
    let new = NewDataset {
        name: name.clone(),
        description: meta.description.clone(),
        introspector: decon.kind,
        content_hash,
        path_columns: meta.path_columns.clone(),
    };
    let id = match tx.insert_dataset(new, now)? {
        Insert::Created(id) => id,
        Insert::Conflict => {
            // Lost a race: identical content wins, a name clash is a conflict.
            if let Some(existing) = tx.find_dataset_by_hash(&content_hash)? {
                return Ok(report(load_dataset(&*tx, existing)?, false));
            }
            let existing = tx.find_dataset_by_name(&name)?.ok_or_else(missing_winner)?;
            return Err(DsdbError::DuplicateNameConflict { name, existing });
        }
    };

    for (group, label) in edges {
        let link = GroupDataset {
            group,
            dataset: id,
            label: label.to_string(),
            created: now,
        };
        if tx.insert_group_dataset(link)? == Insert::Conflict {
            return Err(DsdbError::InvalidObject(format!(
                "label {label} appears twice in one object"
            )));
        }
    }

    Ok(report(load_dataset(&*tx, id)?, true))
}

fn load_dataset<W: TableWriter + ?Sized>(tx: &W, id: DatasetId) -> Result<Dataset, DsdbError> {
    tx.dataset(id)?.ok_or(DsdbError::DatasetNotFound(id))
}

fn check_name(name: &str) -> Result<(), DsdbError> {
    if name.trim().is_empty() {
        return Err(DsdbError::InvalidObject(
            "dataset name must not be empty".to_string(),
        ));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(DsdbError::InvalidObject(format!(
            "dataset name exceeds {MAX_NAME_LENGTH} bytes"
        )));
    }
    Ok(())
}

fn choose_name<W: TableWriter + ?Sized>(
    tx: &W,
    meta: &DatasetMeta,
    hash: &ContentHash,
) -> Result<String, DsdbError> {
    let base = meta.name.clone().unwrap_or_else(|| hash.to_hex());
    check_name(&base)?;
    let Some(existing) = tx.find_dataset_by_name(&base)? else {
        return Ok(base);
    };
    match meta.on_name_conflict {
        NameConflictPolicy::Reject => Err(DsdbError::DuplicateNameConflict {
            name: base,
            existing,
        }),
        NameConflictPolicy::Version => {
            for version in 2..=MAX_NAME_VERSIONS {
                let candidate = format!("{base}@v{version}");
                if tx.find_dataset_by_name(&candidate)?.is_none() {
                    debug!(name = %candidate, "versioned dataset name");
                    return Ok(candidate);
                }
            }
            Err(DsdbError::DuplicateNameConflict {
                name: base,
                existing,
            })
        }
    }
}
