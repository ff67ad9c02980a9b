//! # Introspectors
//!
//! An introspector converts between one native object variant and the
//! atomic unit / group representation:
//!
//! - `validate`: run the validation pipeline over the object's fields
//! - `deconstruct`: pure decomposition into unit, group and edge drafts
//! - `reconstruct`: rebuild the object from a dataset's edges
//! - `package`: the object plus the files its path columns reference
//!
//! The catalog resolves an introspector through `IntrospectorRegistry` once
//! per write and records its kind on the Dataset. Reads use the recorded
//! kind only.

mod mapping;
mod opaque;
mod tabular;

pub use mapping::MappingIntrospector;
pub use opaque::OpaqueIntrospector;
pub use tabular::TabularIntrospector;

use crate::blob::BlobStore;
use crate::primitives::{LABEL_NAMESPACE, MAX_KEY_LENGTH};
use crate::validation::{FieldAccess, ValidationRules};
use crate::{
    CatalogObject, ContentAddress, DsdbError, GroupDataset, GroupId, IntrospectorKind,
    MemberOrdering, Value,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

// =============================================================================
// DECONSTRUCTION
// =============================================================================

/// An atomic unit before it has a store id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitDraft {
    pub key: String,
    /// Encoded value (see `formats::encode_value`).
    pub value: Vec<u8>,
}

/// A group before it has a store id. Members index into `Deconstruction::units`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDraft {
    pub members: Vec<usize>,
    pub ordering: MemberOrdering,
}

/// Binds a group (index into `Deconstruction::groups`) to a label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDraft {
    pub group: usize,
    pub label: String,
}

/// Output of `Introspector::deconstruct`.
///
/// Units and groups are unique within one deconstruction. Edges are in the
/// object's natural order (row order for tables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deconstruction {
    pub kind: IntrospectorKind,
    pub units: Vec<UnitDraft>,
    pub groups: Vec<GroupDraft>,
    pub edges: Vec<EdgeDraft>,
    /// Payloads the writer must put in the blob store before persisting.
    pub blobs: Vec<Vec<u8>>,
}

/// Collects drafts, folding duplicate units and groups onto one index.
#[derive(Debug)]
pub(crate) struct DeconstructionBuilder {
    kind: IntrospectorKind,
    units: Vec<UnitDraft>,
    unit_index: BTreeMap<(String, Vec<u8>), usize>,
    groups: Vec<GroupDraft>,
    group_index: BTreeMap<(MemberOrdering, Vec<usize>), usize>,
    edges: Vec<EdgeDraft>,
    blobs: Vec<Vec<u8>>,
}

impl DeconstructionBuilder {
    pub(crate) fn new(kind: IntrospectorKind) -> Self {
        Self {
            kind,
            units: Vec::new(),
            unit_index: BTreeMap::new(),
            groups: Vec::new(),
            group_index: BTreeMap::new(),
            edges: Vec::new(),
            blobs: Vec::new(),
        }
    }

    /// Intern a unit and return its index.
    pub(crate) fn unit(&mut self, key: &str, value: Vec<u8>) -> Result<usize, DsdbError> {
        check_key(key)?;
        let lookup = (key.to_string(), value);
        if let Some(&index) = self.unit_index.get(&lookup) {
            return Ok(index);
        }
        let index = self.units.len();
        self.units.push(UnitDraft {
            key: lookup.0.clone(),
            value: lookup.1.clone(),
        });
        self.unit_index.insert(lookup, index);
        Ok(index)
    }

    /// Intern a group and return its index.
    pub(crate) fn group(&mut self, members: Vec<usize>, ordering: MemberOrdering) -> usize {
        let mut identity = members.clone();
        if ordering == MemberOrdering::Unordered {
            identity.sort_unstable();
        }
        let lookup = (ordering, identity);
        if let Some(&index) = self.group_index.get(&lookup) {
            return index;
        }
        let index = self.groups.len();
        self.groups.push(GroupDraft { members, ordering });
        self.group_index.insert(lookup, index);
        index
    }

    pub(crate) fn edge(&mut self, group: usize, label: String) {
        self.edges.push(EdgeDraft { group, label });
    }

    pub(crate) fn blob(&mut self, bytes: Vec<u8>) {
        self.blobs.push(bytes);
    }

    /// Synthetic label for a singleton group: a UUID v5 over its units' content.
    ///
    /// Same content, same label, so deconstruction stays re-entrant.
    pub(crate) fn content_label(&self, group: usize) -> String {
        let mut units: Vec<&UnitDraft> = self
            .groups
            .get(group)
            .map(|g| g.members.iter().filter_map(|&m| self.units.get(m)).collect())
            .unwrap_or_default();
        units.sort_by(|a, b| (&a.key, &a.value).cmp(&(&b.key, &b.value)));

        let mut name = Vec::new();
        for unit in units {
            name.extend_from_slice(&(unit.key.len() as u64).to_le_bytes());
            name.extend_from_slice(unit.key.as_bytes());
            name.extend_from_slice(&(unit.value.len() as u64).to_le_bytes());
            name.extend_from_slice(&unit.value);
        }
        Uuid::new_v5(&LABEL_NAMESPACE, &name).to_string()
    }

    pub(crate) fn finish(self) -> Deconstruction {
        Deconstruction {
            kind: self.kind,
            units: self.units,
            groups: self.groups,
            edges: self.edges,
            blobs: self.blobs,
        }
    }
}

fn check_key(key: &str) -> Result<(), DsdbError> {
    if key.len() > MAX_KEY_LENGTH {
        return Err(DsdbError::InvalidObject(format!(
            "key exceeds {MAX_KEY_LENGTH} bytes: {}...",
            key.chars().take(32).collect::<String>()
        )));
    }
    Ok(())
}

// =============================================================================
// LOOKUP & PACKAGE
// =============================================================================

/// Read access an introspector needs to rebuild an object.
pub trait UnitLookup {
    /// The `(key, value)` pairs of a group, in member order.
    fn group_units(&self, group: GroupId) -> Result<Vec<(String, Value)>, DsdbError>;

    /// The bytes of a blob.
    fn blob(&self, address: &ContentAddress) -> Result<Vec<u8>, DsdbError>;
}

/// A rebuilt object plus the files referenced by its path columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub data: CatalogObject,
    pub files: Vec<PathBuf>,
}

/// Collect the text values of the given fields as paths, sorted and unique.
pub(crate) fn referenced_files(
    fields: &dyn FieldAccess,
    path_columns: &[String],
) -> Result<Vec<PathBuf>, DsdbError> {
    let mut files = std::collections::BTreeSet::new();
    for column in path_columns {
        if !fields.contains(column) {
            continue;
        }
        fields.visit(column, &mut |_, value| {
            if let Value::Text(path) = value {
                files.insert(PathBuf::from(path));
            }
            Ok(())
        })?;
    }
    Ok(files.into_iter().collect())
}

// =============================================================================
// INTROSPECTOR TRAIT
// =============================================================================

/// Converts between one object variant and atomic units.
pub trait Introspector: Send + Sync {
    /// The variant this introspector handles.
    fn kind(&self) -> IntrospectorKind;

    /// Apply the validation pipeline; may coerce or rewrite values in place.
    /// Files stored by `store_files` go to `blobs`.
    fn validate(
        &self,
        object: &mut CatalogObject,
        rules: &ValidationRules,
        blobs: &dyn BlobStore,
    ) -> Result<(), DsdbError>;

    /// Decompose an object. Pure: no store or blob access.
    fn deconstruct(&self, object: &CatalogObject) -> Result<Deconstruction, DsdbError>;

    /// Rebuild the object described by a dataset's edges.
    fn reconstruct(
        &self,
        edges: &[GroupDataset],
        lookup: &dyn UnitLookup,
    ) -> Result<CatalogObject, DsdbError>;

    /// The object plus the files its path columns reference.
    fn package(
        &self,
        object: CatalogObject,
        path_columns: &[String],
    ) -> Result<Package, DsdbError>;
}

pub(crate) fn variant_mismatch(expected: IntrospectorKind, object: &CatalogObject) -> DsdbError {
    DsdbError::VariantMismatch {
        expected,
        found: object.kind(),
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// Maps each `IntrospectorKind` to its implementation.
pub struct IntrospectorRegistry {
    entries: BTreeMap<IntrospectorKind, Box<dyn Introspector>>,
}

impl std::fmt::Debug for IntrospectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectorRegistry")
            .field("kinds", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl IntrospectorRegistry {
    /// A registry with no introspectors.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// The tabular, mapping and opaque introspectors.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(TabularIntrospector));
        registry.register(Box::new(MappingIntrospector));
        registry.register(Box::new(OpaqueIntrospector));
        registry
    }

    /// Register an introspector, replacing any previous one of the same kind.
    pub fn register(&mut self, introspector: Box<dyn Introspector>) {
        self.entries.insert(introspector.kind(), introspector);
    }

    #[must_use]
    pub fn get(&self, kind: IntrospectorKind) -> Option<&dyn Introspector> {
        self.entries.get(&kind).map(|b| b.as_ref())
    }

    #[must_use]
    pub fn kinds(&self) -> Vec<IntrospectorKind> {
        self.entries.keys().copied().collect()
    }
}

impl Default for IntrospectorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

// =============================================================================
// TEST SUPPORT
// =============================================================================

/// Serves a `Deconstruction` back as if it had been persisted:
/// group index `i` is `GroupId(i)`.
#[cfg(test)]
pub(crate) struct DraftLookup<'a> {
    pub(crate) decon: &'a Deconstruction,
}

#[cfg(test)]
impl DraftLookup<'_> {
    pub(crate) fn edges(&self) -> Vec<GroupDataset> {
        self.decon
            .edges
            .iter()
            .map(|e| GroupDataset {
                group: GroupId(e.group as u64),
                dataset: crate::DatasetId(1),
                label: e.label.clone(),
                created: chrono::Utc::now(),
            })
            .collect()
    }
}

#[cfg(test)]
impl UnitLookup for DraftLookup<'_> {
    fn group_units(&self, group: GroupId) -> Result<Vec<(String, Value)>, DsdbError> {
        let draft = self
            .decon
            .groups
            .get(group.0 as usize)
            .ok_or_else(|| DsdbError::ReconstructionMismatch(format!("no group {group}")))?;
        draft
            .members
            .iter()
            .map(|&m| {
                let unit = &self.decon.units[m];
                Ok((unit.key.clone(), crate::formats::decode_value(&unit.value)?))
            })
            .collect()
    }

    fn blob(&self, address: &ContentAddress) -> Result<Vec<u8>, DsdbError> {
        self.decon
            .blobs
            .iter()
            .find(|b| ContentAddress::of(b) == *address)
            .cloned()
            .ok_or_else(|| DsdbError::ReconstructionMismatch(format!("missing blob {address}")))
    }
}
