//! Tabular introspector: one group per row, one unit per cell.
//!
//! Groups are `Ordered` in column order and labeled with the row index.
//! Rows are encoded in parallel above `PARALLEL_ROW_THRESHOLD`; interning
//! happens afterwards in row order so the output never depends on scheduling.

use super::{
    Deconstruction, DeconstructionBuilder, Introspector, Package, UnitLookup, referenced_files,
    variant_mismatch,
};
use crate::blob::BlobStore;
use crate::formats::encode_value;
use crate::primitives::PARALLEL_ROW_THRESHOLD;
use crate::validation::{FieldAccess, ValidationRules, Visit, VisitMut};
use crate::{
    CatalogObject, DsdbError, GroupDataset, IntrospectorKind, MemberOrdering, Table,
    ValidationFailure, Value,
};
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Handles `CatalogObject::Table`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TabularIntrospector;

impl TabularIntrospector {
    fn table(object: &CatalogObject) -> Result<&Table, DsdbError> {
        match object {
            CatalogObject::Table(table) => Ok(table),
            other => Err(variant_mismatch(IntrospectorKind::Tabular, other)),
        }
    }
}

fn encode_row(row: &[Value]) -> Result<Vec<Vec<u8>>, DsdbError> {
    row.iter().map(encode_value).collect()
}

impl Introspector for TabularIntrospector {
    fn kind(&self) -> IntrospectorKind {
        IntrospectorKind::Tabular
    }

    fn validate(
        &self,
        object: &mut CatalogObject,
        rules: &ValidationRules,
        blobs: &dyn BlobStore,
    ) -> Result<(), DsdbError> {
        match object {
            CatalogObject::Table(table) => Ok(rules.apply(&mut TableFields(table), blobs)?),
            other => Err(variant_mismatch(IntrospectorKind::Tabular, other)),
        }
    }

    fn deconstruct(&self, object: &CatalogObject) -> Result<Deconstruction, DsdbError> {
        let table = Self::table(object)?;
        if table.is_empty() {
            return Err(DsdbError::InvalidObject(
                "empty tables cannot be cataloged".to_string(),
            ));
        }

        let encoded: Vec<Vec<Vec<u8>>> = if table.row_count() >= PARALLEL_ROW_THRESHOLD {
            table
                .rows()
                .par_iter()
                .map(|row| encode_row(row))
                .collect::<Result<_, _>>()?
        } else {
            table
                .rows()
                .iter()
                .map(|row| encode_row(row))
                .collect::<Result<_, _>>()?
        };

        let mut builder = DeconstructionBuilder::new(IntrospectorKind::Tabular);
        for (index, row) in encoded.into_iter().enumerate() {
            let mut members = Vec::with_capacity(row.len());
            for (column, value) in table.columns().iter().zip(row) {
                members.push(builder.unit(column, value)?);
            }
            let group = builder.group(members, MemberOrdering::Ordered);
            builder.edge(group, index.to_string());
        }
        Ok(builder.finish())
    }

    fn reconstruct(
        &self,
        edges: &[GroupDataset],
        lookup: &dyn UnitLookup,
    ) -> Result<CatalogObject, DsdbError> {
        if edges.is_empty() {
            return Err(DsdbError::ReconstructionMismatch(
                "tabular dataset has no rows".to_string(),
            ));
        }

        let mut by_row = BTreeMap::new();
        for edge in edges {
            let row: usize = edge.label.parse().map_err(|_| {
                DsdbError::ReconstructionMismatch(format!(
                    "row label is not an index: {}",
                    edge.label
                ))
            })?;
            if by_row.insert(row, edge.group).is_some() {
                return Err(DsdbError::ReconstructionMismatch(format!(
                    "row {row} appears twice"
                )));
            }
        }
        if by_row.keys().copied().ne(0..by_row.len()) {
            return Err(DsdbError::ReconstructionMismatch(
                "row labels are not contiguous".to_string(),
            ));
        }

        let mut records = Vec::with_capacity(by_row.len());
        for group in by_row.into_values() {
            let mut record = BTreeMap::new();
            for (key, value) in lookup.group_units(group)? {
                if record.insert(key.clone(), value).is_some() {
                    return Err(DsdbError::ReconstructionMismatch(format!(
                        "column {key} appears twice in group {group}"
                    )));
                }
            }
            records.push(record);
        }
        Ok(CatalogObject::Table(Table::from_records(records)?))
    }

    fn package(
        &self,
        mut object: CatalogObject,
        path_columns: &[String],
    ) -> Result<Package, DsdbError> {
        let files = match &mut object {
            CatalogObject::Table(table) => referenced_files(&TableFields(table), path_columns)?,
            other => return Err(variant_mismatch(IntrospectorKind::Tabular, other)),
        };
        Ok(Package {
            data: object,
            files,
        })
    }
}

// =============================================================================
// FIELD ACCESS
// =============================================================================

struct TableFields<'a>(&'a mut Table);

fn visit_rows(table: &Table, field: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure> {
    let Some(col) = table.column_index(field) else {
        return Ok(());
    };
    for (index, row) in table.rows().iter().enumerate() {
        if let Some(value) = row.get(col) {
            visitor(Some(index), value)?;
        }
    }
    Ok(())
}

impl FieldAccess for TableFields<'_> {
    fn contains(&self, field: &str) -> bool {
        self.0.column_index(field).is_some()
    }

    fn visit(&self, field: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure> {
        visit_rows(self.0, field, visitor)
    }

    fn visit_mut(&mut self, field: &str, visitor: &mut VisitMut<'_>) -> Result<(), ValidationFailure> {
        let Some(col) = self.0.column_index(field) else {
            return Ok(());
        };
        for row in 0..self.0.row_count() {
            if let Some(value) = self.0.cell_mut(row, col) {
                visitor(Some(row), value)?;
            }
        }
        Ok(())
    }
}
