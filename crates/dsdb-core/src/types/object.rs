//! Native object variants handled by the introspectors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{DsdbError, IntrospectorKind, Value};

/// Rows by named columns.
///
/// Column names are unique and kept sorted; every row holds exactly one value
/// per column, aligned to `columns()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Create an empty table with the given columns.
    pub fn new<I, S>(columns: I) -> Result<Self, DsdbError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = BTreeSet::new();
        for column in columns {
            let column = column.into();
            if column.is_empty() {
                return Err(DsdbError::InvalidObject(
                    "column names must not be empty".to_string(),
                ));
            }
            if !seen.insert(column.clone()) {
                return Err(DsdbError::InvalidObject(format!(
                    "duplicate column: {column}"
                )));
            }
        }
        Ok(Self {
            columns: seen.into_iter().collect(),
            rows: Vec::new(),
        })
    }

    /// Build a table from records, using the union of their keys as columns.
    ///
    /// Keys missing from a record become `Null`.
    pub fn from_records<I>(records: I) -> Result<Self, DsdbError>
    where
        I: IntoIterator<Item = BTreeMap<String, Value>>,
    {
        let records: Vec<_> = records.into_iter().collect();
        let columns: BTreeSet<&String> = records.iter().flat_map(|r| r.keys()).collect();
        let mut table = Self::new(columns.into_iter().cloned())?;
        for record in records {
            table.push_record(record)?;
        }
        Ok(table)
    }

    /// Append a row whose values are aligned to `columns()`.
    pub fn push_row(&mut self, values: Vec<Value>) -> Result<(), DsdbError> {
        if values.len() != self.columns.len() {
            return Err(DsdbError::InvalidObject(format!(
                "row {} has {} values, expected {}",
                self.rows.len(),
                values.len(),
                self.columns.len()
            )));
        }
        self.rows.push(values);
        Ok(())
    }

    /// Append a row given as column → value. Missing columns become `Null`.
    pub fn push_record(&mut self, mut record: BTreeMap<String, Value>) -> Result<(), DsdbError> {
        let mut row = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            row.push(record.remove(column).unwrap_or(Value::Null));
        }
        if let Some(unknown) = record.keys().next() {
            return Err(DsdbError::InvalidObject(format!(
                "unknown column in row {}: {unknown}",
                self.rows.len()
            )));
        }
        self.rows.push(row);
        Ok(())
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of a column in `columns()`.
    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.binary_search_by(|c| c.as_str().cmp(name)).ok()
    }

    #[must_use]
    pub fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.column_index(column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    pub(crate) fn cell_mut(&mut self, row: usize, col: usize) -> Option<&mut Value> {
        self.rows.get_mut(row).and_then(|r| r.get_mut(col))
    }

    /// One row as column → value.
    #[must_use]
    pub fn record(&self, row: usize) -> Option<BTreeMap<String, Value>> {
        let values = self.rows.get(row)?;
        Some(
            self.columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect(),
        )
    }
}

/// Flat key → value structure.
pub type Mapping = BTreeMap<String, Value>;

/// An arbitrary serializable object, kept as one blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpaqueObject {
    /// Rust type name recorded at encode time.
    pub type_name: String,
    /// postcard encoding of the value.
    pub payload: Vec<u8>,
}

impl OpaqueObject {
    /// Wrap already-serialized bytes.
    #[must_use]
    pub fn from_bytes(type_name: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }

    /// Serialize a value with postcard.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, DsdbError> {
        let payload = postcard::to_stdvec(value)
            .map_err(|e| DsdbError::SerializationError(e.to_string()))?;
        Ok(Self {
            type_name: std::any::type_name::<T>().to_string(),
            payload,
        })
    }

    /// Deserialize the payload back into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, DsdbError> {
        postcard::from_bytes(&self.payload)
            .map_err(|e| DsdbError::SerializationError(e.to_string()))
    }
}

/// Any object the catalog can store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CatalogObject {
    Table(Table),
    Mapping(Mapping),
    Opaque(OpaqueObject),
}

impl CatalogObject {
    /// The introspector variant this object belongs to.
    #[must_use]
    pub fn kind(&self) -> IntrospectorKind {
        match self {
            CatalogObject::Table(_) => IntrospectorKind::Tabular,
            CatalogObject::Mapping(_) => IntrospectorKind::Mapping,
            CatalogObject::Opaque(_) => IntrospectorKind::Opaque,
        }
    }
}

impl From<Table> for CatalogObject {
    fn from(table: Table) -> Self {
        CatalogObject::Table(table)
    }
}

impl From<Mapping> for CatalogObject {
    fn from(mapping: Mapping) -> Self {
        CatalogObject::Mapping(mapping)
    }
}

impl From<OpaqueObject> for CatalogObject {
    fn from(object: OpaqueObject) -> Self {
        CatalogObject::Opaque(object)
    }
}
