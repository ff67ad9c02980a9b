//! # Validation Pipeline
//!
//! Optional checks applied to an object before it is decomposed.
//!
//! Steps run in a fixed order, each skipped entirely when not configured:
//!
//! 1. Type coercion (`coerce_types` + a type map)
//! 2. Path rewriting (`rewrite_path` substitutions on path columns)
//! 3. File existence (`require_files` on path columns)
//! 4. File storage (`store_files`: copy each referenced file into the blob
//!    store and point the cell at the stored copy)
//! 5. Type enforcement (the type map)
//! 6. Value predicates (`check_value`)
//!
//! The first failing record stops the pipeline. No catalog table is written
//! before the pipeline succeeds; files copied by step 4 stay in the blob
//! store, where the next identical copy reuses them.

use crate::blob::BlobStore;
use crate::{Location, ValidationFailure, ValidationKind, Value, ValueType};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

// =============================================================================
// FIELD ACCESS
// =============================================================================

/// Visitor over the values of one field. `record` is the row index, if any.
pub type Visit<'a> = dyn FnMut(Option<usize>, &Value) -> Result<(), ValidationFailure> + 'a;

/// Mutable visitor over the values of one field.
pub type VisitMut<'a> =
    dyn FnMut(Option<usize>, &mut Value) -> Result<(), ValidationFailure> + 'a;

/// Field-level view of an object, implemented by each introspector.
pub trait FieldAccess {
    fn contains(&self, field: &str) -> bool;

    fn visit(&self, field: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure>;

    fn visit_mut(&mut self, field: &str, visitor: &mut VisitMut<'_>)
    -> Result<(), ValidationFailure>;
}

// =============================================================================
// RULES
// =============================================================================

/// A named predicate over a single value.
#[derive(Clone)]
pub struct ValuePredicate {
    pub field: String,
    pub name: String,
    check: Arc<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl ValuePredicate {
    #[must_use]
    pub fn accepts(&self, value: &Value) -> bool {
        (self.check)(value)
    }
}

impl fmt::Debug for ValuePredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuePredicate")
            .field("field", &self.field)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Validation configuration for one ingest.
///
/// The default rules run no step at all.
#[derive(Debug, Clone, Default)]
pub struct ValidationRules {
    types: BTreeMap<String, ValueType>,
    coerce: bool,
    path_columns: BTreeSet<String>,
    rewrites: Vec<(String, String)>,
    require_files: bool,
    store_files: bool,
    predicates: Vec<ValuePredicate>,
}

impl ValidationRules {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the type of a field.
    #[must_use]
    pub fn expect_type(mut self, field: impl Into<String>, ty: ValueType) -> Self {
        self.types.insert(field.into(), ty);
        self
    }

    /// Cast values to their declared types before type enforcement.
    #[must_use]
    pub fn coerce_types(mut self, enabled: bool) -> Self {
        self.coerce = enabled;
        self
    }

    /// Declare a field as holding filesystem paths.
    #[must_use]
    pub fn path_column(mut self, field: impl Into<String>) -> Self {
        self.path_columns.insert(field.into());
        self
    }

    /// Replace `from` with `to` in every path column value. Applied in order.
    #[must_use]
    pub fn rewrite_path(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rewrites.push((from.into(), to.into()));
        self
    }

    /// Require every path column value to name an existing file.
    #[must_use]
    pub fn require_files(mut self, enabled: bool) -> Self {
        self.require_files = enabled;
        self
    }

    /// Copy every file named in a path column into the blob store and
    /// replace the cell with the stored copy's path, or with its hex address
    /// when the store keeps no files.
    #[must_use]
    pub fn store_files(mut self, enabled: bool) -> Self {
        self.store_files = enabled;
        self
    }

    /// Reject any value of `field` for which `check` returns false.
    #[must_use]
    pub fn check_value<F>(mut self, field: impl Into<String>, name: impl Into<String>, check: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.predicates.push(ValuePredicate {
            field: field.into(),
            name: name.into(),
            check: Arc::new(check),
        });
        self
    }

    /// Declared path columns, sorted.
    #[must_use]
    pub fn path_columns(&self) -> Vec<String> {
        self.path_columns.iter().cloned().collect()
    }

    #[must_use]
    pub fn types(&self) -> &BTreeMap<String, ValueType> {
        &self.types
    }

    /// True when no step would run.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
            && self.rewrites.is_empty()
            && !self.require_files
            && !self.store_files
            && self.predicates.is_empty()
    }

    /// Run every configured step against `fields`. `blobs` receives the
    /// files copied by `store_files`.
    pub fn apply(
        &self,
        fields: &mut dyn FieldAccess,
        blobs: &dyn BlobStore,
    ) -> Result<(), ValidationFailure> {
        if self.coerce && !self.types.is_empty() {
            self.coerce_step(fields)?;
        }
        if !self.rewrites.is_empty() {
            self.rewrite_step(fields)?;
        }
        if self.require_files {
            self.files_step(fields)?;
        }
        if self.store_files {
            self.store_step(fields, blobs)?;
        }
        if !self.types.is_empty() {
            self.type_step(fields)?;
        }
        if !self.predicates.is_empty() {
            self.predicate_step(fields)?;
        }
        Ok(())
    }

    fn coerce_step(&self, fields: &mut dyn FieldAccess) -> Result<(), ValidationFailure> {
        for (field, &ty) in &self.types {
            require_field(fields, field)?;
            fields.visit_mut(field, &mut |record, value| {
                match value.coerce(ty) {
                    Some(cast) => {
                        *value = cast;
                        Ok(())
                    }
                    None => Err(failure(
                        ValidationKind::CoercionFailure,
                        field,
                        record,
                        format!("cannot cast '{value}' to {ty}"),
                    )),
                }
            })?;
        }
        Ok(())
    }

    fn rewrite_step(&self, fields: &mut dyn FieldAccess) -> Result<(), ValidationFailure> {
        for field in &self.path_columns {
            require_field(fields, field)?;
            fields.visit_mut(field, &mut |_, value| {
                if let Value::Text(path) = value {
                    let mut rewritten = path.clone();
                    for (from, to) in &self.rewrites {
                        rewritten = rewritten.replace(from.as_str(), to);
                    }
                    *path = rewritten;
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    fn files_step(&self, fields: &mut dyn FieldAccess) -> Result<(), ValidationFailure> {
        for field in &self.path_columns {
            require_field(fields, field)?;
            fields.visit(field, &mut |record, value| match value {
                Value::Null => Ok(()),
                Value::Text(path) if Path::new(path).exists() => Ok(()),
                Value::Text(path) => Err(failure(
                    ValidationKind::FileMissing,
                    field,
                    record,
                    path.clone(),
                )),
                other => Err(failure(
                    ValidationKind::FileMissing,
                    field,
                    record,
                    format!("not a path: {other}"),
                )),
            })?;
        }
        Ok(())
    }

    fn store_step(
        &self,
        fields: &mut dyn FieldAccess,
        blobs: &dyn BlobStore,
    ) -> Result<(), ValidationFailure> {
        for field in &self.path_columns {
            require_field(fields, field)?;
            fields.visit_mut(field, &mut |record, value| match value {
                Value::Null => Ok(()),
                Value::Text(path) => {
                    let bytes = std::fs::read(path.as_str()).map_err(|e| {
                        let kind = if e.kind() == ErrorKind::NotFound {
                            ValidationKind::FileMissing
                        } else {
                            ValidationKind::FileNotStored
                        };
                        failure(kind, field, record, format!("{path}: {e}"))
                    })?;
                    let address = blobs.get_or_create(&bytes).map_err(|e| {
                        failure(
                            ValidationKind::FileNotStored,
                            field,
                            record,
                            format!("{path}: {e}"),
                        )
                    })?;
                    debug!(path = %path, address = %address, "stored referenced file");
                    *path = blobs.locate(&address).map_or_else(
                        || address.to_hex(),
                        |stored| stored.to_string_lossy().into_owned(),
                    );
                    Ok(())
                }
                other => Err(failure(
                    ValidationKind::FileMissing,
                    field,
                    record,
                    format!("not a path: {other}"),
                )),
            })?;
        }
        Ok(())
    }

    fn type_step(&self, fields: &mut dyn FieldAccess) -> Result<(), ValidationFailure> {
        for (field, &ty) in &self.types {
            require_field(fields, field)?;
            fields.visit(field, &mut |record, value| {
                if value.conforms_to(ty) {
                    return Ok(());
                }
                let found = value.value_type().map_or("null", |t| t.as_str());
                Err(failure(
                    ValidationKind::TypeMismatch,
                    field,
                    record,
                    format!("expected {ty}, found {found}"),
                ))
            })?;
        }
        Ok(())
    }

    fn predicate_step(&self, fields: &mut dyn FieldAccess) -> Result<(), ValidationFailure> {
        for predicate in &self.predicates {
            require_field(fields, &predicate.field)?;
            fields.visit(&predicate.field, &mut |record, value| {
                if predicate.accepts(value) {
                    return Ok(());
                }
                Err(failure(
                    ValidationKind::ValueRejected,
                    &predicate.field,
                    record,
                    format!("'{value}' rejected by {}", predicate.name),
                ))
            })?;
        }
        Ok(())
    }
}

fn require_field(fields: &dyn FieldAccess, field: &str) -> Result<(), ValidationFailure> {
    if fields.contains(field) {
        Ok(())
    } else {
        Err(failure(
            ValidationKind::MissingField,
            field,
            None,
            "no such field".to_string(),
        ))
    }
}

fn failure(
    kind: ValidationKind,
    field: &str,
    record: Option<usize>,
    detail: String,
) -> ValidationFailure {
    ValidationFailure {
        kind,
        location: Location {
            field: field.to_string(),
            record,
        },
        detail,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::blob::{BlobStoreConfig, FsBlobStore, MemoryBlobStore};
    use crate::ContentAddress;

    /// Single-column fixture.
    struct Column {
        name: &'static str,
        values: Vec<Value>,
    }

    impl FieldAccess for Column {
        fn contains(&self, field: &str) -> bool {
            field == self.name
        }

        fn visit(&self, _: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure> {
            for (i, v) in self.values.iter().enumerate() {
                visitor(Some(i), v)?;
            }
            Ok(())
        }

        fn visit_mut(
            &mut self,
            _: &str,
            visitor: &mut VisitMut<'_>,
        ) -> Result<(), ValidationFailure> {
            for (i, v) in self.values.iter_mut().enumerate() {
                visitor(Some(i), v)?;
            }
            Ok(())
        }
    }

    fn column(values: Vec<Value>) -> Column {
        Column { name: "c", values }
    }

    #[test]
    fn empty_rules_do_nothing() {
        let rules = ValidationRules::new();
        assert!(rules.is_empty());
        let mut col = column(vec![Value::from("x")]);
        rules.apply(&mut col, &MemoryBlobStore::new()).unwrap();
    }

    #[test]
    fn type_mismatch_without_coercion() {
        let rules = ValidationRules::new().expect_type("c", ValueType::Int);
        let mut col = column(vec![Value::Int(1), Value::from("2")]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::TypeMismatch);
        assert_eq!(err.location.record, Some(1));
    }

    #[test]
    fn coercion_runs_before_type_check() {
        let rules = ValidationRules::new()
            .expect_type("c", ValueType::Int)
            .coerce_types(true);
        let mut col = column(vec![Value::Int(1), Value::from("2")]);
        rules.apply(&mut col, &MemoryBlobStore::new()).unwrap();
        assert_eq!(col.values, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn coercion_failure_reported() {
        let rules = ValidationRules::new()
            .expect_type("c", ValueType::Int)
            .coerce_types(true);
        let mut col = column(vec![Value::from("two")]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::CoercionFailure);
    }

    #[test]
    fn missing_field_reported() {
        let rules = ValidationRules::new().check_value("nope", "any", |_| true);
        let mut col = column(vec![]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::MissingField);
    }

    #[test]
    fn rewrite_then_file_check() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"a").unwrap();
        let root = dir.path().to_string_lossy().to_string();

        let rules = ValidationRules::new()
            .path_column("c")
            .rewrite_path("/old/root", root.clone())
            .require_files(true);
        let mut col = column(vec![Value::from("/old/root/a.txt")]);
        rules.apply(&mut col, &MemoryBlobStore::new()).unwrap();
        assert_eq!(
            col.values[0],
            Value::Text(file.to_string_lossy().to_string())
        );
    }

    #[test]
    fn missing_file_reported() {
        let rules = ValidationRules::new().path_column("c").require_files(true);
        let mut col = column(vec![Value::from("/definitely/not/here.bin")]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::FileMissing);
    }

    #[test]
    fn stored_file_address_resolves_to_file_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.tif");
        std::fs::write(&file, b"pixels").unwrap();

        let blobs = MemoryBlobStore::new();
        let rules = ValidationRules::new().path_column("c").store_files(true);
        let mut col = column(vec![Value::from(file.to_string_lossy().to_string()), Value::Null]);
        rules.apply(&mut col, &blobs).unwrap();

        let Value::Text(stored) = &col.values[0] else {
            panic!("path cell must stay text");
        };
        let address = ContentAddress::from_hex(stored).unwrap();
        assert_eq!(blobs.read(&address).unwrap().unwrap(), b"pixels");
        assert_eq!(col.values[1], Value::Null);

        // The stored copy outlives the original file.
        std::fs::remove_file(&file).unwrap();
        assert_eq!(blobs.read(&address).unwrap().unwrap(), b"pixels");
    }

    #[test]
    fn stored_file_points_at_blob_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("scan.tif");
        std::fs::write(&file, b"pixels").unwrap();
        let blobs = FsBlobStore::new(BlobStoreConfig::new(dir.path().join("blobs"))).unwrap();

        let rules = ValidationRules::new().path_column("c").store_files(true);
        let mut col = column(vec![Value::from(file.to_string_lossy().to_string())]);
        rules.apply(&mut col, &blobs).unwrap();

        let Value::Text(stored) = &col.values[0] else {
            panic!("path cell must stay text");
        };
        assert!(Path::new(stored).starts_with(dir.path().join("blobs")));
        assert_eq!(std::fs::read(stored).unwrap(), b"pixels");
    }

    #[test]
    fn predicates_see_stored_address() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.bin");
        std::fs::write(&file, b"a").unwrap();
        let rules = ValidationRules::new()
            .path_column("c")
            .store_files(true)
            .check_value("c", "stored", |v| {
                v.as_text().is_some_and(|t| ContentAddress::from_hex(t).is_ok())
            });
        let mut col = column(vec![Value::from(file.to_string_lossy().to_string())]);
        rules.apply(&mut col, &MemoryBlobStore::new()).unwrap();
    }

    #[test]
    fn storing_missing_file_reported() {
        let rules = ValidationRules::new().path_column("c").store_files(true);
        let mut col = column(vec![Value::from("/definitely/not/here.bin")]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::FileMissing);
        assert_eq!(err.location.record, Some(0));
    }

    #[test]
    fn predicate_rejects_first_failing_row() {
        let rules = ValidationRules::new().check_value("c", "positive", |v| {
            v.as_int().is_some_and(|i| i > 0)
        });
        let mut col = column(vec![Value::Int(3), Value::Int(-1), Value::Int(-2)]);
        let err = rules.apply(&mut col, &MemoryBlobStore::new()).unwrap_err();
        assert_eq!(err.kind, ValidationKind::ValueRejected);
        assert_eq!(err.location.record, Some(1));
        assert!(err.detail.contains("positive"));
    }
}
