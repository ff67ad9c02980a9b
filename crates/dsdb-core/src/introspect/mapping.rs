//! Mapping introspector: a single unordered group, one unit per entry.

use super::{
    Deconstruction, DeconstructionBuilder, Introspector, Package, UnitLookup, referenced_files,
    variant_mismatch,
};
use crate::blob::BlobStore;
use crate::formats::encode_value;
use crate::validation::{FieldAccess, ValidationRules, Visit, VisitMut};
use crate::{
    CatalogObject, DsdbError, GroupDataset, IntrospectorKind, Mapping, MemberOrdering,
    ValidationFailure,
};

/// Handles `CatalogObject::Mapping`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappingIntrospector;

impl Introspector for MappingIntrospector {
    fn kind(&self) -> IntrospectorKind {
        IntrospectorKind::Mapping
    }

    fn validate(
        &self,
        object: &mut CatalogObject,
        rules: &ValidationRules,
        blobs: &dyn BlobStore,
    ) -> Result<(), DsdbError> {
        match object {
            CatalogObject::Mapping(mapping) => Ok(rules.apply(&mut MappingFields(mapping), blobs)?),
            other => Err(variant_mismatch(IntrospectorKind::Mapping, other)),
        }
    }

    fn deconstruct(&self, object: &CatalogObject) -> Result<Deconstruction, DsdbError> {
        let CatalogObject::Mapping(mapping) = object else {
            return Err(variant_mismatch(IntrospectorKind::Mapping, object));
        };

        let mut builder = DeconstructionBuilder::new(IntrospectorKind::Mapping);
        let mut members = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            members.push(builder.unit(key, encode_value(value)?)?);
        }
        let group = builder.group(members, MemberOrdering::Unordered);
        let label = builder.content_label(group);
        builder.edge(group, label);
        Ok(builder.finish())
    }

    fn reconstruct(
        &self,
        edges: &[GroupDataset],
        lookup: &dyn UnitLookup,
    ) -> Result<CatalogObject, DsdbError> {
        let [edge] = edges else {
            return Err(DsdbError::ReconstructionMismatch(format!(
                "mapping dataset must have exactly one group, found {}",
                edges.len()
            )));
        };

        let mut mapping = Mapping::new();
        for (key, value) in lookup.group_units(edge.group)? {
            if mapping.insert(key.clone(), value).is_some() {
                return Err(DsdbError::ReconstructionMismatch(format!(
                    "key {key} appears twice in group {}",
                    edge.group
                )));
            }
        }
        Ok(CatalogObject::Mapping(mapping))
    }

    fn package(
        &self,
        mut object: CatalogObject,
        path_columns: &[String],
    ) -> Result<Package, DsdbError> {
        let files = match &mut object {
            CatalogObject::Mapping(mapping) => {
                referenced_files(&MappingFields(mapping), path_columns)?
            }
            other => return Err(variant_mismatch(IntrospectorKind::Mapping, other)),
        };
        Ok(Package {
            data: object,
            files,
        })
    }
}

struct MappingFields<'a>(&'a mut Mapping);

impl FieldAccess for MappingFields<'_> {
    fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    fn visit(&self, field: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure> {
        match self.0.get(field) {
            Some(value) => visitor(None, value),
            None => Ok(()),
        }
    }

    fn visit_mut(&mut self, field: &str, visitor: &mut VisitMut<'_>) -> Result<(), ValidationFailure> {
        match self.0.get_mut(field) {
            Some(value) => visitor(None, value),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::blob::MemoryBlobStore;
    use crate::introspect::DraftLookup;
    use crate::{ValidationKind, Value, ValueType};

    fn mapping(pairs: &[(&str, Value)]) -> Mapping {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn single_unordered_group() {
        let object = CatalogObject::Mapping(mapping(&[
            ("lr", Value::Float(0.01)),
            ("epochs", Value::Int(10)),
        ]));
        let decon = MappingIntrospector.deconstruct(&object).unwrap();
        assert_eq!(decon.units.len(), 2);
        assert_eq!(decon.groups.len(), 1);
        assert_eq!(decon.groups[0].ordering, MemberOrdering::Unordered);
        assert_eq!(decon.edges.len(), 1);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut first = Mapping::new();
        first.insert("a".into(), Value::Int(1));
        first.insert("b".into(), Value::Int(2));
        let mut second = Mapping::new();
        second.insert("b".into(), Value::Int(2));
        second.insert("a".into(), Value::Int(1));
        let a = MappingIntrospector
            .deconstruct(&CatalogObject::Mapping(first))
            .unwrap();
        let b = MappingIntrospector
            .deconstruct(&CatalogObject::Mapping(second))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn roundtrip_through_drafts() {
        let object = CatalogObject::Mapping(mapping(&[
            ("name", Value::from("cells")),
            ("raw", Value::Bytes(vec![1, 2, 3])),
            ("missing", Value::Null),
        ]));
        let decon = MappingIntrospector.deconstruct(&object).unwrap();
        let lookup = DraftLookup { decon: &decon };
        let rebuilt = MappingIntrospector
            .reconstruct(&lookup.edges(), &lookup)
            .unwrap();
        assert_eq!(rebuilt, object);
    }

    #[test]
    fn empty_mapping_roundtrips() {
        let object = CatalogObject::Mapping(Mapping::new());
        let decon = MappingIntrospector.deconstruct(&object).unwrap();
        assert!(decon.units.is_empty());
        let lookup = DraftLookup { decon: &decon };
        let rebuilt = MappingIntrospector
            .reconstruct(&lookup.edges(), &lookup)
            .unwrap();
        assert_eq!(rebuilt, object);
    }

    #[test]
    fn labels_differ_with_content() {
        let a = MappingIntrospector
            .deconstruct(&CatalogObject::Mapping(mapping(&[("k", Value::Int(1))])))
            .unwrap();
        let b = MappingIntrospector
            .deconstruct(&CatalogObject::Mapping(mapping(&[("k", Value::Int(2))])))
            .unwrap();
        assert_ne!(a.edges[0].label, b.edges[0].label);
    }

    #[test]
    fn validate_checks_types_per_key() {
        let mut object = CatalogObject::Mapping(mapping(&[("epochs", Value::from("ten"))]));
        let rules = ValidationRules::new().expect_type("epochs", ValueType::Int);
        let err = MappingIntrospector
            .validate(&mut object, &rules, &MemoryBlobStore::new())
            .unwrap_err();
        match err {
            DsdbError::Validation(failure) => {
                assert_eq!(failure.kind, ValidationKind::TypeMismatch);
                assert_eq!(failure.location.record, None);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
