//! Opaque introspector: the object becomes one blob.
//!
//! A single unit keyed `obj` holds the blob's content address as hex text,
//! wrapped in a single unordered group.

use super::{
    Deconstruction, DeconstructionBuilder, Introspector, Package, UnitLookup, variant_mismatch,
};
use crate::blob::BlobStore;
use crate::formats::encode_value;
use crate::primitives::OPAQUE_KEY;
use crate::validation::{FieldAccess, ValidationRules, Visit, VisitMut};
use crate::{
    CatalogObject, ContentAddress, DsdbError, GroupDataset, IntrospectorKind, Location,
    MemberOrdering, OpaqueObject, ValidationFailure, ValidationKind, Value,
};

/// Handles `CatalogObject::Opaque`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpaqueIntrospector;

impl Introspector for OpaqueIntrospector {
    fn kind(&self) -> IntrospectorKind {
        IntrospectorKind::Opaque
    }

    fn validate(
        &self,
        object: &mut CatalogObject,
        rules: &ValidationRules,
        blobs: &dyn BlobStore,
    ) -> Result<(), DsdbError> {
        match object {
            CatalogObject::Opaque(opaque) => Ok(rules.apply(&mut OpaqueFields(opaque), blobs)?),
            other => Err(variant_mismatch(IntrospectorKind::Opaque, other)),
        }
    }

    fn deconstruct(&self, object: &CatalogObject) -> Result<Deconstruction, DsdbError> {
        let CatalogObject::Opaque(opaque) = object else {
            return Err(variant_mismatch(IntrospectorKind::Opaque, object));
        };

        let blob = postcard::to_stdvec(opaque)
            .map_err(|e| DsdbError::SerializationError(e.to_string()))?;
        let address = ContentAddress::of(&blob);

        let mut builder = DeconstructionBuilder::new(IntrospectorKind::Opaque);
        let unit = builder.unit(OPAQUE_KEY, encode_value(&Value::Text(address.to_hex()))?)?;
        let group = builder.group(vec![unit], MemberOrdering::Unordered);
        let label = builder.content_label(group);
        builder.edge(group, label);
        builder.blob(blob);
        Ok(builder.finish())
    }

    fn reconstruct(
        &self,
        edges: &[GroupDataset],
        lookup: &dyn UnitLookup,
    ) -> Result<CatalogObject, DsdbError> {
        let [edge] = edges else {
            return Err(DsdbError::ReconstructionMismatch(format!(
                "opaque dataset must have exactly one group, found {}",
                edges.len()
            )));
        };

        let units = lookup.group_units(edge.group)?;
        let address = match units.as_slice() {
            [(key, Value::Text(hex))] if key == OPAQUE_KEY => ContentAddress::from_hex(hex)
                .map_err(|e| DsdbError::ReconstructionMismatch(e.to_string()))?,
            _ => {
                return Err(DsdbError::ReconstructionMismatch(format!(
                    "group {} does not hold a single '{OPAQUE_KEY}' address",
                    edge.group
                )));
            }
        };

        let bytes = lookup.blob(&address)?;
        let opaque: OpaqueObject = postcard::from_bytes(&bytes)
            .map_err(|e| DsdbError::ReconstructionMismatch(format!("blob {address}: {e}")))?;
        Ok(CatalogObject::Opaque(opaque))
    }

    fn package(
        &self,
        object: CatalogObject,
        _path_columns: &[String],
    ) -> Result<Package, DsdbError> {
        if !matches!(object, CatalogObject::Opaque(_)) {
            return Err(variant_mismatch(IntrospectorKind::Opaque, &object));
        }
        Ok(Package {
            data: object,
            files: Vec::new(),
        })
    }
}

/// Exposes the payload as a single read-only `obj` field of bytes.
struct OpaqueFields<'a>(&'a OpaqueObject);

impl FieldAccess for OpaqueFields<'_> {
    fn contains(&self, field: &str) -> bool {
        field == OPAQUE_KEY
    }

    fn visit(&self, field: &str, visitor: &mut Visit<'_>) -> Result<(), ValidationFailure> {
        if field != OPAQUE_KEY {
            return Ok(());
        }
        visitor(None, &Value::Bytes(self.0.payload.clone()))
    }

    fn visit_mut(&mut self, field: &str, visitor: &mut VisitMut<'_>) -> Result<(), ValidationFailure> {
        if field != OPAQUE_KEY {
            return Ok(());
        }
        let original = Value::Bytes(self.0.payload.clone());
        let mut value = original.clone();
        visitor(None, &mut value)?;
        if value != original {
            return Err(ValidationFailure {
                kind: ValidationKind::CoercionFailure,
                location: Location {
                    field: OPAQUE_KEY.to_string(),
                    record: None,
                },
                detail: "opaque objects cannot be modified".to_string(),
            });
        }
        Ok(())
    }
}
