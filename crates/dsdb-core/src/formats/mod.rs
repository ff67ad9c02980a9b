//! # Encoding Formats
//!
//! Stable byte encodings used by the catalog.
//!
//! Format: Version (1 byte) + postcard payload.
//! - Values: `VALUE_FORMAT_VERSION`, the bytes stored in `Iota::value` and
//!   fed into the unit index digest.
//! - Records: `RECORD_FORMAT_VERSION`, the bytes stored in redb tables.
//! - Objects: `OBJECT_FORMAT_VERSION`, a whole `CatalogObject` put in the
//!   blob store for later ingestion.
//!
//! postcard encodes a given value to the same bytes every time, which the
//! hash cascade relies on.

use crate::primitives::{OBJECT_FORMAT_VERSION, RECORD_FORMAT_VERSION, VALUE_FORMAT_VERSION};
use crate::{CatalogObject, DsdbError, Value};
use serde::Serialize;
use serde::de::DeserializeOwned;

// =============================================================================
// VALUES
// =============================================================================

/// Encode a value for storage in an atomic unit.
pub fn encode_value(value: &Value) -> Result<Vec<u8>, DsdbError> {
    encode_versioned(VALUE_FORMAT_VERSION, value)
}

/// Decode the bytes of an atomic unit.
pub fn decode_value(bytes: &[u8]) -> Result<Value, DsdbError> {
    decode_versioned(VALUE_FORMAT_VERSION, bytes)
}

// =============================================================================
// RECORDS
// =============================================================================

/// Encode a store record.
pub fn encode_record<T: Serialize>(record: &T) -> Result<Vec<u8>, DsdbError> {
    encode_versioned(RECORD_FORMAT_VERSION, record)
}

/// Decode a store record.
pub fn decode_record<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DsdbError> {
    decode_versioned(RECORD_FORMAT_VERSION, bytes)
}

// =============================================================================
// OBJECTS
// =============================================================================

/// Encode a whole object, e.g. to hand it to the catalog through a blob.
pub fn encode_object(object: &CatalogObject) -> Result<Vec<u8>, DsdbError> {
    encode_versioned(OBJECT_FORMAT_VERSION, object)
}

pub fn decode_object(bytes: &[u8]) -> Result<CatalogObject, DsdbError> {
    decode_versioned(OBJECT_FORMAT_VERSION, bytes)
}

fn encode_versioned<T: Serialize>(version: u8, value: &T) -> Result<Vec<u8>, DsdbError> {
    let mut bytes = vec![version];
    let payload =
        postcard::to_stdvec(value).map_err(|e| DsdbError::SerializationError(e.to_string()))?;
    bytes.extend_from_slice(&payload);
    Ok(bytes)
}

fn decode_versioned<T: DeserializeOwned>(version: u8, bytes: &[u8]) -> Result<T, DsdbError> {
    let Some((&found, payload)) = bytes.split_first() else {
        return Err(DsdbError::SerializationError(
            "empty encoded value".to_string(),
        ));
    };
    if found != version {
        return Err(DsdbError::SerializationError(format!(
            "Unsupported version: {found} (expected {version})"
        )));
    }
    postcard::from_bytes(payload).map_err(|e| DsdbError::SerializationError(e.to_string()))
}
