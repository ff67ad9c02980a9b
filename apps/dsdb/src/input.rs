//! # Input & Export Formats
//!
//! Conversion between files on disk and catalog objects.
//!
//! - JSON array of objects → table (missing keys become null)
//! - JSON object → mapping
//! - any file with `--kind object` → opaque object holding the raw bytes
//!
//! Values are scalars. Bytes travel as `{"$bytes": "<base64>"}` in both
//! directions.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use dsdb_core::{
    CatalogObject, DsdbError, IntrospectorKind, Mapping, OpaqueObject, Table, Value, ValueType,
};
use serde_json::{Map, Number, json};
use std::collections::BTreeMap;
use std::path::Path;

/// Key of the wrapper object that marks a base64 byte string.
pub const BYTES_KEY: &str = "$bytes";

/// Type name recorded on opaque objects read from files.
pub const FILE_TYPE_NAME: &str = "file";

/// Maximum file size accepted for ingestion (100 MB).
pub const MAX_INPUT_FILE_SIZE: u64 = 100 * 1024 * 1024;

// =============================================================================
// READING
// =============================================================================

/// Read a file and turn it into a catalog object.
pub fn read_object(path: &Path, kind: Option<IntrospectorKind>) -> Result<CatalogObject, DsdbError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| DsdbError::IoError(format!("Cannot read '{}': {}", path.display(), e)))?;
    if !metadata.is_file() {
        return Err(DsdbError::IoError(format!(
            "'{}' is not a regular file",
            path.display()
        )));
    }
    if metadata.len() > MAX_INPUT_FILE_SIZE {
        return Err(DsdbError::IoError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            MAX_INPUT_FILE_SIZE
        )));
    }
    let bytes = std::fs::read(path)
        .map_err(|e| DsdbError::IoError(format!("Read '{}': {}", path.display(), e)))?;
    parse_object(&bytes, kind)
}

/// Parse file contents as the requested kind, or infer it from the JSON shape.
pub fn parse_object(bytes: &[u8], kind: Option<IntrospectorKind>) -> Result<CatalogObject, DsdbError> {
    if kind == Some(IntrospectorKind::Opaque) {
        return Ok(OpaqueObject::from_bytes(FILE_TYPE_NAME, bytes.to_vec()).into());
    }

    let json: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| DsdbError::SerializationError(format!("Invalid JSON: {e}")))?;
    let object = match json {
        serde_json::Value::Array(items) => {
            let records = items
                .into_iter()
                .enumerate()
                .map(|(row, item)| match item {
                    serde_json::Value::Object(map) => json_record(map),
                    _ => Err(DsdbError::InvalidObject(format!(
                        "row {row} is not a JSON object"
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            CatalogObject::Table(Table::from_records(records)?)
        }
        serde_json::Value::Object(map) => CatalogObject::Mapping(json_record(map)?),
        _ => {
            return Err(DsdbError::InvalidObject(
                "expected a JSON array of objects or a JSON object".to_string(),
            ));
        }
    };

    match kind {
        Some(expected) if expected != object.kind() => Err(DsdbError::VariantMismatch {
            expected,
            found: object.kind(),
        }),
        _ => Ok(object),
    }
}

fn json_record(map: Map<String, serde_json::Value>) -> Result<BTreeMap<String, Value>, DsdbError> {
    map.into_iter()
        .map(|(key, value)| {
            let value = json_to_value(&key, value)?;
            Ok::<_, DsdbError>((key, value))
        })
        .collect()
}

/// Convert one JSON scalar.
pub fn json_to_value(field: &str, json: serde_json::Value) -> Result<Value, DsdbError> {
    match json {
        serde_json::Value::Null => Ok(Value::Null),
        serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
        serde_json::Value::Number(n) => number_to_value(field, &n),
        serde_json::Value::String(s) => Ok(Value::Text(s)),
        serde_json::Value::Object(map) => match map.get(BYTES_KEY) {
            Some(serde_json::Value::String(encoded)) if map.len() == 1 => STANDARD
                .decode(encoded)
                .map(Value::Bytes)
                .map_err(|e| DsdbError::InvalidObject(format!("field '{field}': {e}"))),
            _ => Err(DsdbError::InvalidObject(format!(
                "field '{field}' holds a nested object"
            ))),
        },
        serde_json::Value::Array(_) => Err(DsdbError::InvalidObject(format!(
            "field '{field}' holds an array"
        ))),
    }
}

fn number_to_value(field: &str, n: &Number) -> Result<Value, DsdbError> {
    if let Some(i) = n.as_i64() {
        return Ok(Value::Int(i));
    }
    n.as_f64()
        .map(Value::Float)
        .ok_or_else(|| DsdbError::InvalidObject(format!("field '{field}': unsupported number {n}")))
}

// =============================================================================
// COMMAND-LINE PAIRS
// =============================================================================

fn split_pair<'a>(arg: &'a str, what: &str) -> Result<(&'a str, &'a str), DsdbError> {
    arg.split_once('=')
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| DsdbError::InvalidObject(format!("{what} must look like key=value: {arg}")))
}

/// `col=int` → a type expectation.
pub fn parse_type_rule(arg: &str) -> Result<(String, ValueType), DsdbError> {
    let (field, ty) = split_pair(arg, "type rule")?;
    Ok((field.to_string(), ty.parse()?))
}

/// `from=to` → a path substitution. `to` may be empty.
pub fn parse_replacement(arg: &str) -> Result<(String, String), DsdbError> {
    let (from, to) = split_pair(arg, "replacement")?;
    Ok((from.to_string(), to.to_string()))
}

/// `k=v` → a run parameter. `v` is read as a JSON scalar when it parses as
/// one, otherwise as text.
pub fn parse_parameter(arg: &str) -> Result<(String, Value), DsdbError> {
    let (key, raw) = split_pair(arg, "parameter")?;
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json @ (serde_json::Value::Null
        | serde_json::Value::Bool(_)
        | serde_json::Value::Number(_)
        | serde_json::Value::String(_))) => json_to_value(key, json)?,
        _ => Value::Text(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

// =============================================================================
// EXPORT
// =============================================================================

/// JSON rendering of a value. Non-finite floats become strings.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| serde_json::Value::String(f.to_string())),
        Value::Text(s) => json!(s),
        Value::Bytes(b) => json!({ BYTES_KEY: STANDARD.encode(b) }),
    }
}

fn record_to_json(record: &Mapping) -> serde_json::Value {
    serde_json::Value::Object(
        record
            .iter()
            .map(|(k, v)| (k.clone(), value_to_json(v)))
            .collect(),
    )
}

/// JSON rendering of a whole object, the inverse of `parse_object`.
pub fn object_to_json(object: &CatalogObject) -> serde_json::Value {
    match object {
        CatalogObject::Table(table) => serde_json::Value::Array(
            (0..table.row_count())
                .filter_map(|row| table.record(row))
                .map(|record| record_to_json(&record))
                .collect(),
        ),
        CatalogObject::Mapping(mapping) => record_to_json(mapping),
        CatalogObject::Opaque(opaque) => json!({
            "type_name": opaque.type_name,
            "payload": { BYTES_KEY: STANDARD.encode(&opaque.payload) },
        }),
    }
}
