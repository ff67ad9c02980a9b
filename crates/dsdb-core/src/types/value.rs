//! Cell and entry values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::DsdbError;

/// A single cell (tabular) or entry (mapping) value.
///
/// Equality on `Float` compares the bit pattern, so every value (NaN
/// included) equals itself after a round trip through the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::Text(a), Value::Text(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

/// Declared target type for type enforcement and coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Bool,
    Int,
    Float,
    Text,
    Bytes,
}

impl ValueType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Text => "text",
            ValueType::Bytes => "bytes",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueType {
    type Err = DsdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bool" | "boolean" => Ok(ValueType::Bool),
            "int" | "integer" | "i64" => Ok(ValueType::Int),
            "float" | "f64" | "double" => Ok(ValueType::Float),
            "text" | "str" | "string" => Ok(ValueType::Text),
            "bytes" | "binary" => Ok(ValueType::Bytes),
            other => Err(DsdbError::InvalidObject(format!("unknown value type: {other}"))),
        }
    }
}

impl Value {
    /// Type of a non-null value.
    #[must_use]
    pub fn value_type(&self) -> Option<ValueType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(ValueType::Bool),
            Value::Int(_) => Some(ValueType::Int),
            Value::Float(_) => Some(ValueType::Float),
            Value::Text(_) => Some(ValueType::Text),
            Value::Bytes(_) => Some(ValueType::Bytes),
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Null or already of type `target`.
    #[must_use]
    pub fn conforms_to(&self, target: ValueType) -> bool {
        self.value_type().is_none_or(|t| t == target)
    }

    /// Best-effort cast to `target`.
    ///
    /// Returns `None` when the cast is impossible. Null stays null.
    #[must_use]
    pub fn coerce(&self, target: ValueType) -> Option<Value> {
        if self.conforms_to(target) {
            return Some(self.clone());
        }
        match (self, target) {
            (Value::Bool(b), ValueType::Text) => Some(Value::Text(b.to_string())),
            (Value::Int(i), ValueType::Text) => Some(Value::Text(i.to_string())),
            (Value::Float(x), ValueType::Text) => Some(Value::Text(x.to_string())),
            (Value::Bytes(b), ValueType::Text) => {
                String::from_utf8(b.clone()).ok().map(Value::Text)
            }

            (Value::Float(x), ValueType::Int) => float_to_int(*x).map(Value::Int),
            (Value::Bool(b), ValueType::Int) => Some(Value::Int(i64::from(*b))),
            (Value::Text(s), ValueType::Int) => s.trim().parse::<i64>().ok().map(Value::Int),

            (Value::Int(i), ValueType::Float) => Some(Value::Float(*i as f64)),
            (Value::Bool(b), ValueType::Float) => {
                Some(Value::Float(if *b { 1.0 } else { 0.0 }))
            }
            (Value::Text(s), ValueType::Float) => {
                s.trim().parse::<f64>().ok().map(Value::Float)
            }

            (Value::Int(0), ValueType::Bool) => Some(Value::Bool(false)),
            (Value::Int(1), ValueType::Bool) => Some(Value::Bool(true)),
            (Value::Text(s), ValueType::Bool) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(Value::Bool(true)),
                "false" | "0" => Some(Value::Bool(false)),
                _ => None,
            },

            (Value::Text(s), ValueType::Bytes) => Some(Value::Bytes(s.clone().into_bytes())),
            _ => None,
        }
    }
}

/// Truncate a finite float that fits in `i64`.
fn float_to_int(x: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or above it overflows.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if !x.is_finite() || x >= LIMIT || x < -LIMIT {
        return None;
    }
    Some(x.trunc() as i64)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}
