// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Scalar values carried by stream records.
//!
//! Every field of a decoded record is one of a closed set of scalar shapes.
//! Anything the store cannot hold in a single column (null, arrays, nested
//! objects) is kept as [`Value::Unsupported`] so the insert path can reject
//! the record with a precise error instead of guessing a type.

use std::fmt;

/// Shape of a value that has no column type in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsupportedKind {
    /// JSON `null`.
    Null,
    /// JSON array.
    Array,
    /// Nested JSON object.
    Object,
}

impl UnsupportedKind {
    /// Lowercase name used in error messages.
    pub fn as_str(self) -> &'static str {
        match self {
            UnsupportedKind::Null => "null",
            UnsupportedKind::Array => "array",
            UnsupportedKind::Object => "object",
        }
    }
}

impl fmt::Display for UnsupportedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 8/16/32-bit signed integer.
    Int32(i32),
    /// 64-bit signed integer.
    Int64(i64),
    /// 32-bit floating point.
    Float32(f32),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    Text(String),
    /// Boolean value.
    Bool(bool),
    /// Value with no column representation.
    Unsupported(UnsupportedKind),
}

impl Value {
    /// Convert a JSON value without going through a lossy float round-trip.
    ///
    /// Integers that fit in `i64` stay integers; every other number becomes
    /// `Float64`.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int64(i)
                } else {
                    // u64 beyond i64::MAX and real numbers
                    Value::Float64(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::Text(s.clone()),
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Null => Value::Unsupported(UnsupportedKind::Null),
            serde_json::Value::Array(_) => Value::Unsupported(UnsupportedKind::Array),
            serde_json::Value::Object(_) => Value::Unsupported(UnsupportedKind::Object),
        }
    }

    /// Short name of the value's shape, for logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Text(_) => "string",
            Value::Bool(_) => "bool",
            Value::Unsupported(kind) => kind.as_str(),
        }
    }

    /// True for the integer and floating point variants.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Int32(_) | Value::Int64(_) | Value::Float32(_) | Value::Float64(_)
        )
    }

    /// Numeric view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(f64::from(*v)),
            Value::Int64(v) => Some(*v as f64),
            Value::Float32(v) => Some(f64::from(*v)),
            Value::Float64(v) => Some(*v),
            _ => None,
        }
    }

    /// Exact integer view: integers, and floats with no fractional part.
    pub fn as_integral(&self) -> Option<i64> {
        match self {
            Value::Int32(v) => Some(i64::from(*v)),
            Value::Int64(v) => Some(*v),
            Value::Float32(v) => integral_f64(f64::from(*v)),
            Value::Float64(v) => integral_f64(*v),
            _ => None,
        }
    }

    /// String view of a `Text` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Convert a float to `i64` when it holds an exact integer in range.
fn integral_f64(v: f64) -> Option<i64> {
    // 2^63 is exactly representable; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if v.is_finite() && v.fract() == 0.0 && v >= -LIMIT && v < LIMIT {
        Some(v as i64)
    } else {
        None
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float32(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Text(v) => f.write_str(v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Unsupported(kind) => write!(f, "<{}>", kind),
        }
    }
}

impl From<i8> for Value {
    fn from(v: i8) -> Self {
        Value::Int32(i32::from(v))
    }
}

impl From<i16> for Value {
    fn from(v: i16) -> Self {
        Value::Int32(i32::from(v))
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_integers() {
        assert_eq!(Value::from_json(&json!(43)), Value::Int64(43));
        assert_eq!(Value::from_json(&json!(-7)), Value::Int64(-7));
        assert_eq!(Value::from_json(&json!(1.5)), Value::Float64(1.5));
    }

    #[test]
    fn test_from_json_scalars() {
        assert_eq!(
            Value::from_json(&json!("John")),
            Value::Text("John".to_string())
        );
        assert_eq!(Value::from_json(&json!(true)), Value::Bool(true));
    }

    #[test]
    fn test_from_json_unsupported_shapes() {
        assert_eq!(
            Value::from_json(&json!(null)),
            Value::Unsupported(UnsupportedKind::Null)
        );
        assert_eq!(
            Value::from_json(&json!([1, 2])),
            Value::Unsupported(UnsupportedKind::Array)
        );
        assert_eq!(
            Value::from_json(&json!({"a": 1})),
            Value::Unsupported(UnsupportedKind::Object)
        );
    }

    #[test]
    fn test_from_json_huge_unsigned_becomes_float() {
        let v = Value::from_json(&json!(u64::MAX));
        assert!(matches!(v, Value::Float64(_)));
    }

    #[test]
    fn test_as_integral() {
        assert_eq!(Value::Int32(5).as_integral(), Some(5));
        assert_eq!(Value::Float64(1_700_000_000_000.0).as_integral(), Some(1_700_000_000_000));
        assert_eq!(Value::Float64(2.5).as_integral(), None);
        assert_eq!(Value::Float64(f64::NAN).as_integral(), None);
        assert_eq!(Value::Text("1".into()).as_integral(), None);
    }

    #[test]
    fn test_narrow_integers_widen_to_int32() {
        assert_eq!(Value::from(7i8), Value::Int32(7));
        assert_eq!(Value::from(-300i16), Value::Int32(-300));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Float64(43.0).to_string(), "43");
        assert_eq!(Value::Int64(12).to_string(), "12");
        assert_eq!(Value::Text("abc".into()).to_string(), "abc");
        assert_eq!(
            Value::Unsupported(UnsupportedKind::Array).to_string(),
            "<array>"
        );
    }
}
