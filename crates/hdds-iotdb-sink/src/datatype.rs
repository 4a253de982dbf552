// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Column types of the time-series store and inference from values.

use crate::value::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Unrecognized data type name in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown data type '{0}' (expected BOOLEAN, INT32, INT64, FLOAT, DOUBLE or TEXT)")]
pub struct ParseDataTypeError(pub String);

/// Column type of a measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TsDataType {
    Boolean,
    Int32,
    Int64,
    Float,
    Double,
    Text,
    /// No column type; never sent to the store.
    Unknown,
}

impl TsDataType {
    /// Infer the column type of a value.
    ///
    /// Total over [`Value`]: unsupported shapes map to `Unknown`.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Int32(_) => TsDataType::Int32,
            Value::Int64(_) => TsDataType::Int64,
            Value::Float32(_) => TsDataType::Float,
            Value::Float64(_) => TsDataType::Double,
            Value::Text(_) => TsDataType::Text,
            Value::Bool(_) => TsDataType::Boolean,
            Value::Unsupported(_) => TsDataType::Unknown,
        }
    }

    /// Store-side type name.
    pub fn as_str(self) -> &'static str {
        match self {
            TsDataType::Boolean => "BOOLEAN",
            TsDataType::Int32 => "INT32",
            TsDataType::Int64 => "INT64",
            TsDataType::Float => "FLOAT",
            TsDataType::Double => "DOUBLE",
            TsDataType::Text => "TEXT",
            TsDataType::Unknown => "UNKNOWN",
        }
    }

    /// False only for `Unknown`.
    pub fn is_known(self) -> bool {
        self != TsDataType::Unknown
    }

    /// Convert `value` to this column type if no information is lost.
    ///
    /// Used when the measurement schema is fixed by configuration instead
    /// of inferred per record.
    pub fn coerce(self, value: &Value) -> Option<Value> {
        match self {
            TsDataType::Boolean => match value {
                Value::Bool(b) => Some(Value::Bool(*b)),
                _ => None,
            },
            TsDataType::Int32 => value
                .as_integral()
                .and_then(|i| i32::try_from(i).ok())
                .map(Value::Int32),
            TsDataType::Int64 => value.as_integral().map(Value::Int64),
            TsDataType::Float => match value {
                Value::Float32(v) => Some(Value::Float32(*v)),
                Value::Float64(v) => {
                    let narrowed = *v as f32;
                    if narrowed.is_infinite() && v.is_finite() {
                        None
                    } else {
                        Some(Value::Float32(narrowed))
                    }
                }
                Value::Int32(v) => Some(Value::Float32(*v as f32)),
                Value::Int64(v) => Some(Value::Float32(*v as f32)),
                _ => None,
            },
            TsDataType::Double => value.as_f64().map(Value::Float64),
            TsDataType::Text => match value {
                Value::Text(s) => Some(Value::Text(s.clone())),
                _ => None,
            },
            TsDataType::Unknown => None,
        }
    }
}

impl fmt::Display for TsDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TsDataType {
    type Err = ParseDataTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BOOLEAN" => Ok(TsDataType::Boolean),
            "INT32" => Ok(TsDataType::Int32),
            "INT64" => Ok(TsDataType::Int64),
            "FLOAT" => Ok(TsDataType::Float),
            "DOUBLE" => Ok(TsDataType::Double),
            "TEXT" => Ok(TsDataType::Text),
            _ => Err(ParseDataTypeError(s.trim().to_string())),
        }
    }
}
