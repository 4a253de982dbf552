// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream records and payload decoding.

use crate::error::SinkError;
use crate::value::Value;
use serde_json::Map;

/// Default name of the timestamp field.
pub const DEFAULT_TIMESTAMP_KEY: &str = "timestamp";

/// Field that never becomes a column.
pub const META_FIELD: &str = "meta";

/// Insertion-ordered mapping of field name to value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Record::insert`].
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a field, replacing an existing value in place.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// First field whose name matches `name` ignoring ASCII case.
    pub fn get_ignore_case(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Build a record from a JSON object, keeping field order.
    pub fn from_json_map(map: &Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect(),
        }
    }
}

/// Shape of an incoming payload.
#[derive(Debug)]
pub enum Payload {
    /// One JSON object.
    Single(Record),
    /// JSON array; each element decoded on its own.
    Batch(Vec<Result<Record, SinkError>>),
}

/// Turns pipeline payloads into records and splits out the timestamp.
#[derive(Debug, Clone)]
pub struct RecordDecoder {
    timestamp_key: String,
}

impl RecordDecoder {
    pub fn new(timestamp_key: impl Into<String>) -> Self {
        Self {
            timestamp_key: timestamp_key.into(),
        }
    }

    pub fn timestamp_key(&self) -> &str {
        &self.timestamp_key
    }

    /// Decode a payload that is either one object or an array of objects.
    pub fn decode_payload(&self, payload: &serde_json::Value) -> Result<Payload, SinkError> {
        match payload {
            serde_json::Value::Object(map) => Ok(Payload::Single(Record::from_json_map(map))),
            serde_json::Value::Array(items) => Ok(Payload::Batch(
                items.iter().map(|item| self.decode_record(item)).collect(),
            )),
            other => Err(SinkError::Decode(format!(
                "payload must be an object or an array of objects, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Decode exactly one record.
    pub fn decode_record(&self, item: &serde_json::Value) -> Result<Record, SinkError> {
        match item {
            serde_json::Value::Object(map) => Ok(Record::from_json_map(map)),
            other => Err(SinkError::Decode(format!(
                "record must be an object, got {}",
                json_kind(other)
            ))),
        }
    }

    /// Epoch milliseconds of the record.
    ///
    /// Integer-valued floats are accepted. A missing field means "now".
    pub fn timestamp(&self, record: &Record) -> Result<i64, SinkError> {
        match record.get_ignore_case(&self.timestamp_key) {
            None => Ok(chrono::Utc::now().timestamp_millis()),
            Some(value) => value.as_integral().ok_or_else(|| {
                SinkError::Decode(format!(
                    "field '{}' must be an integral epoch millisecond value, got {} '{}'",
                    self.timestamp_key,
                    value.kind(),
                    value
                ))
            }),
        }
    }

    /// Data columns of the record: every field except the timestamp and
    /// `meta`, in record order.
    pub fn columns<'a>(&'a self, record: &'a Record) -> impl Iterator<Item = (&'a str, &'a Value)> {
        record.iter().filter(move |(name, _)| {
            !name.eq_ignore_ascii_case(&self.timestamp_key)
                && !name.eq_ignore_ascii_case(META_FIELD)
        })
    }
}

impl Default for RecordDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_TIMESTAMP_KEY)
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
