// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink error taxonomy.

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::template::TemplateError;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the sink.
///
/// `Configuration` and `Connection` at open time abort the sink instance.
/// Everything else raised by `collect` is scoped to one record (or, for
/// `Batch`, to the listed elements) and leaves the session pool intact.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Session pool exhausted: no session available after {0:?}")]
    PoolExhausted(Duration),

    #[error("Session pool is closed")]
    PoolClosed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Malformed path '{path}': {reason}")]
    PathFormat { path: String, reason: String },

    #[error("Cannot infer column type for field '{field}' (value is {kind})")]
    TypeInference { field: String, kind: String },

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Insert into '{device_id}' failed: {source}")]
    StoreWrite {
        device_id: String,
        #[source]
        source: ClientError,
    },

    #[error("Cannot {operation} while sink is {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("{} of {total} records failed: {}", .failures.len(), BatchSummary(.failures))]
    Batch {
        total: usize,
        failures: Vec<RecordFailure>,
    },
}

impl SinkError {
    /// True if the error concerns a single record and the pipeline may
    /// move on to the next one.
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            SinkError::Decode(_)
                | SinkError::Template(_)
                | SinkError::PathFormat { .. }
                | SinkError::TypeInference { .. }
                | SinkError::Schema(_)
                | SinkError::StoreWrite { .. }
        )
    }

    /// Per-element failures of a batch, empty for any other error.
    pub fn failures(&self) -> &[RecordFailure] {
        match self {
            SinkError::Batch { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<ConfigError> for SinkError {
    fn from(e: ConfigError) -> Self {
        SinkError::Configuration(e.to_string())
    }
}

/// Failure of one element of a batch.
#[derive(Debug)]
pub struct RecordFailure {
    /// Position of the element in the batch.
    pub index: usize,
    /// Why it was not inserted.
    pub error: SinkError,
}

struct BatchSummary<'a>(&'a [RecordFailure]);

impl fmt::Display for BatchSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "[{}] {}", failure.index, failure.error)?;
        }
        Ok(())
    }
}
