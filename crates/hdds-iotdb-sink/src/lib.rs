// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HDDS IoTDB Sink
//!
//! Writes stream records into an Apache IoTDB-style time-series store.
//!
//! This crate provides:
//! - Column type inference from record values, or a fixed configured schema
//! - Device identifier templates rendered per record
//! - Path normalization (`/` to `.` outside backtick quotes)
//! - A bounded session pool shared by concurrent collectors
//! - Batch insertion with per-element failure reporting
//!
//! # Overview
//!
//! The sink does NOT speak the store's wire protocol. A client library
//! supplies a [`SessionConnector`]; [`MemoryConnector`] is an in-memory
//! implementation for dry runs and tests.
//!
//! ```text
//! payload (JSON) --> RecordDecoder --> columns + timestamp
//!                                  --> TemplateEvaluator --> PathNormalizer --> device id
//!                --> SessionPool::acquire --> insert_record --> release
//! ```
//!
//! ```ignore
//! let sink = IotdbSink::new(connector);
//! sink.configure(&props)?;
//! sink.open()?;
//! sink.collect(&serde_json::json!({"timestamp": 1, "device": "d1", "temp": 21.5}))?;
//! sink.close();
//! ```

pub mod client;
pub mod config;
pub mod datatype;
pub mod error;
pub mod memory;
pub mod path;
pub mod pool;
pub mod record;
pub mod sink;
pub mod stats;
pub mod template;
pub mod value;

pub use client::{ClientError, Credentials, SessionConnector, StoreSession};
pub use config::{ConfigError, FixedSchema, SinkConfig};
pub use datatype::TsDataType;
pub use error::{RecordFailure, SinkError};
pub use memory::{InsertedRow, MemoryConnector};
pub use path::{normalize_path, PathNormalizer};
pub use pool::{PoolConfig, PooledSession, SessionPool};
pub use record::{Record, RecordDecoder};
pub use sink::IotdbSink;
pub use stats::SinkStatsSnapshot;
pub use template::{Template, TemplateEngine, TemplateError, TemplateEvaluator};
pub use value::Value;
