// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Insertion orchestrator.
//!
//! Drives the pipeline-facing lifecycle
//! `Unconfigured -> Configured -> Open -> Closed` and turns each collected
//! record into one `insert_record` call:
//!
//! 1. extract the timestamp
//! 2. build the column set (inferred, or coerced to the fixed schema)
//! 3. render and normalize the device identifier
//! 4. check a session out, insert, return the session
//!
//! `collect` takes `&self`; one sink can be shared by many workers through
//! an `Arc`. The state lock is only held for transitions and to grab the
//! open runtime.

use crate::client::{SessionConnector, StoreSession};
use crate::config::{FixedSchema, SinkConfig};
use crate::datatype::TsDataType;
use crate::error::{RecordFailure, SinkError};
use crate::path::PathNormalizer;
use crate::pool::SessionPool;
use crate::record::{Payload, Record, RecordDecoder};
use crate::stats::{SinkStats, SinkStatsSnapshot};
use crate::template::{TemplateEngine, TemplateEvaluator};
use crate::value::Value;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

enum SinkState<C: SessionConnector> {
    Unconfigured(C),
    Configured { config: SinkConfig, connector: C },
    Open(Arc<SinkRuntime<C>>),
    Closed,
}

impl<C: SessionConnector> SinkState<C> {
    fn name(&self) -> &'static str {
        match self {
            SinkState::Unconfigured(_) => "unconfigured",
            SinkState::Configured { .. } => "configured",
            SinkState::Open(_) => "open",
            SinkState::Closed => "closed",
        }
    }
}

/// Everything an open sink needs per record.
struct SinkRuntime<C: SessionConnector> {
    pool: SessionPool<C>,
    device_template: String,
    schema: Option<FixedSchema>,
    decoder: RecordDecoder,
    normalizer: PathNormalizer,
}

impl<C: SessionConnector> SinkRuntime<C> {
    fn open(config: &SinkConfig, connector: C) -> Result<Self, SinkError> {
        let pool_config = config.pool_config()?;
        let schema = config.fixed_schema()?;
        let pool = SessionPool::open(pool_config, connector)?;
        Ok(Self {
            pool,
            device_template: config.device_id().to_string(),
            schema,
            decoder: RecordDecoder::new(config.timestamp_key.clone()),
            normalizer: PathNormalizer::new(),
        })
    }
}

/// One row ready for the store.
struct Row {
    measurements: Vec<String>,
    data_types: Vec<TsDataType>,
    values: Vec<Value>,
}

/// Time-series sink writing stream records through a session pool.
pub struct IotdbSink<C: SessionConnector> {
    state: Mutex<SinkState<C>>,
    evaluator: Arc<dyn TemplateEvaluator>,
    stats: Arc<SinkStats>,
}

impl<C: SessionConnector> IotdbSink<C> {
    /// Create an unconfigured sink using the built-in template engine.
    pub fn new(connector: C) -> Self {
        Self::with_template_evaluator(connector, Arc::new(TemplateEngine::new()))
    }

    /// Create an unconfigured sink rendering device identifiers through
    /// `evaluator`.
    pub fn with_template_evaluator(connector: C, evaluator: Arc<dyn TemplateEvaluator>) -> Self {
        Self {
            state: Mutex::new(SinkState::Unconfigured(connector)),
            evaluator,
            stats: Arc::new(SinkStats::new()),
        }
    }

    /// Configure from the pipeline's property map.
    pub fn configure(
        &self,
        props: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), SinkError> {
        let config = SinkConfig::from_properties(props)?;
        self.configure_with(config)
    }

    /// Configure from parsed options. Allowed until the sink is opened;
    /// a later call replaces the earlier options.
    pub fn configure_with(&self, config: SinkConfig) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        if !matches!(
            *state,
            SinkState::Unconfigured(_) | SinkState::Configured { .. }
        ) {
            return Err(SinkError::InvalidState {
                operation: "configure",
                state: state.name(),
            });
        }

        config.validate()?;
        self.evaluator.check(config.device_id()).map_err(|e| {
            SinkError::Configuration(format!("invalid deviceId template: {}", e))
        })?;

        let connector = match std::mem::replace(&mut *state, SinkState::Closed) {
            SinkState::Unconfigured(connector) | SinkState::Configured { connector, .. } => {
                connector
            }
            other => {
                let err = SinkError::InvalidState {
                    operation: "configure",
                    state: other.name(),
                };
                *state = other;
                return Err(err);
            }
        };
        info!(
            "IoTDB sink configured: nodes={:?} device={}",
            config.node_urls(),
            config.device_id()
        );
        *state = SinkState::Configured { config, connector };
        Ok(())
    }

    /// Build the session pool. On failure the sink is closed for good.
    pub fn open(&self) -> Result<(), SinkError> {
        let mut state = self.state.lock();
        let (config, connector) = match std::mem::replace(&mut *state, SinkState::Closed) {
            SinkState::Configured { config, connector } => (config, connector),
            other => {
                let err = SinkError::InvalidState {
                    operation: "open",
                    state: other.name(),
                };
                *state = other;
                return Err(err);
            }
        };

        match SinkRuntime::open(&config, connector) {
            Ok(runtime) => {
                info!("IoTDB sink open");
                *state = SinkState::Open(Arc::new(runtime));
                Ok(())
            }
            Err(e) => {
                error!("IoTDB sink failed to open: {}", e);
                Err(e)
            }
        }
    }

    /// Insert a payload: one JSON object, or an array of them.
    ///
    /// Returns the number of records written. For an array every element is
    /// attempted; if any fail the error is [`SinkError::Batch`] listing
    /// them.
    pub fn collect(&self, payload: &serde_json::Value) -> Result<usize, SinkError> {
        let runtime = self.runtime("collect")?;

        let payload = match runtime.decoder.decode_payload(payload) {
            Ok(payload) => payload,
            Err(e) => {
                self.stats.record_received();
                self.stats.record_failed();
                warn!("Payload rejected: {}", e);
                return Err(e);
            }
        };

        match payload {
            Payload::Single(record) => self.insert(&runtime, &record).map(|()| 1),
            Payload::Batch(items) => {
                let total = items.len();
                let mut failures = Vec::new();
                for (index, item) in items.into_iter().enumerate() {
                    let result = match item {
                        Ok(record) => self.insert(&runtime, &record),
                        Err(e) => {
                            self.stats.record_received();
                            self.stats.record_failed();
                            warn!("Batch element {} rejected: {}", index, e);
                            Err(e)
                        }
                    };
                    if let Err(error) = result {
                        failures.push(RecordFailure { index, error });
                    }
                }

                if failures.is_empty() {
                    Ok(total)
                } else {
                    Err(SinkError::Batch { total, failures })
                }
            }
        }
    }

    /// Insert one already-decoded record.
    pub fn collect_record(&self, record: &Record) -> Result<(), SinkError> {
        let runtime = self.runtime("collect")?;
        self.insert(&runtime, record)
    }

    /// Close the sink and its pool. Idempotent.
    pub fn close(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SinkState::Closed);
        match previous {
            SinkState::Open(runtime) => {
                runtime.pool.close();
                info!("IoTDB sink closed");
            }
            SinkState::Closed => debug!("IoTDB sink already closed"),
            _ => info!("IoTDB sink closed before open"),
        }
    }

    /// Lifecycle state name.
    pub fn state_name(&self) -> &'static str {
        self.state.lock().name()
    }

    pub fn stats(&self) -> SinkStatsSnapshot {
        self.stats.snapshot()
    }

    fn runtime(&self, operation: &'static str) -> Result<Arc<SinkRuntime<C>>, SinkError> {
        match &*self.state.lock() {
            SinkState::Open(runtime) => Ok(Arc::clone(runtime)),
            other => Err(SinkError::InvalidState {
                operation,
                state: other.name(),
            }),
        }
    }

    fn insert(&self, runtime: &SinkRuntime<C>, record: &Record) -> Result<(), SinkError> {
        self.stats.record_received();
        let result = self.write(runtime, record);
        match &result {
            Ok(()) => self.stats.record_inserted(),
            Err(e) => {
                self.stats.record_failed();
                warn!("Record rejected: {}", e);
            }
        }
        result
    }

    fn write(&self, runtime: &SinkRuntime<C>, record: &Record) -> Result<(), SinkError> {
        let timestamp = runtime.decoder.timestamp(record)?;
        let row = match &runtime.schema {
            Some(schema) => fixed_row(schema, &runtime.decoder, record)?,
            None => inferred_row(&runtime.decoder, record)?,
        };
        if row.measurements.is_empty() {
            return Err(SinkError::Schema("record has no data columns".to_string()));
        }

        let device = self.evaluator.evaluate(&runtime.device_template, record)?;
        let device_id = runtime.normalizer.normalize(&device)?;

        let mut session = runtime.pool.acquire()?;
        self.stats.session_acquired();
        debug!(
            "Inserting into {} at {}: {:?}",
            device_id, timestamp, row.measurements
        );

        session
            .insert_record(
                &device_id,
                &row.measurements,
                &row.data_types,
                &row.values,
                timestamp,
            )
            .map_err(|source| {
                error!("Insert into {} failed: {}", device_id, source);
                SinkError::StoreWrite {
                    device_id: device_id.clone(),
                    source,
                }
            })
    }
}

/// Columns from the record itself, one per data field, types inferred.
fn inferred_row(decoder: &RecordDecoder, record: &Record) -> Result<Row, SinkError> {
    let mut row = Row {
        measurements: Vec::with_capacity(record.len()),
        data_types: Vec::with_capacity(record.len()),
        values: Vec::with_capacity(record.len()),
    };
    for (name, value) in decoder.columns(record) {
        let data_type = TsDataType::infer(value);
        if !data_type.is_known() {
            return Err(SinkError::TypeInference {
                field: name.to_string(),
                kind: value.kind().to_string(),
            });
        }
        row.measurements.push(name.to_string());
        row.data_types.push(data_type);
        row.values.push(value.clone());
    }
    Ok(row)
}

/// Columns from the configured schema, values coerced to declared types.
fn fixed_row(
    schema: &FixedSchema,
    decoder: &RecordDecoder,
    record: &Record,
) -> Result<Row, SinkError> {
    let present = decoder.columns(record).count();
    if present != schema.len() {
        return Err(SinkError::Schema(format!(
            "expected {} data fields ({}), record has {}",
            schema.len(),
            schema.measurements.join(", "),
            present
        )));
    }

    let mut values = Vec::with_capacity(schema.len());
    for (name, data_type) in schema.columns() {
        let value = record
            .get(name)
            .ok_or_else(|| SinkError::Schema(format!("missing field '{}'", name)))?;
        let coerced = data_type
            .coerce(value)
            .ok_or_else(|| SinkError::TypeInference {
                field: name.to_string(),
                kind: format!("{}, declared {}", value.kind(), data_type),
            })?;
        values.push(coerced);
    }

    Ok(Row {
        measurements: schema.measurements.clone(),
        data_types: schema.data_types.clone(),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryConnector;
    use crate::template::TemplateError;
    use serde_json::json;

    fn config() -> SinkConfig {
        SinkConfig::new("127.0.0.1:6667", "root", "root", "root/ln/{{.device}}")
    }

    fn open_sink(config: SinkConfig) -> (IotdbSink<MemoryConnector>, MemoryConnector) {
        let connector = MemoryConnector::new();
        let sink = IotdbSink::new(connector.clone());
        sink.configure_with(config).expect("configure");
        sink.open().expect("open");
        (sink, connector)
    }

    #[test]
    fn test_lifecycle_states() {
        let sink = IotdbSink::new(MemoryConnector::new());
        assert_eq!(sink.state_name(), "unconfigured");

        match sink.open() {
            Err(SinkError::InvalidState { operation, state }) => {
                assert_eq!(operation, "open");
                assert_eq!(state, "unconfigured");
            }
            other => panic!("expected InvalidState, got {:?}", other),
        }
        assert_eq!(sink.state_name(), "unconfigured");

        sink.configure_with(config()).expect("configure");
        sink.configure_with(config()).expect("reconfigure");
        assert_eq!(sink.state_name(), "configured");

        sink.open().expect("open");
        assert_eq!(sink.state_name(), "open");
        assert!(matches!(
            sink.configure_with(config()),
            Err(SinkError::InvalidState { .. })
        ));

        sink.close();
        sink.close();
        assert_eq!(sink.state_name(), "closed");
        assert!(matches!(
            sink.collect(&json!({"device": "d1", "v": 1})),
            Err(SinkError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_configure_from_properties() {
        let sink = IotdbSink::new(MemoryConnector::new());
        let props = json!({
            "nodeUrls": "127.0.0.1:6667",
            "user": "root",
            "passwd": "root",
            "deviceId": "root.sg.d1"
        });
        sink.configure(props.as_object().expect("object"))
            .expect("configure");
        assert_eq!(sink.state_name(), "configured");
    }

    #[test]
    fn test_configure_rejects_bad_template() {
        let sink = IotdbSink::new(MemoryConnector::new());
        let bad = SinkConfig::new("127.0.0.1:6667", "root", "root", "root.{{if x}}");
        match sink.configure_with(bad) {
            Err(SinkError::Configuration(msg)) => assert!(msg.contains("deviceId")),
            other => panic!("expected Configuration error, got {:?}", other),
        }
        assert_eq!(sink.state_name(), "unconfigured");
    }

    #[test]
    fn test_open_failure_closes_sink() {
        let connector = MemoryConnector::new();
        connector.set_unreachable("127.0.0.1:6667", true);
        let sink = IotdbSink::new(connector);
        sink.configure_with(config()).expect("configure");

        assert!(matches!(sink.open(), Err(SinkError::Connection(_))));
        assert_eq!(sink.state_name(), "closed");
        assert!(matches!(sink.open(), Err(SinkError::InvalidState { .. })));
    }

    #[test]
    fn test_single_record_inferred() {
        let (sink, connector) = open_sink(config());

        let written = sink
            .collect(&json!({
                "timestamp": 1_700_000_000_000i64,
                "device": "d1",
                "temp": 21.5,
                "ok": true,
                "meta": "ignored"
            }))
            .expect("collect");
        assert_eq!(written, 1);

        let rows = connector.rows();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.device_id, "root.ln.d1");
        assert_eq!(row.timestamp_ms, 1_700_000_000_000);
        assert_eq!(row.measurements, vec!["device", "temp", "ok"]);
        assert_eq!(
            row.data_types,
            vec![TsDataType::Text, TsDataType::Double, TsDataType::Boolean]
        );
        assert_eq!(row.values[1], Value::Float64(21.5));
        assert_eq!(sink.stats().records_inserted, 1);
    }

    #[test]
    fn test_typed_record_keeps_narrow_types() {
        let (sink, connector) = open_sink(config());
        let record = Record::new()
            .with("timestamp", 5i64)
            .with("device", "d2")
            .with("count", 7i32)
            .with("ratio", 0.5f32);

        sink.collect_record(&record).expect("collect");
        let row = &connector.rows()[0];
        assert_eq!(
            row.data_types,
            vec![TsDataType::Text, TsDataType::Int32, TsDataType::Float]
        );
    }

    #[test]
    fn test_meta_only_record_is_schema_error() {
        let (sink, connector) = open_sink(
            SinkConfig::new("127.0.0.1:6667", "root", "root", "root.sg.d1"),
        );
        match sink.collect(&json!({"timestamp": 1, "meta": "x"})) {
            Err(SinkError::Schema(_)) => {}
            other => panic!("expected Schema error, got {:?}", other),
        }
        assert!(connector.rows().is_empty());
        assert_eq!(connector.open_sessions(), 1);
    }

    #[test]
    fn test_unsupported_value_is_type_error() {
        let (sink, connector) = open_sink(config());
        match sink.collect(&json!({"device": "d1", "tags": [1, 2]})) {
            Err(SinkError::TypeInference { field, kind }) => {
                assert_eq!(field, "tags");
                assert_eq!(kind, "array");
            }
            other => panic!("expected TypeInference, got {:?}", other),
        }
        assert!(connector.rows().is_empty());
    }

    #[test]
    fn test_template_error_is_per_record() {
        let (sink, connector) = open_sink(config());
        match sink.collect(&json!({"temp": 1})) {
            Err(SinkError::Template(TemplateError::UnknownField(name))) => {
                assert_eq!(name, "device")
            }
            other => panic!("expected Template error, got {:?}", other),
        }

        sink.collect(&json!({"device": "d1", "temp": 1}))
            .expect("next record still inserted");
        assert_eq!(connector.rows().len(), 1);
    }

    #[test]
    fn test_store_write_error_releases_session() {
        let (sink, connector) = open_sink(config().with_pool_size(1));
        connector.fail_inserts_for("root.ln.bad");

        match sink.collect(&json!({"device": "bad", "v": 1})) {
            Err(SinkError::StoreWrite { device_id, .. }) => assert_eq!(device_id, "root.ln.bad"),
            other => panic!("expected StoreWrite, got {:?}", other),
        }
        // the only session came back and is reused
        sink.collect(&json!({"device": "good", "v": 1}))
            .expect("insert after failure");
        assert_eq!(connector.sessions_opened(), 1);
    }

    #[test]
    fn test_fixed_schema_coerces_values() {
        let (sink, connector) = open_sink(
            config()
                .with_schema("device,temp,count", "TEXT,FLOAT,INT32")
                .with_timestamp_key("time"),
        );

        sink.collect(&json!({"time": 9, "device": "d1", "temp": 20.5, "count": 3}))
            .expect("collect");
        let row = &connector.rows()[0];
        assert_eq!(row.timestamp_ms, 9);
        assert_eq!(
            row.values,
            vec![
                Value::Text("d1".into()),
                Value::Float32(20.5),
                Value::Int32(3)
            ]
        );
    }

    #[test]
    fn test_fixed_schema_mismatch() {
        let (sink, _connector) = open_sink(config().with_schema("device,temp", "TEXT,DOUBLE"));

        assert!(matches!(
            sink.collect(&json!({"device": "d1"})),
            Err(SinkError::Schema(_))
        ));
        assert!(matches!(
            sink.collect(&json!({"device": "d1", "pressure": 1.0})),
            Err(SinkError::Schema(_))
        ));
        assert!(matches!(
            sink.collect(&json!({"device": "d1", "temp": "warm"})),
            Err(SinkError::TypeInference { .. })
        ));
    }

    #[test]
    fn test_reserved_schema_field_rejected_at_configure() {
        let sink = IotdbSink::new(MemoryConnector::new());
        match sink.configure_with(config().with_schema("meta,v", "TEXT,INT64")) {
            Err(SinkError::Configuration(msg)) => assert!(msg.contains("meta")),
            other => panic!("expected Configuration error, got {:?}", other),
        }
        assert_eq!(sink.state_name(), "unconfigured");
    }

    #[test]
    fn test_bad_timestamp_is_decode_error() {
        let (sink, _connector) = open_sink(config());
        assert!(matches!(
            sink.collect(&json!({"timestamp": 1.5, "device": "d1", "v": 1})),
            Err(SinkError::Decode(_))
        ));
        assert!(matches!(sink.collect(&json!(42)), Err(SinkError::Decode(_))));
    }

    #[test]
    fn test_batch_counts() {
        let (sink, connector) = open_sink(config());
        let written = sink
            .collect(&json!([
                {"device": "a", "v": 1},
                {"device": "b", "v": 2}
            ]))
            .expect("batch");
        assert_eq!(written, 2);
        assert_eq!(connector.rows().len(), 2);

        let stats = sink.stats();
        assert_eq!(stats.records_received, 2);
        assert_eq!(stats.sessions_acquired, 2);
    }
}
