// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-memory store client.
//!
//! Implements the client traits against shared process memory. Useful for
//! dry runs of a pipeline and for tests: every insert is kept as an
//! [`InsertedRow`], session opens and closes are counted, and failures can
//! be injected per endpoint or per device.

use crate::client::{ClientError, Credentials, SessionConnector, StoreSession};
use crate::datatype::TsDataType;
use crate::value::Value;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// One row accepted by the in-memory store.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertedRow {
    pub endpoint: String,
    pub device_id: String,
    pub measurements: Vec<String>,
    pub data_types: Vec<TsDataType>,
    pub values: Vec<Value>,
    pub timestamp_ms: i64,
}

impl InsertedRow {
    /// Value of `measurement` in this row.
    pub fn value(&self, measurement: &str) -> Option<&Value> {
        self.measurements
            .iter()
            .position(|m| m == measurement)
            .map(|i| &self.values[i])
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<InsertedRow>,
    unreachable: HashSet<String>,
    failing_devices: HashSet<String>,
    credentials: Option<Credentials>,
    insert_delay: Duration,
    sessions_opened: usize,
    sessions_closed: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// Connector for the in-memory store. Clones share the same store.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `connect` to `endpoint` fail (or succeed again).
    pub fn set_unreachable(&self, endpoint: &str, unreachable: bool) {
        let mut state = self.state.lock();
        if unreachable {
            state.unreachable.insert(endpoint.to_string());
        } else {
            state.unreachable.remove(endpoint);
        }
    }

    /// Make every insert into `device_id` fail with an RPC error.
    pub fn fail_inserts_for(&self, device_id: &str) {
        self.state.lock().failing_devices.insert(device_id.to_string());
    }

    /// Reject sessions opened with other credentials.
    pub fn require_credentials(&self, credentials: Credentials) {
        self.state.lock().credentials = Some(credentials);
    }

    /// Hold each insert for `delay` before it completes.
    pub fn set_insert_delay(&self, delay: Duration) {
        self.state.lock().insert_delay = delay;
    }

    /// Rows accepted so far, in insert order.
    pub fn rows(&self) -> Vec<InsertedRow> {
        self.state.lock().rows.clone()
    }

    pub fn sessions_opened(&self) -> usize {
        self.state.lock().sessions_opened
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.lock().sessions_closed
    }

    /// Sessions opened and not yet closed.
    pub fn open_sessions(&self) -> usize {
        let state = self.state.lock();
        state.sessions_opened - state.sessions_closed
    }

    /// Highest number of inserts running at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight
    }
}

impl SessionConnector for MemoryConnector {
    type Session = MemorySession;

    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Self::Session, ClientError> {
        let mut state = self.state.lock();
        if state.unreachable.contains(endpoint) {
            return Err(ClientError::Unreachable {
                endpoint: endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        if let Some(expected) = &state.credentials {
            if expected != credentials {
                return Err(ClientError::Authentication(credentials.user.clone()));
            }
        }
        state.sessions_opened += 1;

        Ok(MemorySession {
            endpoint: endpoint.to_string(),
            state: Arc::clone(&self.state),
            closed: false,
        })
    }
}

/// Session on the in-memory store.
#[derive(Debug)]
pub struct MemorySession {
    endpoint: String,
    state: Arc<Mutex<MemoryState>>,
    closed: bool,
}

impl StoreSession for MemorySession {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn insert_record(
        &mut self,
        device_id: &str,
        measurements: &[String],
        data_types: &[TsDataType],
        values: &[Value],
        timestamp_ms: i64,
    ) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }

        let delay = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
            state.insert_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.state.lock();
        state.in_flight -= 1;

        if state.failing_devices.contains(device_id) {
            return Err(ClientError::Rpc(format!(
                "write to {} rejected by server",
                device_id
            )));
        }
        if measurements.len() != values.len() || data_types.len() != values.len() {
            return Err(ClientError::Rpc(format!(
                "misaligned row: {} measurements, {} types, {} values",
                measurements.len(),
                data_types.len(),
                values.len()
            )));
        }

        state.rows.push(InsertedRow {
            endpoint: self.endpoint.clone(),
            device_id: device_id.to_string(),
            measurements: measurements.to_vec(),
            data_types: data_types.to_vec(),
            values: values.to_vec(),
            timestamp_ms,
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if self.closed {
            return Err(ClientError::SessionClosed);
        }
        self.closed = true;
        self.state.lock().sessions_closed += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials::new("root", "root")
    }

    #[test]
    fn test_insert_is_recorded() {
        let connector = MemoryConnector::new();
        let mut session = connector.connect("127.0.0.1:6667", &creds()).expect("connect");

        session
            .insert_record(
                "root.sg.d1",
                &["temp".to_string()],
                &[TsDataType::Double],
                &[Value::Float64(21.5)],
                1000,
            )
            .expect("insert");

        let rows = connector.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].device_id, "root.sg.d1");
        assert_eq!(rows[0].value("temp"), Some(&Value::Float64(21.5)));
        assert_eq!(rows[0].endpoint, "127.0.0.1:6667");
    }

    #[test]
    fn test_unreachable_endpoint() {
        let connector = MemoryConnector::new();
        connector.set_unreachable("10.0.0.1:6667", true);

        match connector.connect("10.0.0.1:6667", &creds()) {
            Err(ClientError::Unreachable { endpoint, .. }) => assert_eq!(endpoint, "10.0.0.1:6667"),
            other => panic!("expected Unreachable, got {:?}", other),
        }
        assert_eq!(connector.sessions_opened(), 0);
    }

    #[test]
    fn test_wrong_credentials_rejected() {
        let connector = MemoryConnector::new();
        connector.require_credentials(creds());
        let result = connector.connect("h:1", &Credentials::new("root", "nope"));
        assert!(matches!(result, Err(ClientError::Authentication(_))));
    }

    #[test]
    fn test_failing_device_and_closed_session() {
        let connector = MemoryConnector::new();
        connector.fail_inserts_for("root.bad");
        let mut session = connector.connect("h:1", &creds()).expect("connect");

        let err = session
            .insert_record("root.bad", &["v".into()], &[TsDataType::Int64], &[Value::Int64(1)], 1)
            .unwrap_err();
        assert!(matches!(err, ClientError::Rpc(_)));

        session.close().expect("close");
        assert_eq!(session.close(), Err(ClientError::SessionClosed));
        assert_eq!(
            session.insert_record("root.ok", &[], &[], &[], 1),
            Err(ClientError::SessionClosed)
        );
        assert_eq!(connector.open_sessions(), 0);
    }
}
