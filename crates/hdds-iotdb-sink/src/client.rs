// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Interface to the time-series store client library.
//!
//! The sink never speaks the store's wire protocol itself. A client library
//! provides a [`SessionConnector`] that opens sessions against one endpoint,
//! and each [`StoreSession`] exposes the record insert RPC.

use crate::datatype::TsDataType;
use crate::value::Value;
use std::fmt;
use thiserror::Error;

/// Errors reported by the store client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("endpoint {endpoint} unreachable: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("authentication rejected for user '{0}'")]
    Authentication(String),

    #[error("RPC failed: {0}")]
    Rpc(String),

    #[error("session already closed")]
    SessionClosed,
}

/// User name and password handed to the client library.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub passwd: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, passwd: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            passwd: passwd.into(),
        }
    }
}

// Keep the password out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("passwd", &"***")
            .finish()
    }
}

/// An open session to one store endpoint.
pub trait StoreSession: Send {
    /// Endpoint this session is connected to.
    fn endpoint(&self) -> &str;

    /// Insert one row of aligned measurements at `timestamp_ms` into
    /// `device_id`.
    fn insert_record(
        &mut self,
        device_id: &str,
        measurements: &[String],
        data_types: &[TsDataType],
        values: &[Value],
        timestamp_ms: i64,
    ) -> Result<(), ClientError>;

    /// Close the session. Further inserts fail with `SessionClosed`.
    fn close(&mut self) -> Result<(), ClientError>;
}

/// Factory for sessions, supplied by the client library.
pub trait SessionConnector: Send + Sync {
    type Session: StoreSession;

    /// Open a session against `endpoint` (`host:port`).
    fn connect(
        &self,
        endpoint: &str,
        credentials: &Credentials,
    ) -> Result<Self::Session, ClientError>;
}
