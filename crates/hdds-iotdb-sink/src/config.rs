// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Sink configuration.
//!
//! Options arrive either as the pipeline's property map at configure time
//! or from a YAML document:
//!
//! ```yaml
//! nodeUrls: "127.0.0.1:6667,127.0.0.2:6667"   # or a YAML list
//! user: root
//! passwd: root
//! deviceId: "root.ln.{{.device}}"
//! measurements: "temperature,status"           # optional, with dataTypes
//! dataTypes: "DOUBLE,BOOLEAN"
//! timestampKey: time                           # default: timestamp
//! poolSize: 3
//! idleTimeoutMs: 60000
//! waitTimeoutMs: 60000
//! ```
//!
//! Numeric options may be given as strings.

use crate::client::Credentials;
use crate::datatype::TsDataType;
use crate::error::SinkError;
use crate::pool::{PoolConfig, DEFAULT_IDLE_TIMEOUT, DEFAULT_POOL_SIZE, DEFAULT_WAIT_TIMEOUT};
use crate::record::{DEFAULT_TIMESTAMP_KEY, META_FIELD};
use serde::{Deserialize, Deserializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Sink options.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SinkConfig {
    /// Store endpoints, `host:port`.
    #[serde(default, deserialize_with = "de::list")]
    pub node_urls: Option<Vec<String>>,

    #[serde(default, deserialize_with = "de::text")]
    pub user: Option<String>,

    #[serde(default, deserialize_with = "de::text")]
    pub passwd: Option<String>,

    /// Device identifier template.
    #[serde(default, deserialize_with = "de::text")]
    pub device_id: Option<String>,

    /// Fixed measurement names. Must come with `data_types`.
    #[serde(default, deserialize_with = "de::list")]
    pub measurements: Option<Vec<String>>,

    /// Fixed measurement types, aligned with `measurements`.
    #[serde(default, deserialize_with = "de::list")]
    pub data_types: Option<Vec<String>>,

    #[serde(default = "default_timestamp_key", deserialize_with = "de::text_or_default")]
    pub timestamp_key: String,

    #[serde(default = "default_pool_size", deserialize_with = "de::number")]
    pub pool_size: u64,

    #[serde(default = "default_idle_timeout_ms", deserialize_with = "de::number")]
    pub idle_timeout_ms: u64,

    #[serde(default = "default_wait_timeout_ms", deserialize_with = "de::number")]
    pub wait_timeout_ms: u64,
}

fn default_timestamp_key() -> String {
    DEFAULT_TIMESTAMP_KEY.to_string()
}

fn default_pool_size() -> u64 {
    DEFAULT_POOL_SIZE as u64
}

fn default_idle_timeout_ms() -> u64 {
    DEFAULT_IDLE_TIMEOUT.as_millis() as u64
}

fn default_wait_timeout_ms() -> u64 {
    DEFAULT_WAIT_TIMEOUT.as_millis() as u64
}

/// Measurement schema fixed by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedSchema {
    pub measurements: Vec<String>,
    pub data_types: Vec<TsDataType>,
}

impl FixedSchema {
    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    /// Measurement names with their declared types.
    pub fn columns(&self) -> impl Iterator<Item = (&str, TsDataType)> {
        self.measurements
            .iter()
            .map(String::as_str)
            .zip(self.data_types.iter().copied())
    }
}

/// Configuration parsing errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("property error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Options parsed but are inconsistent or incomplete.
    #[error("{0}")]
    Invalid(String),
}

impl SinkConfig {
    /// Configuration with the required options and defaults for the rest.
    pub fn new(
        node_urls: &str,
        user: impl Into<String>,
        passwd: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            node_urls: Some(split_list(node_urls)),
            user: Some(user.into()),
            passwd: Some(passwd.into()),
            device_id: Some(device_id.into()),
            measurements: None,
            data_types: None,
            timestamp_key: default_timestamp_key(),
            pool_size: default_pool_size(),
            idle_timeout_ms: default_idle_timeout_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }

    /// Fix the measurement schema (comma-separated lists).
    pub fn with_schema(mut self, measurements: &str, data_types: &str) -> Self {
        self.measurements = Some(split_list(measurements));
        self.data_types = Some(split_list(data_types));
        self
    }

    pub fn with_timestamp_key(mut self, key: impl Into<String>) -> Self {
        self.timestamp_key = key.into();
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size as u64;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: SinkConfig = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Parse configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a pipeline property map.
    pub fn from_properties(
        props: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Self, ConfigError> {
        let config = serde_json::from_value(serde_json::Value::Object(props.clone()))?;
        Ok(config)
    }

    /// Check required options and cross-option consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node_urls().is_empty() {
            return Err(missing("nodeUrls"));
        }
        if self.user.is_none() {
            return Err(missing("user"));
        }
        if self.passwd.is_none() {
            return Err(missing("passwd"));
        }
        if self.device_id().trim().is_empty() {
            return Err(missing("deviceId"));
        }
        if self.timestamp_key.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "timestampKey must not be empty".to_string(),
            ));
        }
        self.fixed_schema()?;
        self.pool_config()?.validate().map_err(|e| match e {
            SinkError::Configuration(msg) => ConfigError::Invalid(msg),
            other => ConfigError::Invalid(other.to_string()),
        })
    }

    /// Endpoints with blanks removed.
    pub fn node_urls(&self) -> Vec<String> {
        self.node_urls.clone().unwrap_or_default()
    }

    /// Device identifier template, empty when unset.
    pub fn device_id(&self) -> &str {
        self.device_id.as_deref().unwrap_or("")
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(
            self.user.clone().unwrap_or_default(),
            self.passwd.clone().unwrap_or_default(),
        )
    }

    /// The fixed schema, if `measurements` and `dataTypes` are set.
    pub fn fixed_schema(&self) -> Result<Option<FixedSchema>, ConfigError> {
        let (measurements, data_types) = match (&self.measurements, &self.data_types) {
            (None, None) => return Ok(None),
            (Some(m), Some(t)) => (m, t),
            (Some(_), None) => {
                return Err(ConfigError::Invalid(
                    "measurements requires dataTypes".to_string(),
                ))
            }
            (None, Some(_)) => {
                return Err(ConfigError::Invalid(
                    "dataTypes requires measurements".to_string(),
                ))
            }
        };

        if measurements.len() != data_types.len() {
            return Err(ConfigError::Invalid(format!(
                "measurements has {} entries but dataTypes has {}",
                measurements.len(),
                data_types.len()
            )));
        }
        if measurements.is_empty() {
            return Err(ConfigError::Invalid(
                "measurements must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for m in measurements {
            if m.eq_ignore_ascii_case(&self.timestamp_key) || m.eq_ignore_ascii_case(META_FIELD) {
                return Err(ConfigError::Invalid(format!(
                    "measurement '{}' is reserved and never stored as a column",
                    m
                )));
            }
            if !seen.insert(m.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate measurement '{}'",
                    m
                )));
            }
        }
        let data_types = data_types
            .iter()
            .map(|t| t.parse::<TsDataType>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(Some(FixedSchema {
            measurements: measurements.clone(),
            data_types,
        }))
    }

    /// Pool settings derived from these options.
    pub fn pool_config(&self) -> Result<PoolConfig, ConfigError> {
        let max_size = usize::try_from(self.pool_size)
            .map_err(|_| ConfigError::Invalid(format!("poolSize {} too large", self.pool_size)))?;
        let mut pool = PoolConfig::new(self.node_urls(), self.credentials());
        pool.max_size = max_size;
        pool.idle_timeout = Duration::from_millis(self.idle_timeout_ms);
        pool.wait_timeout = Duration::from_millis(self.wait_timeout_ms);
        Ok(pool)
    }
}

// Keep the password out of logs.
impl fmt::Debug for SinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SinkConfig")
            .field("node_urls", &self.node_urls)
            .field("user", &self.user)
            .field("passwd", &self.passwd.as_ref().map(|_| "***"))
            .field("device_id", &self.device_id)
            .field("measurements", &self.measurements)
            .field("data_types", &self.data_types)
            .field("timestamp_key", &self.timestamp_key)
            .field("pool_size", &self.pool_size)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .field("wait_timeout_ms", &self.wait_timeout_ms)
            .finish()
    }
}

fn missing(key: &str) -> ConfigError {
    ConfigError::Invalid(format!("missing required option '{}'", key))
}

fn split_list(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Lenient deserializers for options that arrive as strings.
mod de {
    use super::{split_list, Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Scalar {
        Text(String),
        Int(i64),
        Uint(u64),
        Float(f64),
        Bool(bool),
    }

    impl Scalar {
        fn into_string(self) -> String {
            match self {
                Scalar::Text(s) => s,
                Scalar::Int(i) => i.to_string(),
                Scalar::Uint(u) => u.to_string(),
                Scalar::Float(f) => f.to_string(),
                Scalar::Bool(b) => b.to_string(),
            }
        }
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrJoined {
        List(Vec<Scalar>),
        Joined(Scalar),
    }

    /// Any scalar, as text.
    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
        Ok(Option::<Scalar>::deserialize(d)?.map(Scalar::into_string))
    }

    pub fn text_or_default<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        Ok(text(d)?.unwrap_or_else(super::default_timestamp_key))
    }

    /// A sequence, or one comma-separated string.
    pub fn list<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<String>>, D::Error> {
        Ok(Option::<ListOrJoined>::deserialize(d)?.map(|v| match v {
            ListOrJoined::List(items) => items
                .into_iter()
                .map(|s| s.into_string().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            ListOrJoined::Joined(joined) => split_list(&joined.into_string()),
        }))
    }

    /// A non-negative integer, or a string holding one.
    pub fn number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
        match Scalar::deserialize(d)? {
            Scalar::Uint(u) => Ok(u),
            Scalar::Int(i) => u64::try_from(i).map_err(|_| {
                serde::de::Error::custom(format!("expected non-negative value, got {}", i))
            }),
            Scalar::Text(s) => s
                .trim()
                .parse::<u64>()
                .map_err(|_| serde::de::Error::custom(format!("expected a number, got '{}'", s))),
            Scalar::Float(f) if f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
                Ok(f as u64)
            }
            Scalar::Float(f) => Err(serde::de::Error::custom(format!(
                "expected a whole number, got {}",
                f
            ))),
            Scalar::Bool(b) => Err(serde::de::Error::custom(format!(
                "expected a number, got {}",
                b
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    const MINIMAL_YAML: &str = r#"
nodeUrls: "127.0.0.1:6667"
user: root
passwd: root
deviceId: "root.ln.wf01"
"#;

    const FULL_YAML: &str = r#"
nodeUrls:
  - "10.0.0.1:6667"
  - "10.0.0.2:6667"
user: admin
passwd: 123456
deviceId: "root/ln/{{.device}}"
measurements: "temperature, status"
dataTypes: "double,BOOLEAN"
timestampKey: time
poolSize: "8"
idleTimeoutMs: 30000
waitTimeoutMs: "500"
"#;

    #[test]
    fn test_parse_minimal_uses_defaults() {
        let config = SinkConfig::from_yaml(MINIMAL_YAML).expect("parse");
        config.validate().expect("valid");

        assert_eq!(config.node_urls(), vec!["127.0.0.1:6667"]);
        assert_eq!(config.device_id(), "root.ln.wf01");
        assert_eq!(config.timestamp_key, "timestamp");
        assert_eq!(config.fixed_schema().expect("schema"), None);

        let pool = config.pool_config().expect("pool");
        assert_eq!(pool.max_size, 3);
        assert_eq!(pool.idle_timeout, Duration::from_secs(60));
        assert_eq!(pool.wait_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_full() {
        let config = SinkConfig::from_yaml(FULL_YAML).expect("parse");
        config.validate().expect("valid");

        assert_eq!(config.node_urls(), vec!["10.0.0.1:6667", "10.0.0.2:6667"]);
        assert_eq!(config.credentials(), Credentials::new("admin", "123456"));
        assert_eq!(config.timestamp_key, "time");

        let schema = config.fixed_schema().expect("schema").expect("fixed");
        assert_eq!(schema.measurements, vec!["temperature", "status"]);
        assert_eq!(
            schema.data_types,
            vec![TsDataType::Double, TsDataType::Boolean]
        );

        let pool = config.pool_config().expect("pool");
        assert_eq!(pool.max_size, 8);
        assert_eq!(pool.idle_timeout, Duration::from_millis(30_000));
        assert_eq!(pool.wait_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_from_properties() {
        let props = json!({
            "nodeUrls": "127.0.0.1:6667,127.0.0.2:6667",
            "user": "root",
            "passwd": "root",
            "deviceId": "root.ln.{{.device}}",
            "poolSize": 2,
            "extra": {"ignored": true}
        });
        let map = props.as_object().expect("object");

        let config = SinkConfig::from_properties(map).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.node_urls().len(), 2);
        assert_eq!(config.pool_size, 2);
    }

    #[test]
    fn test_bad_number_rejected() {
        let props = json!({"poolSize": "many"});
        match SinkConfig::from_properties(props.as_object().expect("object")) {
            Err(ConfigError::Json(_)) => {}
            other => panic!("expected Json error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_required_options() {
        for key in ["nodeUrls", "user", "passwd", "deviceId"] {
            let mut props = json!({
                "nodeUrls": "127.0.0.1:6667",
                "user": "root",
                "passwd": "root",
                "deviceId": "root.sg.d1"
            });
            props.as_object_mut().expect("object").remove(key);
            let config =
                SinkConfig::from_properties(props.as_object().expect("object")).expect("parse");
            match config.validate() {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains(key), "{}", msg),
                other => panic!("expected Invalid for {}, got {:?}", key, other),
            }
        }
    }

    #[test]
    fn test_schema_consistency() {
        let base = SinkConfig::new("h:6667", "root", "root", "root.sg.d1");

        let mismatched = base.clone().with_schema("a,b", "INT32");
        assert!(matches!(mismatched.validate(), Err(ConfigError::Invalid(_))));

        let mut half = base.clone();
        half.measurements = Some(vec!["a".into()]);
        assert!(matches!(half.validate(), Err(ConfigError::Invalid(_))));

        let bad_type = base.clone().with_schema("a", "VARCHAR");
        assert!(matches!(bad_type.validate(), Err(ConfigError::Invalid(_))));

        let duplicate = base.clone().with_schema("a,a", "INT32,INT32");
        assert!(matches!(duplicate.validate(), Err(ConfigError::Invalid(_))));

        base.with_schema("a,b", "INT32,TEXT").validate().expect("valid");
    }

    #[test]
    fn test_schema_rejects_reserved_fields() {
        let base = SinkConfig::new("h:6667", "root", "root", "root.sg.d1");

        let meta = base.clone().with_schema("Meta,v", "TEXT,INT64");
        match meta.validate() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("Meta")),
            other => panic!("expected Invalid, got {:?}", other),
        }

        let timestamp = base.clone().with_schema("TIMESTAMP,v", "INT64,INT64");
        assert!(matches!(timestamp.validate(), Err(ConfigError::Invalid(_))));

        let custom_key = base.with_timestamp_key("time").with_schema("time,v", "INT64,INT64");
        assert!(matches!(custom_key.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_invalid_endpoint_and_pool_size() {
        let no_port = SinkConfig::new("localhost", "root", "root", "root.sg.d1");
        assert!(matches!(no_port.validate(), Err(ConfigError::Invalid(_))));

        let zero = SinkConfig::new("h:6667", "root", "root", "root.sg.d1").with_pool_size(0);
        assert!(matches!(zero.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_debug_hides_password() {
        let config = SinkConfig::new("h:6667", "root", "hunter2", "root.sg.d1");
        assert!(!format!("{:?}", config).contains("hunter2"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(MINIMAL_YAML.as_bytes()).expect("write");

        let config = SinkConfig::from_file(file.path()).expect("load");
        assert_eq!(config.device_id(), "root.ln.wf01");
    }

    #[test]
    fn test_missing_file() {
        let result = SinkConfig::from_file(Path::new("/nonexistent/iotdb-sink.yaml"));
        match result {
            Err(e @ ConfigError::Io(_)) => {
                assert!(e.to_string().starts_with("I/O error: "));
                assert!(std::error::Error::source(&e).is_some());
            }
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn test_yaml_error_keeps_source() {
        let err = SinkConfig::from_yaml("nodeUrls: [unclosed").expect_err("bad yaml");
        assert!(err.to_string().starts_with("YAML parse error: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
