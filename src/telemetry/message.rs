//! Telemetry topics and payload decoding

use crate::error::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;

/// Topic layout `{prefix}/{serial}/{suffix}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    prefix: String,
    suffix: String,
}

impl TopicScheme {
    pub fn new(prefix: impl AsRef<str>, suffix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_string(),
            suffix: suffix.as_ref().trim_matches('/').to_string(),
        }
    }

    /// Topic carrying telemetry of one device
    pub fn topic_for(&self, serial: &str) -> String {
        format!("{}/{}/{}", self.prefix, serial, self.suffix)
    }

    /// Serial named by a topic, if the topic follows this scheme
    pub fn serial_from<'a>(&self, topic: &'a str) -> Option<&'a str> {
        let rest = topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?;
        let serial = rest.strip_suffix(self.suffix.as_str())?.strip_suffix('/')?;
        if serial.is_empty() || serial.contains('/') {
            return None;
        }
        Some(serial)
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("thing/product", "osd")
    }
}

/// Decoded telemetry of one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryMessage {
    pub serial: String,
    /// camera id -> presence
    pub cameras: HashMap<String, bool>,
}

impl TelemetryMessage {
    /// Decode an inbound publish.
    ///
    /// The payload must be a JSON object. Its `data` member maps camera ids
    /// to presence indicators; a missing or non-object `data` decodes to an
    /// empty map (no camera evidence). `null` and `false` count as absent,
    /// any other value as present.
    pub fn decode(scheme: &TopicScheme, topic: &str, payload: &[u8]) -> Result<Self> {
        let serial = scheme
            .serial_from(topic)
            .ok_or_else(|| Error::Decode(format!("unexpected topic: {}", topic)))?
            .to_string();

        let body: Value = serde_json::from_slice(payload)
            .map_err(|e| Error::Decode(format!("payload is not JSON: {}", e)))?;

        let Value::Object(mut body) = body else {
            return Err(Error::Decode("payload is not a JSON object".to_string()));
        };

        let cameras = match body.remove("data") {
            Some(Value::Object(data)) => data
                .into_iter()
                .map(|(camera, indicator)| (camera, is_presence(&indicator)))
                .collect(),
            _ => HashMap::new(),
        };

        Ok(Self { serial, cameras })
    }

    /// Whether `camera` reported present
    pub fn is_present(&self, camera: &str) -> bool {
        self.cameras.get(camera).copied().unwrap_or(false)
    }

    /// Whether any camera reported present
    pub fn any_present(&self) -> bool {
        self.cameras.values().any(|present| *present)
    }
}

fn is_presence(indicator: &Value) -> bool {
    !matches!(indicator, Value::Null | Value::Bool(false))
}
