//! Registry types and wire decoding

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Credentials the streaming gateway uses to pull the device's feed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCredentials {
    pub username: String,
    pub password: String,
    pub port: u16,
}

impl Default for StreamCredentials {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            port: 8554,
        }
    }
}

/// Identity and streaming parameters for one device.
///
/// Owned by the registry client and replaced wholesale on reload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub serial: String,
    pub display_name: String,
    pub credentials: StreamCredentials,
    /// Ordered camera identifiers
    pub cameras: Vec<String>,
}

impl DeviceConfig {
    /// Only the camera at this position drives stream start/stop.
    /// Further cameras present in telemetry are ignored.
    pub const MONITORED_CAMERA_INDEX: usize = 0;

    /// Camera whose presence decides liveness
    pub fn monitored_camera(&self) -> Option<&str> {
        self.cameras
            .get(Self::MONITORED_CAMERA_INDEX)
            .map(String::as_str)
    }
}

/// Body of `PATCH /devices/{serial}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStatusUpdate {
    pub stream_is_on: bool,
    pub stream_url: String,
}

impl StreamStatusUpdate {
    pub fn on(url: impl Into<String>) -> Self {
        Self {
            stream_is_on: true,
            stream_url: url.into(),
        }
    }

    pub fn off() -> Self {
        Self {
            stream_is_on: false,
            stream_url: String::new(),
        }
    }
}

/// Device record as the registry serves it
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRecord {
    #[serde(alias = "serialNumber", alias = "serial")]
    device_serial_number: String,
    #[serde(default)]
    device_name: Option<String>,
    #[serde(default)]
    metadata: Option<RecordMetadata>,
    #[serde(default)]
    stream_credentials: Option<RecordCredentials>,
    #[serde(default)]
    cameras: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RecordMetadata {
    #[serde(default)]
    alias: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordCredentials {
    #[serde(default, alias = "userName")]
    username: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    port: Option<u16>,
}

impl TryFrom<DeviceRecord> for DeviceConfig {
    type Error = Error;

    fn try_from(record: DeviceRecord) -> Result<Self> {
        let serial = record.device_serial_number.trim().to_string();
        if serial.is_empty() {
            return Err(Error::Decode("device record without serial".to_string()));
        }

        let display_name = record
            .metadata
            .and_then(|m| m.alias)
            .filter(|a| !a.trim().is_empty())
            .or(record.device_name.filter(|n| !n.trim().is_empty()))
            .unwrap_or_else(|| serial.clone());

        let credentials = record
            .stream_credentials
            .map(|c| StreamCredentials {
                username: c.username,
                password: c.password,
                port: c.port.unwrap_or(StreamCredentials::default().port),
            })
            .unwrap_or_default();

        let cameras = record
            .cameras
            .into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(DeviceConfig {
            serial,
            display_name,
            credentials,
            cameras,
        })
    }
}

/// Strip an optional `{data: ...}` / `{data: {<key>: ...}}` envelope
fn unwrap_envelope(value: Value, key: &str) -> Value {
    match value {
        Value::Object(mut obj) if obj.contains_key("data") => {
            let data = obj.remove("data").unwrap_or(Value::Null);
            match data {
                Value::Object(mut inner) if inner.contains_key(key) => {
                    inner.remove(key).unwrap_or(Value::Null)
                }
                other => other,
            }
        }
        other => other,
    }
}

/// Decode a `GET /devices` body.
///
/// Malformed individual records are skipped with a warning; a body that is
/// not a list at all is an error.
pub fn decode_device_list(body: Value) -> Result<Vec<DeviceConfig>> {
    let items = match unwrap_envelope(body, "drones") {
        Value::Array(items) => items,
        other => {
            return Err(Error::Decode(format!(
                "device list is not an array: {}",
                type_name(&other)
            )))
        }
    };

    let mut devices = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<DeviceRecord>(item)
            .map_err(|e| Error::Decode(e.to_string()))
            .and_then(DeviceConfig::try_from)
        {
            Ok(device) => devices.push(device),
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed device record");
            }
        }
    }
    Ok(devices)
}

/// Decode a `GET /devices/{serial}` body
pub fn decode_device(body: Value) -> Result<DeviceConfig> {
    let record: DeviceRecord = serde_json::from_value(unwrap_envelope(body, "drone"))
        .map_err(|e| Error::Decode(format!("device record: {}", e)))?;
    DeviceConfig::try_from(record)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
