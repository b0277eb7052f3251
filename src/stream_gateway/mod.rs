//! StreamGateway - streaming service integration
//!
//! ## Responsibilities
//!
//! - Build start-stream requests from device configuration
//! - Attach the cached bearer credential
//! - One re-login and retry when the gateway rejects the credential

use crate::credential_cache::CredentialCache;
use crate::error::{Error, Result};
use crate::registry_client::DeviceConfig;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Body of `POST /stream/start`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartStreamRequest {
    /// Source descriptor (`userName=..&password=..&port=..`, values percent-encoded)
    pub url: String,
    pub url_type: u8,
    /// `{serial}/{camera}/normal-0`
    pub video_id: String,
    pub video_quality: u8,
}

impl StartStreamRequest {
    pub fn for_device(device: &DeviceConfig, camera: &str, url_type: u8, video_quality: u8) -> Self {
        let creds = &device.credentials;
        Self {
            url: format!(
                "userName={}&password={}&port={}",
                urlencoding::encode(&creds.username),
                urlencoding::encode(&creds.password),
                creds.port
            ),
            url_type,
            video_id: format!("{}/{}/normal-0", device.serial, camera),
            video_quality,
        }
    }
}

/// Streaming service transport
#[async_trait]
pub trait StreamApi: Send + Sync {
    /// Start a stream, returning the playable URL.
    ///
    /// A rejected credential must surface as `Error::Unauthorized`.
    async fn start_stream(&self, token: &str, request: &StartStreamRequest) -> Result<String>;
}

#[derive(Debug, Deserialize)]
struct StartStreamResponse {
    url: String,
}

/// Decode a start-stream body (`{url}` or `{data: {url}}`)
fn decode_start_response(body: Value) -> Result<String> {
    let inner = match body {
        Value::Object(mut obj) if !obj.contains_key("url") && obj.contains_key("data") => {
            obj.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };

    let resp: StartStreamResponse = serde_json::from_value(inner)
        .map_err(|e| Error::Decode(format!("start-stream response: {}", e)))?;

    if resp.url.trim().is_empty() {
        return Err(Error::Decode("start-stream response without url".to_string()));
    }
    Ok(resp.url)
}

/// reqwest-backed streaming service
pub struct HttpStreamApi {
    client: Client,
    base_url: String,
}

impl HttpStreamApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl StreamApi for HttpStreamApi {
    async fn start_stream(&self, token: &str, request: &StartStreamRequest) -> Result<String> {
        let url = format!("{}/stream/start", self.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized(format!(
                "stream start rejected credential: HTTP {}",
                status.as_u16()
            )));
        }
        if !status.is_success() {
            return Err(Error::api(status, resp.text().await.unwrap_or_default()));
        }

        let body: Value = resp.json().await?;
        decode_start_response(body)
    }
}

/// StreamGateway instance
pub struct StreamGateway {
    api: Arc<dyn StreamApi>,
    credentials: Arc<CredentialCache>,
    url_type: u8,
    video_quality: u8,
}

impl StreamGateway {
    /// Create new StreamGateway
    pub fn new(
        api: Arc<dyn StreamApi>,
        credentials: Arc<CredentialCache>,
        url_type: u8,
        video_quality: u8,
    ) -> Self {
        Self {
            api,
            credentials,
            url_type,
            video_quality,
        }
    }

    /// Start the stream for one camera of a device and return its URL
    pub async fn start(&self, device: &DeviceConfig, camera: &str) -> Result<String> {
        let request =
            StartStreamRequest::for_device(device, camera, self.url_type, self.video_quality);

        let token = self.credentials.get_token().await?;
        match self.api.start_stream(&token, &request).await {
            Err(Error::Unauthorized(reason)) => {
                tracing::info!(
                    serial = %device.serial,
                    reason = %reason,
                    "Gateway rejected credential, logging in again"
                );
                self.credentials.invalidate().await;
                let token = self.credentials.get_token().await?;
                self.api.start_stream(&token, &request).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry_client::StreamCredentials;
    use serde_json::json;

    #[test]
    fn test_request_for_device() {
        let device = DeviceConfig {
            serial: "BC001".into(),
            display_name: "Dock".into(),
            credentials: StreamCredentials {
                username: "user".into(),
                password: "secret".into(),
                port: 8554,
            },
            cameras: vec!["39-0-7".into()],
        };

        let request = StartStreamRequest::for_device(&device, "39-0-7", 2, 0);
        assert_eq!(request.url, "userName=user&password=secret&port=8554");
        assert_eq!(request.video_id, "BC001/39-0-7/normal-0");

        let body = serde_json::to_value(&request).unwrap();
        assert_eq!(body["url_type"], 2);
        assert_eq!(body["video_quality"], 0);
    }

    #[test]
    fn test_request_encodes_credential_separators() {
        let device = DeviceConfig {
            serial: "BC001".into(),
            display_name: "Dock".into(),
            credentials: StreamCredentials {
                username: "ops team".into(),
                password: "p&ss=w0rd".into(),
                port: 8554,
            },
            cameras: vec!["39-0-7".into()],
        };

        let request = StartStreamRequest::for_device(&device, "39-0-7", 2, 0);
        assert_eq!(
            request.url,
            "userName=ops%20team&password=p%26ss%3Dw0rd&port=8554"
        );
    }

    #[test]
    fn test_decode_start_response() {
        assert_eq!(
            decode_start_response(json!({"url": "rtsp://gw/live/1"})).unwrap(),
            "rtsp://gw/live/1"
        );
        assert_eq!(
            decode_start_response(json!({"code": 0, "data": {"url": "webrtc://gw/1"}})).unwrap(),
            "webrtc://gw/1"
        );
        assert!(decode_start_response(json!({"code": 0, "data": {}})).is_err());
        assert!(decode_start_response(json!({"url": " "})).is_err());
    }
}
