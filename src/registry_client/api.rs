//! Registry HTTP API adapter

use super::types::{decode_device, decode_device_list, DeviceConfig, StreamStatusUpdate};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

/// Remote registry operations
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// `GET /devices`
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>>;

    /// `GET /devices/{serial}`; `Ok(None)` on 404
    async fn get_device(&self, serial: &str) -> Result<Option<DeviceConfig>>;

    /// `PATCH /devices/{serial}`
    async fn update_status(&self, serial: &str, update: &StreamStatusUpdate) -> Result<()>;
}

/// reqwest-backed registry API
pub struct HttpRegistryApi {
    client: Client,
    base_url: String,
}

impl HttpRegistryApi {
    /// Create new adapter; every request is bounded by `timeout`
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| Error::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn device_url(&self, serial: &str) -> String {
        format!("{}/devices/{}", self.base_url, urlencoding::encode(serial))
    }
}

#[async_trait]
impl RegistryApi for HttpRegistryApi {
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        let url = format!("{}/devices", self.base_url);
        let resp = self.client.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::api(status, resp.text().await.unwrap_or_default()));
        }

        let body: serde_json::Value = resp.json().await?;
        decode_device_list(body)
    }

    async fn get_device(&self, serial: &str) -> Result<Option<DeviceConfig>> {
        let resp = self.client.get(self.device_url(serial)).send().await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: serde_json::Value = resp.json().await?;
                decode_device(body).map(Some)
            }
            status => Err(Error::api(status, resp.text().await.unwrap_or_default())),
        }
    }

    async fn update_status(&self, serial: &str, update: &StreamStatusUpdate) -> Result<()> {
        let resp = self
            .client
            .patch(self.device_url(serial))
            .json(update)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            return Err(Error::api(status, resp.text().await.unwrap_or_default()));
        }

        tracing::debug!(
            serial = %serial,
            stream_is_on = update.stream_is_on,
            "Registry status updated"
        );
        Ok(())
    }
}
