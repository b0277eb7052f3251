//! RegistryClient - device configuration from the external registry
//!
//! ## Responsibilities
//!
//! - Bounded reload of the full device set (linear backoff)
//! - Cached lookups with a one-shot remote fallback
//! - Connectivity flag consumed by the reconnection supervisor
//! - Stream status reporting (`PATCH /devices/{serial}`)
//!
//! A failed reload never touches the cached set: the previous devices stay
//! queryable until a later load succeeds.

mod api;
mod types;

pub use api::{HttpRegistryApi, RegistryApi};
pub use types::*;

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Attempts made by the fallback fetch
pub const FALLBACK_ATTEMPTS: u32 = 3;

/// Retry policy for registry calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Full reload attempt ceiling
    pub max_attempts: u32,
    /// Reload backoff unit (`delay = base * attempt`)
    pub base_delay: Duration,
    /// Fallback fetch backoff unit
    pub fallback_base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            fallback_base_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Default)]
struct RegistryCache {
    devices: HashMap<String, DeviceConfig>,
    connected: bool,
    last_loaded_at: Option<Instant>,
}

/// RegistryClient instance
pub struct RegistryClient {
    api: Arc<dyn RegistryApi>,
    policy: RetryPolicy,
    cache: RwLock<RegistryCache>,
}

impl RegistryClient {
    /// Create new RegistryClient with an empty cache, marked disconnected
    pub fn new(api: Arc<dyn RegistryApi>, policy: RetryPolicy) -> Self {
        Self {
            api,
            policy,
            cache: RwLock::new(RegistryCache::default()),
        }
    }

    /// Reload the whole device set.
    ///
    /// Retries up to `max_attempts` times, sleeping `base_delay * attempt`
    /// between attempts. On exhaustion the registry is marked disconnected
    /// and the last error is returned; the cached set is left as it was.
    pub async fn load(&self) -> Result<Vec<DeviceConfig>> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            match self.api.list_devices().await {
                Ok(devices) => {
                    let mut cache = self.cache.write().await;
                    cache.devices = devices
                        .iter()
                        .map(|d| (d.serial.clone(), d.clone()))
                        .collect();
                    cache.connected = true;
                    cache.last_loaded_at = Some(Instant::now());

                    tracing::info!(
                        device_count = cache.devices.len(),
                        attempt = attempt,
                        "Registry loaded"
                    );
                    return Ok(devices);
                }
                Err(e) => {
                    if attempt < max_attempts {
                        let delay = self.policy.base_delay * attempt;
                        tracing::warn!(
                            attempt = attempt,
                            max_attempts = max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Registry load failed, retrying"
                        );
                        last_error = Some(e);
                        tokio::time::sleep(delay).await;
                    } else {
                        last_error = Some(e);
                    }
                }
            }
        }

        self.mark_disconnected().await;
        let error = last_error.unwrap_or_else(|| Error::Internal("registry load failed".to_string()));
        tracing::error!(
            attempts = max_attempts,
            error = %error,
            "Registry unreachable, marked disconnected"
        );
        Err(error)
    }

    /// Look a device up, fetching it once from the registry on a cache miss.
    ///
    /// The fetch makes up to [`FALLBACK_ATTEMPTS`] attempts with delays of
    /// 1x, 2x the fallback unit. A 404 answers immediately with `None`;
    /// exhausting the attempts marks the registry disconnected.
    pub async fn get_by_serial(&self, serial: &str) -> Option<DeviceConfig> {
        if let Some(device) = self.cached(serial).await {
            return Some(device);
        }

        for attempt in 1..=FALLBACK_ATTEMPTS {
            match self.api.get_device(serial).await {
                Ok(Some(device)) => {
                    tracing::info!(serial = %serial, "Device fetched from registry on cache miss");
                    self.cache
                        .write()
                        .await
                        .devices
                        .insert(device.serial.clone(), device.clone());
                    return Some(device);
                }
                Ok(None) => {
                    tracing::warn!(serial = %serial, "Device not registered");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(
                        serial = %serial,
                        attempt = attempt,
                        error = %e,
                        "Device fallback fetch failed"
                    );
                    if attempt < FALLBACK_ATTEMPTS {
                        tokio::time::sleep(self.policy.fallback_base_delay * attempt).await;
                    }
                }
            }
        }

        self.mark_disconnected().await;
        tracing::error!(serial = %serial, "Device fallback fetch exhausted, registry marked disconnected");
        None
    }

    /// Report stream status for a device
    pub async fn report_status(&self, serial: &str, update: &StreamStatusUpdate) -> Result<()> {
        self.api.update_status(serial, update).await
    }

    /// Cached lookup only
    pub async fn cached(&self, serial: &str) -> Option<DeviceConfig> {
        self.cache.read().await.devices.get(serial).cloned()
    }

    /// Whether the last load succeeded
    pub async fn is_connected(&self) -> bool {
        self.cache.read().await.connected
    }

    /// When the last successful load finished
    pub async fn last_loaded_at(&self) -> Option<Instant> {
        self.cache.read().await.last_loaded_at
    }

    async fn mark_disconnected(&self) {
        self.cache.write().await.connected = false;
    }
}
