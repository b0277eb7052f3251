//! Device State Table
//!
//! Per-device runtime state shared by the telemetry path, the watchdog and
//! the reconnection supervisor. Transitions report whether they actually
//! changed anything so callers issue each external side effect once.
//!
//! Entries appear on first telemetry or first registry load and are only
//! removed by registry reconciliation after the removal grace period.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Stream liveness of a device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessState {
    /// No stream running (initial)
    #[default]
    Idle,
    /// Stream started and reported
    Streaming,
}

/// Mutable state of one device
#[derive(Debug, Clone, Default)]
pub struct DeviceRuntimeState {
    pub liveness: LivenessState,
    /// Last telemetry arrival; cleared once the watchdog has handled a silence
    pub last_seen: Option<Instant>,
    /// URL returned by the gateway while streaming
    pub stream_url: Option<String>,
    /// Camera that started the current stream
    pub streaming_camera: Option<String>,
    /// First reconciliation that no longer found the device registered
    missing_since: Option<Instant>,
}

impl DeviceRuntimeState {
    pub fn missing_since(&self) -> Option<Instant> {
        self.missing_since
    }
}

/// Device found silent by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SilentDevice {
    pub serial: String,
    pub liveness: LivenessState,
}

/// Outcome of reconciling the table against a registry load
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileResult {
    /// Registered devices that got a fresh runtime state
    pub added: Vec<String>,
    /// Unregistered devices dropped after the grace period
    pub removed: Vec<String>,
}

/// Tracks runtime state for every known device
pub struct DeviceStateTable {
    states: RwLock<HashMap<String, DeviceRuntimeState>>,
}

impl DeviceStateTable {
    /// Create empty table
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Record telemetry arrival
    pub async fn touch(&self, serial: &str, now: Instant) {
        let mut states = self.states.write().await;
        states.entry(serial.to_string()).or_default().last_seen = Some(now);
    }

    /// Current liveness (`Idle` for unknown devices)
    pub async fn liveness(&self, serial: &str) -> LivenessState {
        self.states
            .read()
            .await
            .get(serial)
            .map(|s| s.liveness)
            .unwrap_or_default()
    }

    /// Camera that started the current stream, if streaming
    pub async fn streaming_camera(&self, serial: &str) -> Option<String> {
        self.states
            .read()
            .await
            .get(serial)
            .and_then(|s| s.streaming_camera.clone())
    }

    /// IDLE -> STREAMING. Returns `false` if already streaming.
    ///
    /// A sweep may have consumed `last_seen` while the start was in flight;
    /// the transition re-arms it so the new stream stays watched.
    pub async fn mark_streaming(
        &self,
        serial: &str,
        camera: &str,
        url: &str,
        now: Instant,
    ) -> bool {
        let mut states = self.states.write().await;
        let entry = states.entry(serial.to_string()).or_default();
        if entry.liveness == LivenessState::Streaming {
            return false;
        }
        entry.liveness = LivenessState::Streaming;
        entry.stream_url = Some(url.to_string());
        entry.streaming_camera = Some(camera.to_string());
        entry.last_seen.get_or_insert(now);

        tracing::debug!(serial = %serial, camera = %camera, "Device marked streaming");
        true
    }

    /// STREAMING -> IDLE. Returns `false` when there was nothing to stop.
    pub async fn mark_idle(&self, serial: &str) -> bool {
        let mut states = self.states.write().await;
        match states.get_mut(serial) {
            Some(entry) if entry.liveness == LivenessState::Streaming => {
                entry.liveness = LivenessState::Idle;
                entry.stream_url = None;
                entry.streaming_camera = None;
                tracing::debug!(serial = %serial, "Device marked idle");
                true
            }
            _ => false,
        }
    }

    /// Collect devices silent for longer than `timeout` and clear their
    /// `last_seen`, so each silence is returned exactly once.
    pub async fn take_silent(&self, timeout: Duration, now: Instant) -> Vec<SilentDevice> {
        let mut states = self.states.write().await;
        let mut silent = Vec::new();

        for (serial, state) in states.iter_mut() {
            let Some(last_seen) = state.last_seen else {
                continue;
            };
            if now.saturating_duration_since(last_seen) > timeout {
                state.last_seen = None;
                silent.push(SilentDevice {
                    serial: serial.clone(),
                    liveness: state.liveness,
                });
            }
        }

        silent
    }

    /// Align the table with a freshly loaded registry.
    ///
    /// Registered devices get an entry and lose any missing mark. Entries for
    /// unregistered devices are marked missing, then removed once missing
    /// for longer than `grace`.
    pub async fn reconcile(
        &self,
        registered: &HashSet<String>,
        grace: Duration,
        now: Instant,
    ) -> ReconcileResult {
        let mut states = self.states.write().await;
        let mut result = ReconcileResult::default();

        for serial in registered {
            match states.get_mut(serial) {
                Some(state) => state.missing_since = None,
                None => {
                    states.insert(serial.clone(), DeviceRuntimeState::default());
                    result.added.push(serial.clone());
                }
            }
        }

        states.retain(|serial, state| {
            if registered.contains(serial) {
                return true;
            }
            let since = *state.missing_since.get_or_insert(now);
            if now.saturating_duration_since(since) > grace {
                result.removed.push(serial.clone());
                false
            } else {
                true
            }
        });

        for serial in &result.removed {
            tracing::info!(serial = %serial, "Device left the registry, runtime state removed");
        }

        result
    }

    /// Copy of a device's state
    pub async fn get(&self, serial: &str) -> Option<DeviceRuntimeState> {
        self.states.read().await.get(serial).cloned()
    }

    /// All tracked serials
    pub async fn serials(&self) -> Vec<String> {
        self.states.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

impl Default for DeviceStateTable {
    fn default() -> Self {
        Self::new()
    }
}
