//! LifecycleController - per-device stream state machine
//!
//! ## States
//!
//! `IDLE` (initial) -> `STREAMING` -> `IDLE`
//!
//! ## Transitions
//!
//! - Monitored camera present, `IDLE`, no start in flight: resolve the device
//!   (with registry fallback), start the stream, enter `STREAMING`, then
//!   report `streamIsOn=true`. A failure before the gateway answers leaves
//!   the device `IDLE`; the next telemetry message is the retry.
//! - Monitored camera absent while `STREAMING`: enter `IDLE` and report
//!   `streamIsOn=false`. Repeating it while `IDLE` does nothing.
//!
//! Stops from telemetry and from the inactivity watchdog share [`LifecycleController::stop`].

mod start_gate;

pub use start_gate::{StartGate, StartLease};

use crate::device_state::{DeviceStateTable, LivenessState};
use crate::error::Error;
use crate::registry_client::{RegistryClient, StreamStatusUpdate};
use crate::stream_gateway::StreamGateway;
use crate::telemetry::TelemetryMessage;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What a telemetry message did to its device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleOutcome {
    /// Stream started and reported
    Started { url: String },
    /// Stream stopped and reported
    Stopped,
    /// Nothing to do
    Unchanged,
    /// Another start attempt holds the guard
    StartInFlight,
    /// Start attempt failed; device stays idle
    StartFailed,
    /// Device unknown to the registry
    DeviceNotFound,
}

/// Why a stream was stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Telemetry reported the monitored camera absent
    CameraAbsent,
    /// No telemetry within the inactivity timeout
    Inactivity,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::CameraAbsent => write!(f, "camera_absent"),
            StopReason::Inactivity => write!(f, "inactivity"),
        }
    }
}

/// Read-only view of a device's runtime state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    pub serial: String,
    pub liveness: LivenessState,
    pub last_seen: Option<Instant>,
    pub stream_url: Option<String>,
    pub start_in_flight: bool,
}

struct OpenedStream {
    display_name: String,
    camera: String,
    url: String,
}

/// LifecycleController instance
pub struct LifecycleController {
    registry: Arc<RegistryClient>,
    gateway: Arc<StreamGateway>,
    states: Arc<DeviceStateTable>,
    gate: StartGate,
    start_timeout: Duration,
}

impl LifecycleController {
    pub fn new(
        registry: Arc<RegistryClient>,
        gateway: Arc<StreamGateway>,
        states: Arc<DeviceStateTable>,
        start_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            gateway,
            states,
            gate: StartGate::new(),
            start_timeout,
        }
    }

    /// React to decoded telemetry
    pub async fn handle_telemetry(&self, message: &TelemetryMessage) -> LifecycleOutcome {
        let serial = message.serial.as_str();

        match self.states.liveness(serial).await {
            LivenessState::Streaming => {
                let camera = match self.states.streaming_camera(serial).await {
                    Some(camera) => Some(camera),
                    None => self
                        .registry
                        .cached(serial)
                        .await
                        .and_then(|d| d.monitored_camera().map(str::to_string)),
                };

                match camera {
                    Some(camera) if !message.is_present(&camera) => {
                        if self.stop(serial, StopReason::CameraAbsent).await {
                            LifecycleOutcome::Stopped
                        } else {
                            LifecycleOutcome::Unchanged
                        }
                    }
                    _ => LifecycleOutcome::Unchanged,
                }
            }
            LivenessState::Idle => {
                match self.registry.cached(serial).await {
                    Some(device) => match device.monitored_camera() {
                        Some(camera) if message.is_present(camera) => {}
                        _ => return LifecycleOutcome::Unchanged,
                    },
                    // Unknown device: only worth a registry fetch with some evidence.
                    None if !message.any_present() => return LifecycleOutcome::Unchanged,
                    None => {}
                }
                self.try_start(message).await
            }
        }
    }

    /// STREAMING -> IDLE with a `streamIsOn=false` report.
    ///
    /// Returns `false` without any external call when the device was not
    /// streaming.
    pub async fn stop(&self, serial: &str, reason: StopReason) -> bool {
        if !self.states.mark_idle(serial).await {
            return false;
        }

        tracing::info!(serial = %serial, reason = %reason, "Stream stopped");

        if let Err(e) = self
            .registry
            .report_status(serial, &StreamStatusUpdate::off())
            .await
        {
            tracing::warn!(serial = %serial, error = %e, "Failed to report stream stop");
        }
        true
    }

    /// Snapshot of one device
    pub async fn snapshot(&self, serial: &str) -> Option<DeviceSnapshot> {
        let state = self.states.get(serial).await?;
        Some(DeviceSnapshot {
            serial: serial.to_string(),
            liveness: state.liveness,
            last_seen: state.last_seen,
            stream_url: state.stream_url,
            start_in_flight: self.gate.is_in_flight(serial).await,
        })
    }

    /// Snapshots of every tracked device
    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let mut snapshots = Vec::new();
        for serial in self.states.serials().await {
            if let Some(snapshot) = self.snapshot(&serial).await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Release bookkeeping for a device that left the registry
    pub async fn forget(&self, serial: &str) {
        self.gate.forget(serial).await;
    }

    async fn try_start(&self, message: &TelemetryMessage) -> LifecycleOutcome {
        let serial = message.serial.as_str();

        let Some(_lease) = self.gate.try_acquire(serial).await else {
            return LifecycleOutcome::StartInFlight;
        };

        // A start that finished while we were deciding already did the work.
        if self.states.liveness(serial).await == LivenessState::Streaming {
            return LifecycleOutcome::Unchanged;
        }

        let opened = match tokio::time::timeout(self.start_timeout, self.open_stream(message)).await
        {
            Ok(Ok(opened)) => opened,
            Ok(Err(outcome)) => return outcome,
            Err(_) => {
                let e = Error::Timeout(format!(
                    "stream start exceeded {}s",
                    self.start_timeout.as_secs()
                ));
                tracing::warn!(serial = %serial, error = %e, "Stream start failed");
                return LifecycleOutcome::StartFailed;
            }
        };

        self.commit_start(serial, opened).await
    }

    /// Resolve the device and ask the gateway for a stream
    async fn open_stream(
        &self,
        message: &TelemetryMessage,
    ) -> std::result::Result<OpenedStream, LifecycleOutcome> {
        let serial = message.serial.as_str();

        let Some(device) = self.registry.get_by_serial(serial).await else {
            tracing::warn!(serial = %serial, "Start abandoned, device not in registry");
            return Err(LifecycleOutcome::DeviceNotFound);
        };

        let Some(camera) = device.monitored_camera().map(str::to_string) else {
            tracing::warn!(serial = %serial, "Device has no cameras configured");
            return Err(LifecycleOutcome::Unchanged);
        };

        if !message.is_present(&camera) {
            return Err(LifecycleOutcome::Unchanged);
        }

        match self.gateway.start(&device, &camera).await {
            Ok(url) => Ok(OpenedStream {
                display_name: device.display_name,
                camera,
                url,
            }),
            Err(e) => {
                tracing::warn!(serial = %serial, camera = %camera, error = %e, "Stream start failed");
                Err(LifecycleOutcome::StartFailed)
            }
        }
    }

    /// Enter STREAMING, then report it.
    ///
    /// A failed report leaves the device STREAMING; the next stop reports
    /// `streamIsOn=false` either way.
    async fn commit_start(&self, serial: &str, opened: OpenedStream) -> LifecycleOutcome {
        self.states
            .mark_streaming(serial, &opened.camera, &opened.url, Instant::now())
            .await;
        tracing::info!(
            serial = %serial,
            name = %opened.display_name,
            camera = %opened.camera,
            url = %opened.url,
            "Stream started"
        );

        if let Err(e) = self
            .registry
            .report_status(serial, &StreamStatusUpdate::on(opened.url.as_str()))
            .await
        {
            tracing::warn!(serial = %serial, error = %e, "Failed to report stream start");
        }

        LifecycleOutcome::Started { url: opened.url }
    }
}
