//! InactivityWatchdog - detects silent devices
//!
//! ## Responsibilities
//!
//! - Periodic sweep over per-device last-seen timestamps
//! - Forced STREAMING -> IDLE through the controller's stop path
//!
//! The sweep clears `last_seen` of every silent device, so one silence is
//! handled once; the next telemetry message re-arms it. Devices are never
//! forgotten here.

use crate::device_state::{DeviceStateTable, LivenessState};
use crate::lifecycle_controller::{LifecycleController, StopReason};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// InactivityWatchdog instance
pub struct InactivityWatchdog {
    states: Arc<DeviceStateTable>,
    controller: Arc<LifecycleController>,
    timeout: Duration,
    period: Duration,
    running: Arc<RwLock<bool>>,
}

impl InactivityWatchdog {
    pub fn new(
        states: Arc<DeviceStateTable>,
        controller: Arc<LifecycleController>,
        timeout: Duration,
        period: Duration,
    ) -> Self {
        Self {
            states,
            controller,
            timeout,
            period,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// One sweep. Returns how many streams were forced idle.
    pub async fn sweep(&self) -> usize {
        let silent = self.states.take_silent(self.timeout, Instant::now()).await;
        let mut forced = 0;

        for device in silent {
            if device.liveness != LivenessState::Streaming {
                tracing::debug!(serial = %device.serial, "Idle device went silent");
                continue;
            }

            tracing::warn!(
                serial = %device.serial,
                timeout_secs = self.timeout.as_secs(),
                "No telemetry within timeout, forcing stream reset"
            );
            if self.controller.stop(&device.serial, StopReason::Inactivity).await {
                forced += 1;
            }
        }

        forced
    }

    /// Start sweep loop
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Inactivity watchdog already running");
                return None;
            }
            *running = true;
        }

        tracing::info!(
            period_secs = self.period.as_secs(),
            timeout_secs = self.timeout.as_secs(),
            "Starting inactivity watchdog"
        );

        let watchdog = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + watchdog.period, watchdog.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !*watchdog.running.read().await {
                    break;
                }

                watchdog.sweep().await;
            }

            tracing::info!("Inactivity watchdog stopped");
        }))
    }

    /// Stop sweep loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
