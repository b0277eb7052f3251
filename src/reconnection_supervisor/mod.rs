//! ReconnectionSupervisor - registry recovery
//!
//! ## Responsibilities
//!
//! - Reload the registry while it is marked disconnected
//! - Periodic refresh while connected (optional)
//! - Additive telemetry subscription for newly registered devices
//! - Runtime-state reconciliation (removal after the grace period)

use crate::device_state::DeviceStateTable;
use crate::lifecycle_controller::LifecycleController;
use crate::registry_client::{DeviceConfig, RegistryClient};
use crate::telemetry::TelemetrySubscriber;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// What one supervisor tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisorAction {
    /// Registry connected and fresh
    Idle,
    /// Registry reloaded
    Reloaded(DeviceSync),
    /// Reload failed; retried next tick
    ReloadFailed,
}

/// Effect of applying a loaded device set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceSync {
    pub device_count: usize,
    pub new_subscriptions: usize,
    pub removed: Vec<String>,
}

/// ReconnectionSupervisor instance
pub struct ReconnectionSupervisor {
    registry: Arc<RegistryClient>,
    subscriber: Arc<TelemetrySubscriber>,
    states: Arc<DeviceStateTable>,
    controller: Arc<LifecycleController>,
    period: Duration,
    refresh_every: Option<Duration>,
    removal_grace: Duration,
    running: Arc<RwLock<bool>>,
}

impl ReconnectionSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<RegistryClient>,
        subscriber: Arc<TelemetrySubscriber>,
        states: Arc<DeviceStateTable>,
        controller: Arc<LifecycleController>,
        period: Duration,
        refresh_every: Option<Duration>,
        removal_grace: Duration,
    ) -> Self {
        Self {
            registry,
            subscriber,
            states,
            controller,
            period,
            refresh_every,
            removal_grace,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// One supervision step
    pub async fn tick(&self) -> SupervisorAction {
        let connected = self.registry.is_connected().await;

        if connected && !self.refresh_due().await {
            return SupervisorAction::Idle;
        }

        if connected {
            tracing::debug!("Refreshing registry");
        } else {
            tracing::info!("Registry disconnected, attempting reload");
        }

        match self.registry.load().await {
            Ok(devices) => {
                let sync = self.apply(&devices).await;
                if !connected {
                    tracing::info!(
                        device_count = sync.device_count,
                        new_subscriptions = sync.new_subscriptions,
                        "Registry connection recovered"
                    );
                }
                SupervisorAction::Reloaded(sync)
            }
            Err(_) => SupervisorAction::ReloadFailed,
        }
    }

    /// Reconcile runtime state and subscriptions with a loaded device set
    pub async fn apply(&self, devices: &[DeviceConfig]) -> DeviceSync {
        let registered: HashSet<String> = devices.iter().map(|d| d.serial.clone()).collect();

        let reconciled = self
            .states
            .reconcile(&registered, self.removal_grace, Instant::now())
            .await;
        for serial in &reconciled.removed {
            self.controller.forget(serial).await;
        }

        let new_subscriptions = self.subscriber.subscribe_all(&registered).await;

        DeviceSync {
            device_count: registered.len(),
            new_subscriptions,
            removed: reconciled.removed,
        }
    }

    async fn refresh_due(&self) -> bool {
        let Some(every) = self.refresh_every else {
            return false;
        };
        match self.registry.last_loaded_at().await {
            Some(at) => at.elapsed() >= every,
            None => true,
        }
    }

    /// Start supervision loop
    pub async fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        {
            let mut running = self.running.write().await;
            if *running {
                tracing::warn!("Reconnection supervisor already running");
                return None;
            }
            *running = true;
        }

        tracing::info!(period_secs = self.period.as_secs(), "Starting reconnection supervisor");

        let supervisor = self.clone();
        Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + supervisor.period, supervisor.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                if !*supervisor.running.read().await {
                    break;
                }

                supervisor.tick().await;
            }

            tracing::info!("Reconnection supervisor stopped");
        }))
    }

    /// Stop supervision loop
    pub async fn stop(&self) {
        *self.running.write().await = false;
    }
}
