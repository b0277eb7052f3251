//! StreamOrchestrator - component wiring and lifecycle
//!
//! Builds every component around four external collaborators and owns the
//! background loops. Collaborators are trait objects so tests can drive the
//! whole system with in-memory fakes.

use crate::credential_cache::{AuthApi, CredentialCache};
use crate::device_state::DeviceStateTable;
use crate::inactivity_watchdog::InactivityWatchdog;
use crate::lifecycle_controller::LifecycleController;
use crate::reconnection_supervisor::{DeviceSync, ReconnectionSupervisor};
use crate::registry_client::{RegistryApi, RegistryClient, RetryPolicy};
use crate::state::AppConfig;
use crate::stream_gateway::{StreamApi, StreamGateway};
use crate::telemetry::{MessageBus, TelemetrySubscriber, TopicScheme};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// External dependencies
pub struct Collaborators {
    pub registry_api: Arc<dyn RegistryApi>,
    pub auth_api: Arc<dyn AuthApi>,
    pub stream_api: Arc<dyn StreamApi>,
    pub bus: Arc<dyn MessageBus>,
}

/// StreamOrchestrator instance
pub struct StreamOrchestrator {
    registry: Arc<RegistryClient>,
    states: Arc<DeviceStateTable>,
    controller: Arc<LifecycleController>,
    subscriber: Arc<TelemetrySubscriber>,
    watchdog: Arc<InactivityWatchdog>,
    supervisor: Arc<ReconnectionSupervisor>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl StreamOrchestrator {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Self {
        let timing = &config.timing;

        let registry = Arc::new(RegistryClient::new(
            collaborators.registry_api,
            RetryPolicy {
                max_attempts: timing.max_retry_attempts,
                base_delay: timing.retry_base_delay,
                fallback_base_delay: timing.fallback_base_delay,
            },
        ));
        let credentials = Arc::new(CredentialCache::new(collaborators.auth_api));
        let gateway = Arc::new(StreamGateway::new(
            collaborators.stream_api,
            credentials,
            config.stream_url_type,
            config.stream_video_quality,
        ));
        let states = Arc::new(DeviceStateTable::new());
        let controller = Arc::new(LifecycleController::new(
            registry.clone(),
            gateway,
            states.clone(),
            timing.start_timeout,
        ));
        let subscriber = Arc::new(TelemetrySubscriber::new(
            collaborators.bus,
            TopicScheme::new(&config.topic_prefix, &config.topic_suffix),
            states.clone(),
            controller.clone(),
        ));
        let watchdog = Arc::new(InactivityWatchdog::new(
            states.clone(),
            controller.clone(),
            timing.inactivity_timeout,
            timing.watchdog_period,
        ));
        let supervisor = Arc::new(ReconnectionSupervisor::new(
            registry.clone(),
            subscriber.clone(),
            states.clone(),
            controller.clone(),
            timing.reconnect_period,
            timing.registry_refresh,
            timing.device_removal_grace,
        ));

        Self {
            registry,
            states,
            controller,
            subscriber,
            watchdog,
            supervisor,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Initial registry load, subscriptions, then the background loops.
    ///
    /// A failed initial load is not fatal: the supervisor keeps retrying and
    /// subscribes once the registry answers.
    pub async fn start(&self) -> Option<DeviceSync> {
        let initial = match self.registry.load().await {
            Ok(devices) => Some(self.supervisor.apply(&devices).await),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Initial registry load failed, continuing disconnected"
                );
                None
            }
        };

        let mut tasks = self.tasks.lock().await;
        if let Some(handle) = self.watchdog.start().await {
            tasks.push(handle);
        }
        if let Some(handle) = self.supervisor.start().await {
            tasks.push(handle);
        }

        tracing::info!(
            devices = initial.as_ref().map(|s| s.device_count).unwrap_or(0),
            "Stream orchestrator started"
        );
        initial
    }

    /// Stop the background loops
    pub async fn stop(&self) {
        self.watchdog.stop().await;
        self.supervisor.stop().await;
        for handle in self.tasks.lock().await.drain(..) {
            handle.abort();
        }
        tracing::info!("Stream orchestrator stopped");
    }

    pub fn registry(&self) -> &Arc<RegistryClient> {
        &self.registry
    }

    pub fn states(&self) -> &Arc<DeviceStateTable> {
        &self.states
    }

    pub fn controller(&self) -> &Arc<LifecycleController> {
        &self.controller
    }

    pub fn subscriber(&self) -> &Arc<TelemetrySubscriber> {
        &self.subscriber
    }

    pub fn watchdog(&self) -> &Arc<InactivityWatchdog> {
        &self.watchdog
    }

    pub fn supervisor(&self) -> &Arc<ReconnectionSupervisor> {
        &self.supervisor
    }
}
