//! TelemetrySubscriber - device telemetry intake
//!
//! ## Responsibilities
//!
//! - One bus subscription per known device serial (additive, never removed)
//! - Decode inbound payloads into [`TelemetryMessage`]
//! - Refresh per-device last-seen and hand presence to the lifecycle controller
//!
//! Undecodable messages are logged and dropped without side effects.

mod bus;
mod dispatch;
mod message;

pub use bus::{spawn_event_loop, MessageBus, MqttBus, BUS_RETRY_DELAY};
pub use dispatch::TelemetryDispatcher;
pub use message::{TelemetryMessage, TopicScheme};

use crate::device_state::DeviceStateTable;
use crate::lifecycle_controller::{LifecycleController, LifecycleOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// TelemetrySubscriber instance
pub struct TelemetrySubscriber {
    bus: Arc<dyn MessageBus>,
    scheme: TopicScheme,
    states: Arc<DeviceStateTable>,
    controller: Arc<LifecycleController>,
    /// Serials with an acknowledged subscription request
    subscribed: RwLock<HashSet<String>>,
}

impl TelemetrySubscriber {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        scheme: TopicScheme,
        states: Arc<DeviceStateTable>,
        controller: Arc<LifecycleController>,
    ) -> Self {
        Self {
            bus,
            scheme,
            states,
            controller,
            subscribed: RwLock::new(HashSet::new()),
        }
    }

    /// Subscribe to every serial not yet subscribed.
    ///
    /// Failures are logged per topic and left for a later call to retry.
    /// Returns how many new subscriptions were made.
    pub async fn subscribe_all<I>(&self, serials: I) -> usize
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut added = 0;

        for serial in serials {
            let serial = serial.as_ref();
            if self.subscribed.read().await.contains(serial) {
                continue;
            }

            let topic = self.scheme.topic_for(serial);
            match self.bus.subscribe(&topic).await {
                Ok(()) => {
                    if self.subscribed.write().await.insert(serial.to_string()) {
                        added += 1;
                        tracing::debug!(serial = %serial, topic = %topic, "Subscribed to telemetry");
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        serial = %serial,
                        topic = %topic,
                        error = %e,
                        "Telemetry subscription failed"
                    );
                }
            }
        }

        if added > 0 {
            tracing::info!(new_subscriptions = added, "Telemetry subscriptions added");
        }
        added
    }

    /// Re-issue every known subscription (after a broker reconnect)
    pub async fn resubscribe_all(&self) -> usize {
        let serials: Vec<String> = self.subscribed.read().await.iter().cloned().collect();
        let mut renewed = 0;

        for serial in &serials {
            let topic = self.scheme.topic_for(serial);
            match self.bus.subscribe(&topic).await {
                Ok(()) => renewed += 1,
                Err(e) => {
                    tracing::warn!(topic = %topic, error = %e, "Telemetry re-subscription failed");
                }
            }
        }

        tracing::info!(renewed = renewed, total = serials.len(), "Telemetry subscriptions renewed");
        renewed
    }

    /// Handle one inbound message. `None` when the message was discarded.
    pub async fn on_message(&self, topic: &str, payload: &[u8]) -> Option<LifecycleOutcome> {
        let message = match TelemetryMessage::decode(&self.scheme, topic, payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(
                    topic = %topic,
                    payload_len = payload.len(),
                    error = %e,
                    "Discarding undecodable telemetry"
                );
                return None;
            }
        };

        self.states.touch(&message.serial, Instant::now()).await;
        Some(self.controller.handle_telemetry(&message).await)
    }

    /// Serials with a subscription
    pub async fn subscribed_serials(&self) -> Vec<String> {
        self.subscribed.read().await.iter().cloned().collect()
    }

    /// Topic layout used for subscriptions
    pub fn scheme(&self) -> &TopicScheme {
        &self.scheme
    }
}
