//! Message bus adapter (MQTT)

use super::{TelemetryDispatcher, TelemetrySubscriber};
use crate::error::{Error, Result};
use crate::state::AppConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Request queue depth between the client handle and the event loop
const REQUEST_CAPACITY: usize = 256;

/// Pause before polling again after a connection error
pub const BUS_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Subscription side of the message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Subscribe to one topic. Subscribing twice is harmless.
    async fn subscribe(&self, topic: &str) -> Result<()>;
}

/// rumqttc-backed bus
pub struct MqttBus {
    client: AsyncClient,
}

impl MqttBus {
    /// Build the client and its (not yet polled) event loop
    pub fn connect(config: &AppConfig) -> (Self, EventLoop) {
        let mut options =
            MqttOptions::new(&config.mqtt_client_id, &config.mqtt_host, config.mqtt_port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);
        if let (Some(user), Some(pass)) = (&config.mqtt_username, &config.mqtt_password) {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        (Self { client }, eventloop)
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| Error::MessageBus(format!("subscribe {}: {}", topic, e)))
    }
}

/// Drive the MQTT event loop.
///
/// Publishes go through a [`TelemetryDispatcher`], so each device sees its
/// messages in order and a slow start call never stalls the connection.
/// Every (re)connect re-subscribes all known topics; errors are logged and
/// polling resumes after `retry_delay`.
pub fn spawn_event_loop(
    mut eventloop: EventLoop,
    subscriber: Arc<TelemetrySubscriber>,
    retry_delay: Duration,
) -> JoinHandle<()> {
    let dispatcher = TelemetryDispatcher::new(subscriber.clone());

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    dispatcher
                        .dispatch(publish.topic, publish.payload.to_vec())
                        .await;
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    tracing::info!("Message bus connected");
                    let subscriber = subscriber.clone();
                    tokio::spawn(async move {
                        subscriber.resubscribe_all().await;
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        retry_delay_secs = retry_delay.as_secs(),
                        "Message bus connection error, reconnecting"
                    );
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    })
}
