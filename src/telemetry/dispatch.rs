//! Per-device ordered dispatch
//!
//! Every device gets one worker task fed by an unbounded channel. Messages
//! of one device are handled strictly in arrival order, while a slow start
//! for one device never delays another or the bus event loop.

use super::TelemetrySubscriber;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Inbound publish waiting for its device worker
struct Inbound {
    topic: String,
    payload: Vec<u8>,
}

/// TelemetryDispatcher instance
pub struct TelemetryDispatcher {
    subscriber: Arc<TelemetrySubscriber>,
    workers: RwLock<HashMap<String, mpsc::UnboundedSender<Inbound>>>,
}

impl TelemetryDispatcher {
    pub fn new(subscriber: Arc<TelemetrySubscriber>) -> Self {
        Self {
            subscriber,
            workers: RwLock::new(HashMap::new()),
        }
    }

    /// Queue a publish behind earlier ones from the same device
    pub async fn dispatch(&self, topic: String, payload: Vec<u8>) {
        let Some(serial) = self
            .subscriber
            .scheme()
            .serial_from(&topic)
            .map(str::to_string)
        else {
            // Foreign topic: on_message logs and drops it
            self.subscriber.on_message(&topic, &payload).await;
            return;
        };

        let tx = self.worker(&serial).await;
        if tx.send(Inbound { topic, payload }).is_err() {
            tracing::warn!(serial = %serial, "Telemetry worker gone, message dropped");
            self.workers.write().await.remove(&serial);
        }
    }

    /// Devices with a running worker
    pub async fn worker_count(&self) -> usize {
        self.workers.read().await.len()
    }

    async fn worker(&self, serial: &str) -> mpsc::UnboundedSender<Inbound> {
        {
            let workers = self.workers.read().await;
            if let Some(tx) = workers.get(serial) {
                return tx.clone();
            }
        }

        let mut workers = self.workers.write().await;
        workers
            .entry(serial.to_string())
            .or_insert_with(|| {
                let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
                let subscriber = self.subscriber.clone();
                tracing::debug!(serial = %serial, "Telemetry worker started");

                tokio::spawn(async move {
                    while let Some(inbound) = rx.recv().await {
                        subscriber.on_message(&inbound.topic, &inbound.payload).await;
                    }
                });
                tx
            })
            .clone()
    }
}
