//! In-memory collaborators and a wired orchestrator for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_orchestrator::credential_cache::{AuthApi, LoginGrant};
use stream_orchestrator::registry_client::{
    DeviceConfig, RegistryApi, StreamCredentials, StreamStatusUpdate,
};
use stream_orchestrator::state::TimingConfig;
use stream_orchestrator::stream_gateway::{StartStreamRequest, StreamApi};
use stream_orchestrator::telemetry::MessageBus;
use stream_orchestrator::{AppConfig, Collaborators, Error, Result, StreamOrchestrator};

pub fn device(serial: &str, cameras: &[&str]) -> DeviceConfig {
    DeviceConfig {
        serial: serial.to_string(),
        display_name: format!("{} (test)", serial),
        credentials: StreamCredentials {
            username: "viewer".to_string(),
            password: "secret".to_string(),
            port: 8554,
        },
        cameras: cameras.iter().map(|c| c.to_string()).collect(),
    }
}

pub fn topic(serial: &str) -> String {
    format!("thing/product/{}/osd", serial)
}

/// OSD payload reporting `present` cameras; every other camera is absent
pub fn osd(present: &[&str]) -> Vec<u8> {
    let mut data = Map::new();
    for camera in present {
        data.insert(camera.to_string(), json!({ "height": 120.5, "gimbal_pitch": -30 }));
    }
    serde_json::to_vec(&json!({ "timestamp": 1_700_000_000_000u64, "data": Value::Object(data) }))
        .unwrap_or_default()
}

// ========================================
// Registry
// ========================================

#[derive(Default)]
pub struct FakeRegistryApi {
    devices: Mutex<HashMap<String, DeviceConfig>>,
    updates: Mutex<Vec<(String, StreamStatusUpdate)>>,
    pub fail_list: AtomicBool,
    pub fail_get: AtomicBool,
    pub fail_update: AtomicBool,
    pub list_calls: AtomicU32,
    pub get_calls: AtomicU32,
}

impl FakeRegistryApi {
    pub fn insert(&self, device: DeviceConfig) {
        self.devices
            .lock()
            .unwrap()
            .insert(device.serial.clone(), device);
    }

    pub fn remove(&self, serial: &str) {
        self.devices.lock().unwrap().remove(serial);
    }

    pub fn updates(&self) -> Vec<(String, StreamStatusUpdate)> {
        self.updates.lock().unwrap().clone()
    }

    pub fn updates_for(&self, serial: &str) -> Vec<StreamStatusUpdate> {
        self.updates()
            .into_iter()
            .filter(|(s, _)| s == serial)
            .map(|(_, u)| u)
            .collect()
    }
}

#[async_trait]
impl RegistryApi for FakeRegistryApi {
    async fn list_devices(&self) -> Result<Vec<DeviceConfig>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(Error::Network("connection refused".to_string()));
        }
        Ok(self.devices.lock().unwrap().values().cloned().collect())
    }

    async fn get_device(&self, serial: &str) -> Result<Option<DeviceConfig>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(self.devices.lock().unwrap().get(serial).cloned())
    }

    async fn update_status(&self, serial: &str, update: &StreamStatusUpdate) -> Result<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(Error::Network("registry unreachable".to_string()));
        }
        self.updates
            .lock()
            .unwrap()
            .push((serial.to_string(), update.clone()));
        Ok(())
    }
}

// ========================================
// Auth
// ========================================

#[derive(Default)]
pub struct FakeAuthApi {
    pub login_calls: AtomicU32,
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn login(&self) -> Result<LoginGrant> {
        let n = self.login_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LoginGrant {
            token: format!("token-{}", n),
            expires_in: Some(3600),
        })
    }
}

// ========================================
// Streaming gateway
// ========================================

#[derive(Default)]
pub struct FakeStreamApi {
    requests: Mutex<Vec<(String, StartStreamRequest)>>,
    delay: Mutex<Duration>,
    /// Upcoming calls answered with `Unauthorized`
    pub reject_next: AtomicU32,
    pub fail: AtomicBool,
}

impl FakeStreamApi {
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<(String, StartStreamRequest)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl StreamApi for FakeStreamApi {
    async fn start_stream(&self, token: &str, request: &StartStreamRequest) -> Result<String> {
        self.requests
            .lock()
            .unwrap()
            .push((token.to_string(), request.clone()));

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let rejected = self
            .reject_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::Unauthorized("token expired".to_string()));
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Api {
                status: 500,
                message: "encoder busy".to_string(),
            });
        }

        Ok(format!("rtmp://gateway.local/live/{}", request.video_id))
    }
}

// ========================================
// Message bus
// ========================================

#[derive(Default)]
pub struct FakeBus {
    topics: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeBus {
    pub fn fail_topic(&self, topic: &str) {
        self.failing.lock().unwrap().insert(topic.to_string());
    }

    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn topics(&self) -> Vec<String> {
        self.topics.lock().unwrap().clone()
    }
}

#[async_trait]
impl MessageBus for FakeBus {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(topic) {
            return Err(Error::MessageBus(format!("subscribe {}: rejected", topic)));
        }
        self.topics.lock().unwrap().push(topic.to_string());
        Ok(())
    }
}

// ========================================
// Harness
// ========================================

pub fn test_config() -> AppConfig {
    AppConfig {
        registry_url: "http://registry.test/api/v1".to_string(),
        auth_url: "http://gateway.test".to_string(),
        auth_username: "operator".to_string(),
        auth_password: "secret".to_string(),
        stream_gateway_url: "http://gateway.test".to_string(),
        mqtt_host: "localhost".to_string(),
        mqtt_port: 1883,
        mqtt_client_id: "stream-orchestrator-test".to_string(),
        mqtt_username: None,
        mqtt_password: None,
        topic_prefix: "thing/product".to_string(),
        topic_suffix: "osd".to_string(),
        stream_url_type: 2,
        stream_video_quality: 0,
        timing: TimingConfig::default(),
    }
}

pub struct Harness {
    pub orchestrator: StreamOrchestrator,
    pub registry: Arc<FakeRegistryApi>,
    pub auth: Arc<FakeAuthApi>,
    pub stream: Arc<FakeStreamApi>,
    pub bus: Arc<FakeBus>,
}

impl Harness {
    pub fn new(devices: Vec<DeviceConfig>) -> Self {
        Self::with_config(test_config(), devices)
    }

    pub fn with_config(config: AppConfig, devices: Vec<DeviceConfig>) -> Self {
        let registry = Arc::new(FakeRegistryApi::default());
        for device in devices {
            registry.insert(device);
        }
        let auth = Arc::new(FakeAuthApi::default());
        let stream = Arc::new(FakeStreamApi::default());
        let bus = Arc::new(FakeBus::default());

        let orchestrator = StreamOrchestrator::new(
            &config,
            Collaborators {
                registry_api: registry.clone(),
                auth_api: auth.clone(),
                stream_api: stream.clone(),
                bus: bus.clone(),
            },
        );

        Self {
            orchestrator,
            registry,
            auth,
            stream,
            bus,
        }
    }

    /// Initial load and subscriptions without the background loops
    pub async fn bootstrap(&self) {
        let devices = self
            .orchestrator
            .registry()
            .load()
            .await
            .expect("initial load");
        self.orchestrator.supervisor().apply(&devices).await;
    }

    pub async fn publish(
        &self,
        serial: &str,
        present: &[&str],
    ) -> Option<stream_orchestrator::lifecycle_controller::LifecycleOutcome> {
        self.orchestrator
            .subscriber()
            .on_message(&topic(serial), &osd(present))
            .await
    }
}
