//! Application configuration
//!
//! Values are read from the environment (optionally seeded from `.env`),
//! falling back to defaults suitable for a local deployment.

use crate::error::{Error, Result};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Registry API base URL (`/devices` lives below it)
    pub registry_url: String,
    /// Auth service base URL (`/login` lives below it)
    pub auth_url: String,
    /// Auth login username
    pub auth_username: String,
    /// Auth login password
    pub auth_password: String,
    /// Streaming gateway base URL (`/stream/start` lives below it)
    pub stream_gateway_url: String,
    /// MQTT broker host
    pub mqtt_host: String,
    /// MQTT broker port
    pub mqtt_port: u16,
    /// MQTT client id
    pub mqtt_client_id: String,
    /// Optional MQTT credentials
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    /// Telemetry topic prefix (`{prefix}/{serial}/{suffix}`)
    pub topic_prefix: String,
    /// Telemetry topic suffix
    pub topic_suffix: String,
    /// Start-stream `url_type` parameter
    pub stream_url_type: u8,
    /// Start-stream `video_quality` parameter
    pub stream_video_quality: u8,
    /// Timing and retry policy
    pub timing: TimingConfig,
}

/// Timers, timeouts and retry ceilings
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Silence after which a streaming device is forced idle
    pub inactivity_timeout: Duration,
    /// Watchdog sweep period
    pub watchdog_period: Duration,
    /// Reconnection supervisor period
    pub reconnect_period: Duration,
    /// Periodic registry refresh while connected (`None` = disabled)
    pub registry_refresh: Option<Duration>,
    /// Registry load attempt ceiling
    pub max_retry_attempts: u32,
    /// Registry load backoff unit (`delay = base * attempt`)
    pub retry_base_delay: Duration,
    /// Fallback fetch backoff unit
    pub fallback_base_delay: Duration,
    /// Per-request HTTP timeout
    pub http_timeout: Duration,
    /// Deadline for a whole start attempt
    pub start_timeout: Duration,
    /// How long an unregistered device keeps its runtime state
    pub device_removal_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30),
            watchdog_period: Duration::from_secs(10),
            reconnect_period: Duration::from_secs(60),
            registry_refresh: Some(Duration::from_secs(300)),
            max_retry_attempts: 5,
            retry_base_delay: Duration::from_millis(2000),
            fallback_base_delay: Duration::from_millis(1000),
            http_timeout: Duration::from_secs(10),
            start_timeout: Duration::from_secs(20),
            device_removal_grace: Duration::from_secs(600),
        }
    }
}

impl TimingConfig {
    /// Read overrides from the environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            inactivity_timeout: env_secs("INACTIVITY_TIMEOUT_SECS")
                .unwrap_or(defaults.inactivity_timeout),
            watchdog_period: env_secs("WATCHDOG_PERIOD_SECS").unwrap_or(defaults.watchdog_period),
            reconnect_period: env_secs("RECONNECT_PERIOD_SECS")
                .unwrap_or(defaults.reconnect_period),
            registry_refresh: match env_parse::<u64>("REGISTRY_REFRESH_SECS") {
                Some(0) => None,
                Some(secs) => Some(Duration::from_secs(secs)),
                None => defaults.registry_refresh,
            },
            max_retry_attempts: env_parse("MAX_RETRY_ATTEMPTS")
                .unwrap_or(defaults.max_retry_attempts),
            retry_base_delay: env_millis("RETRY_BASE_DELAY_MS")
                .unwrap_or(defaults.retry_base_delay),
            fallback_base_delay: env_millis("FALLBACK_BASE_DELAY_MS")
                .unwrap_or(defaults.fallback_base_delay),
            http_timeout: env_secs("HTTP_TIMEOUT_SECS").unwrap_or(defaults.http_timeout),
            start_timeout: env_secs("START_TIMEOUT_SECS").unwrap_or(defaults.start_timeout),
            device_removal_grace: env_secs("DEVICE_REMOVAL_GRACE_SECS")
                .unwrap_or(defaults.device_removal_grace),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            registry_url: std::env::var("REGISTRY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:5000/api/v1".to_string()),
            auth_url: std::env::var("AUTH_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6789".to_string()),
            auth_username: std::env::var("AUTH_USERNAME").unwrap_or_default(),
            auth_password: std::env::var("AUTH_PASSWORD").unwrap_or_default(),
            stream_gateway_url: std::env::var("STREAM_GATEWAY_URL")
                .unwrap_or_else(|_| "http://127.0.0.1:6789".to_string()),
            mqtt_host: std::env::var("MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            mqtt_port: env_parse("MQTT_PORT").unwrap_or(1883),
            mqtt_client_id: std::env::var("MQTT_CLIENT_ID")
                .unwrap_or_else(|_| "stream-orchestrator".to_string()),
            mqtt_username: std::env::var("MQTT_USERNAME").ok(),
            mqtt_password: std::env::var("MQTT_PASSWORD").ok(),
            topic_prefix: std::env::var("TOPIC_PREFIX")
                .unwrap_or_else(|_| "thing/product".to_string()),
            topic_suffix: std::env::var("TOPIC_SUFFIX").unwrap_or_else(|_| "osd".to_string()),
            stream_url_type: env_parse("STREAM_URL_TYPE").unwrap_or(2),
            stream_video_quality: env_parse("STREAM_VIDEO_QUALITY").unwrap_or(0),
            timing: TimingConfig::from_env(),
        }
    }
}

impl AppConfig {
    /// Reject configurations the control loops cannot run with
    pub fn validate(&self) -> Result<()> {
        let t = &self.timing;
        if t.watchdog_period.is_zero() || t.reconnect_period.is_zero() {
            return Err(Error::Config("timer periods must be non-zero".to_string()));
        }
        if t.inactivity_timeout.is_zero() {
            return Err(Error::Config("inactivity timeout must be non-zero".to_string()));
        }
        if t.start_timeout.is_zero() || t.start_timeout >= t.inactivity_timeout {
            return Err(Error::Config(
                "START_TIMEOUT_SECS must be non-zero and below INACTIVITY_TIMEOUT_SECS".to_string(),
            ));
        }
        if t.max_retry_attempts == 0 {
            return Err(Error::Config("MAX_RETRY_ATTEMPTS must be at least 1".to_string()));
        }
        if self.topic_prefix.is_empty() || self.topic_suffix.is_empty() {
            return Err(Error::Config("topic prefix and suffix must be set".to_string()));
        }
        if t.watchdog_period > t.inactivity_timeout {
            // Detection may lag by up to one extra sweep.
            tracing::warn!(
                watchdog_period_secs = t.watchdog_period.as_secs(),
                inactivity_timeout_secs = t.inactivity_timeout.as_secs(),
                "Watchdog period exceeds inactivity timeout"
            );
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_secs(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parse::<u64>(key).map(Duration::from_millis)
}
