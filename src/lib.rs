//! Stream Orchestrator Library
//!
//! Starts and stops device camera streams from live telemetry.
//!
//! ## Architecture (8 Components)
//!
//! 1. RegistryClient - Device configuration, cache, fallback fetch
//! 2. CredentialCache - Gateway bearer token (single-flight refresh)
//! 3. StreamGateway - Stream start requests
//! 4. DeviceStateTable - Per-device liveness and last-seen
//! 5. TelemetrySubscriber - Message bus intake
//! 6. LifecycleController - IDLE/STREAMING state machine
//! 7. InactivityWatchdog - Forced reset of silent devices
//! 8. ReconnectionSupervisor - Registry recovery and resubscription
//!
//! ## Design Principles
//!
//! - The registry is the source of truth for device configuration
//! - Runtime state lives only in memory and starts IDLE
//! - At most one start attempt per device at any time

pub mod credential_cache;
pub mod device_state;
pub mod error;
pub mod inactivity_watchdog;
pub mod lifecycle_controller;
pub mod orchestrator;
pub mod reconnection_supervisor;
pub mod registry_client;
pub mod state;
pub mod stream_gateway;
pub mod telemetry;

pub use error::{Error, Result};
pub use orchestrator::{Collaborators, StreamOrchestrator};
pub use state::AppConfig;
