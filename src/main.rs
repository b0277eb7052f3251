//! Stream Orchestrator
//!
//! Main entry point.

use std::sync::Arc;
use stream_orchestrator::{
    credential_cache::HttpAuthApi,
    registry_client::HttpRegistryApi,
    stream_gateway::HttpStreamApi,
    telemetry::{spawn_event_loop, MqttBus, BUS_RETRY_DELAY},
    AppConfig, Collaborators, StreamOrchestrator,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "stream_orchestrator=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Stream Orchestrator v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::default();
    config.validate()?;

    tracing::info!(
        registry_url = %config.registry_url,
        stream_gateway_url = %config.stream_gateway_url,
        mqtt_host = %config.mqtt_host,
        mqtt_port = config.mqtt_port,
        "Configuration loaded"
    );

    let timeout = config.timing.http_timeout;
    let registry_api = Arc::new(HttpRegistryApi::new(&config.registry_url, timeout)?);
    let auth_api = Arc::new(HttpAuthApi::new(
        &config.auth_url,
        &config.auth_username,
        &config.auth_password,
        timeout,
    )?);
    let stream_api = Arc::new(HttpStreamApi::new(&config.stream_gateway_url, timeout)?);
    let (bus, eventloop) = MqttBus::connect(&config);

    let orchestrator = StreamOrchestrator::new(
        &config,
        Collaborators {
            registry_api,
            auth_api,
            stream_api,
            bus: Arc::new(bus),
        },
    );

    // Poll the bus before subscribing so subscribe requests drain
    let bus_task = spawn_event_loop(eventloop, orchestrator.subscriber().clone(), BUS_RETRY_DELAY);

    orchestrator.start().await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    orchestrator.stop().await;
    bus_task.abort();

    Ok(())
}
