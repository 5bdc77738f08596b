//! Push Relay Server - push notification relay for a chat server.

use std::sync::Arc;

use axum::Router;
use color_eyre::eyre::WrapErr as _;
use push_core::{RelayConfig, SharedClock, SystemClock};
use push_gateway::{ApnsRouter, ChannelRouter, GatewayRouter};
use push_service::{
    ConnectionRegistry, DispatchEngine, DispatchPolicy, EventBridge, RegistrationService,
    StandaloneLeadership, ThrottleCache, spawn_purge_task,
};
use tower_http::trace::TraceLayer;

/// Capacity of the host event and outbound notification queues.
const QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    tracing::info!("push-server starting");

    let config = load_config()?;

    // Initialize storage
    let mut storage_config = config.storage.clone();
    if let Ok(database_url) = std::env::var("DATABASE_URL") {
        storage_config.database_url = database_url;
    }

    let storage = push_storage::SqliteStorage::from_config(&storage_config)
        .wrap_err("failed to initialize storage")?;

    storage
        .run_migrations()
        .wrap_err("failed to run migrations")?;

    let router = gateway_router(&config)?;

    // Wire the service layer
    let clock: SharedClock = Arc::new(SystemClock);
    let connections = Arc::new(ConnectionRegistry::new(Arc::clone(&clock)));
    let throttle = Arc::new(ThrottleCache::new());

    let engine = DispatchEngine::new(
        storage.clone(),
        router,
        Arc::clone(&connections),
        Arc::clone(&clock),
    )
    .with_policy(DispatchPolicy::from_config(&config))
    .with_throttle(Arc::clone(&throttle));

    let registrations = Arc::new(RegistrationService::new(storage, Arc::clone(&connections)));
    let bridge = Arc::new(EventBridge::new(Arc::new(engine), Arc::clone(&registrations)));

    let (events, event_rx) = tokio::sync::mpsc::channel(QUEUE_CAPACITY);
    tokio::spawn(bridge.run(event_rx));
    let _purge = spawn_purge_task(throttle, clock, Arc::new(StandaloneLeadership));

    // Build router
    let app = Router::new()
        .merge(push_http::api_router(push_http::AppState {
            registrations,
            events,
            connections,
        }))
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = config.listen_addr.0.as_str();
    tracing::info!(addr = %addr, "listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err("failed to bind")?;

    axum::serve(listener, app).await.wrap_err("server error")?;

    Ok(())
}

fn load_config() -> color_eyre::eyre::Result<RelayConfig> {
    let path = RelayConfig::config_path();

    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(RelayConfig::default());
    }

    let config = RelayConfig::load(&path).wrap_err("failed to load config")?;
    tracing::info!(path = %path.display(), "loaded config");

    Ok(config)
}

/// APNs when configured, otherwise a queue drained into the log.
fn gateway_router(config: &RelayConfig) -> color_eyre::eyre::Result<GatewayRouter> {
    if let Some(apns) = &config.gateway.apns {
        let pkcs12 = std::fs::read(&apns.pkcs12_path).wrap_err_with(|| {
            format!("failed to read APNs certificate {}", apns.pkcs12_path.display())
        })?;

        let router = if apns.sandbox {
            ApnsRouter::sandbox(apns.service.clone(), &pkcs12, &apns.password, &apns.topic)?
        } else {
            ApnsRouter::new(apns.service.clone(), &pkcs12, &apns.password, &apns.topic)?
        };

        tracing::info!(service = %apns.service, topic = %apns.topic, sandbox = apns.sandbox, "routing pushes to APNs");
        return Ok(GatewayRouter::Apns(router));
    }

    tracing::warn!("no gateway configured, push notifications will only be logged");

    let (router, mut rx) = ChannelRouter::new(QUEUE_CAPACITY);
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            tracing::info!(
                service = %notification.service,
                node = %notification.node,
                has_summary = notification.summary.is_some(),
                "push notification"
            );
        }
    });

    Ok(GatewayRouter::Channel(router))
}
