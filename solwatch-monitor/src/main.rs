//! Solwatch monitor - entry point of the monitoring daemon
//!
//! Orchestrates all modules: config, bus client, session controller,
//! liveness ticker, bridges, REST API. The dashboard frontend talks to the
//! REST API; the ESP32 gateway talks to the bus.

mod auth;
mod bridge;
mod config;
mod contracts;
mod feed;
mod firmware;
mod history;
mod http;
mod liveness;
mod models;
mod params;
mod session;
mod state;
mod status;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::auth::AuthClient;
use crate::config::{load_config, topics, MonitorConfig};
use crate::contracts::ContractRegistry;
use crate::feed::{spawn_bus_listener, FeedSinks, TelemetryFeed};
use crate::firmware::FirmwareManager;
use crate::history::HistoryBridge;
use crate::http::AppState;
use crate::liveness::{spawn_liveness_ticker, LivenessState};
use crate::models::TelemetryPacket;
use crate::params::ParamsBridge;
use crate::session::{spawn_session_controller, SessionEvent, SessionMonitor};
use crate::state::new_state;

fn create_bus_client(cfg: &MonitorConfig) -> (AsyncClient, rumqttc::EventLoop) {
    let mut opts = MqttOptions::new(&cfg.mqtt.client_id, &cfg.mqtt.host, cfg.mqtt.port);
    opts.set_keep_alive(Duration::from_secs(15));
    AsyncClient::new(opts, 10)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Environment from .env if present, logging before anything can fail.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cfg = load_config().await;
    info!(
        "starting solwatch-monitor (broker {}:{}, prefix {})",
        cfg.mqtt.host, cfg.mqtt.port, cfg.mqtt.topic_prefix
    );

    // Bus message contracts
    let contracts = match ContractRegistry::load_contracts_from_dir("contracts/mqtt").await {
        Ok(registry) => {
            info!("loaded {} contracts", registry.list_contracts().len());
            registry
        }
        Err(e) => {
            warn!("failed to load contracts: {}", e);
            ContractRegistry::new()
        }
    };

    // Shared state
    let session = new_state(SessionMonitor::new());
    let liveness = new_state(LivenessState::new());
    let latest = new_state::<Option<TelemetryPacket>>(None);

    // Bus client shared by the feed, bridges, and ticker
    let (client, eventloop) = create_bus_client(&cfg);

    // The bookkeeping topics stay subscribed for the whole process lifetime;
    // only the live feed is session-gated.
    for suffix in [topics::HISTORY_RESULT, topics::PARAMS_DATA, topics::FIRMWARE_INFO] {
        let topic = cfg.mqtt.topic(suffix);
        if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
            warn!("subscribe {} failed: {:?}", topic, e);
        }
    }

    let feed = TelemetryFeed::new(client.clone(), &cfg.mqtt);
    let history = Arc::new(HistoryBridge::new(client.clone(), &cfg.mqtt));
    let params = Arc::new(ParamsBridge::new(client.clone(), &cfg.mqtt));
    let firmware = Arc::new(FirmwareManager::new(
        client.clone(),
        &cfg.mqtt,
        cfg.storage.clone(),
    ));

    spawn_bus_listener(
        eventloop,
        cfg.mqtt.clone(),
        FeedSinks {
            liveness: liveness.clone(),
            latest: latest.clone(),
            history: history.clone(),
            params: params.clone(),
            firmware: firmware.clone(),
        },
    );

    // Session controller: REST handlers push events, the controller drives
    // the feed and owns the idle deadline.
    let (events_tx, events_rx) = mpsc::unbounded_channel::<SessionEvent>();
    spawn_session_controller(
        session.clone(),
        events_rx,
        feed.clone(),
        Duration::from_secs(cfg.session.idle_timeout_secs),
    );

    spawn_liveness_ticker(
        liveness.clone(),
        session.clone(),
        client.clone(),
        &cfg.mqtt,
        cfg.liveness.clone(),
    );

    let app_state = AppState {
        session,
        events: events_tx.clone(),
        liveness,
        liveness_conf: cfg.liveness.clone(),
        latest,
        contracts,
        history,
        params,
        firmware,
        auth: Arc::new(AuthClient::new(cfg.auth.clone())),
    };

    let app = http::build_router(app_state);
    let listener = TcpListener::bind(&cfg.http.bind)
        .await
        .with_context(|| format!("bind {}", cfg.http.bind))?;
    info!("listening on http://{}", cfg.http.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_safety_net(feed, events_tx))
        .await
        .context("http server")?;
    Ok(())
}

/// Close the live feed no matter what the idle timer was doing, then let the
/// server drain. Mirrors the frontend's page-hide beacon for the daemon side.
async fn shutdown_safety_net(feed: TelemetryFeed, events: mpsc::UnboundedSender<SessionEvent>) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("shutting down, closing live feed");
    let _ = events.send(SessionEvent::Suspend);
    feed.close().await;
}
