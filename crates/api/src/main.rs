use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chaindesk_core::broker::Broker;
use chaindesk_core::simulated::SimulatedBroker;
use chaindesk_tws::TwsBroker;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chaindesk_api::config::{BrokerMode, ServerConfig};
use chaindesk_api::events::BrokerEventRelay;
use chaindesk_api::router::build_app_router;
use chaindesk_api::state::AppState;
use chaindesk_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "chaindesk_api=debug,chaindesk_tws=info,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = %config.port,
        broker_mode = ?config.broker_mode,
        symbol = %config.feed.symbol,
        "Loaded server configuration",
    );

    // --- Broker ---
    let (broker, tws_events) = match config.broker_mode {
        BrokerMode::Tws => {
            tracing::info!(addr = %config.tws.addr(), client_id = config.tws.client_id, "Using TWS broker");
            let broker = Arc::new(TwsBroker::new(config.tws.clone()));
            let events = broker.subscribe();
            (broker as Arc<dyn Broker>, Some(events))
        }
        BrokerMode::Simulated => {
            tracing::info!(price = config.simulated_price, "Using simulated broker");
            let broker = Arc::new(SimulatedBroker::new(
                config.feed.symbol.clone(),
                config.simulated_price,
            ));
            (broker as Arc<dyn Broker>, None)
        }
    };

    // --- App state ---
    let state = AppState::new(config.clone(), broker);

    // --- WebSocket heartbeat and push emitter ---
    let heartbeat_cancel = CancellationToken::new();
    let heartbeat_handle = ws::start_heartbeat(
        Arc::clone(&state.ws_manager),
        config.heartbeat_interval,
        heartbeat_cancel.clone(),
    );
    let emitter = ws::PushEmitter::new(Arc::clone(&state.ws_manager));
    let emitter_handle = tokio::spawn(emitter.run(state.feed.subscribe()));

    // --- Broker event relay ---
    let relay_handle = tws_events.map(|events| {
        let relay = BrokerEventRelay::new(Arc::clone(&state.feed), Arc::clone(&state.orders));
        tokio::spawn(relay.run(events))
    });

    let feed = Arc::clone(&state.feed);
    let ws_manager = Arc::clone(&state.ws_manager);

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    let _ = tokio::time::timeout(Duration::from_secs(10), feed.disconnect()).await;
    tracing::info!("Market feed and broker shut down");

    if let Some(handle) = relay_handle {
        handle.abort();
    }
    emitter_handle.abort();
    tracing::info!("Event services stopped");

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    heartbeat_cancel.cancel();
    let _ = heartbeat_handle.await;
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
