//! Connectivity check: connect to TWS, report the session, disconnect.
//!
//! Reads the same `TWS_*` environment variables as the API server.

use std::process::ExitCode;

use chaindesk_tws::{TwsClient, TwsConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chaindesk_tws=debug,chaindesk_probe=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = TwsConfig::from_env();
    tracing::info!(addr = %config.addr(), client_id = config.client_id, "Probing TWS");

    let client = TwsClient::new(config);
    match client.connect().await {
        Ok(conn) => {
            tracing::info!(
                server_version = conn.server_version(),
                next_order_id = conn.next_order_id(),
                "TWS connection OK",
            );
            conn.shutdown().await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "TWS connection failed");
            ExitCode::FAILURE
        }
    }
}
