use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::ws::manager::WsManager;

/// Spawn a task that pings every connected WebSocket client once per
/// `period`, until `cancel` fires.
///
/// The first ping goes out one full period after start.
pub fn start_heartbeat(
    ws_manager: Arc<WsManager>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let start = tokio::time::Instant::now() + period;
        let mut ticks = tokio::time::interval_at(start, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }

            let clients = ws_manager.connection_count().await;
            if clients == 0 {
                continue;
            }
            tracing::trace!(clients, "Pinging WebSocket clients");
            ws_manager.ping_all().await;
        }

        tracing::debug!("WebSocket heartbeat stopped");
    })
}
