//! Exponential-backoff reconnection for the TWS session.
//!
//! When the socket drops, the broker supervisor calls
//! [`reconnect_loop`] to keep retrying with increasing delays until a
//! session is restored or the [`CancellationToken`] is triggered.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::client::{TwsClient, TwsConnection};

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`ReconnectConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Attempt to reconnect to TWS with exponential backoff.
///
/// Returns `Some(connection)` once a handshake succeeds, or `None` if
/// `cancel` is triggered first.
pub async fn reconnect_loop(
    client: &TwsClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
) -> Option<TwsConnection> {
    let addr = client.config().addr();
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        // Wait before each attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(addr = %addr, "Reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        attempt += 1;
        tracing::info!(
            addr = %addr,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to TWS",
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(addr = %addr, "Reconnect cancelled");
                return None;
            }
            result = client.connect() => {
                match result {
                    Ok(conn) => {
                        tracing::info!(addr = %addr, attempt, "Reconnected to TWS");
                        return Some(conn);
                    }
                    Err(e) => {
                        tracing::warn!(
                            addr = %addr,
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }

        delay = next_delay(delay, config);
    }
}
