//! [`Broker`] implementation over a supervised TWS connection.
//!
//! [`TwsBroker::connect`] opens the first session and spawns a supervisor
//! task. When the socket drops unexpectedly the supervisor clears the
//! current session and reconnects with backoff until
//! [`TwsBroker::disconnect`] is called.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chaindesk_core::broker::{Broker, BrokerError, OptionChainParams, OrderStatusReport};
use chaindesk_core::contract::Contract;
use chaindesk_core::order::Order;
use chaindesk_core::quote::Quote;
use chaindesk_core::types::OrderId;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::client::{TwsClient, TwsConfig, TwsConnection};
use crate::events::TwsEvent;
use crate::reconnect::{reconnect_loop, ReconnectConfig};

type Slot = Arc<RwLock<Option<Arc<TwsConnection>>>>;

/// Supervisor task bookkeeping.
struct Supervisor {
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

pub struct TwsBroker {
    client: Arc<TwsClient>,
    current: Slot,
    supervisor: Mutex<Option<Supervisor>>,
    /// Serialises connect/disconnect.
    lifecycle: tokio::sync::Mutex<()>,
    reconnect: ReconnectConfig,
}

impl TwsBroker {
    pub fn new(config: TwsConfig) -> Self {
        Self::with_reconnect(config, ReconnectConfig::default())
    }

    pub fn with_reconnect(config: TwsConfig, reconnect: ReconnectConfig) -> Self {
        Self {
            client: Arc::new(TwsClient::new(config)),
            current: Arc::new(RwLock::new(None)),
            supervisor: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            reconnect,
        }
    }

    /// Subscribe to session events. Survives reconnects.
    pub fn subscribe(&self) -> broadcast::Receiver<TwsEvent> {
        self.client.subscribe()
    }

    fn connection(&self) -> Result<Arc<TwsConnection>, BrokerError> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .filter(|c| c.is_connected())
            .cloned()
            .ok_or(BrokerError::NotConnected)
    }

    fn take_supervisor(&self) -> Option<Supervisor> {
        self.supervisor.lock().unwrap_or_else(|e| e.into_inner()).take()
    }
}

fn set_slot(slot: &Slot, conn: Option<Arc<TwsConnection>>) -> Option<Arc<TwsConnection>> {
    std::mem::replace(&mut *slot.write().unwrap_or_else(|e| e.into_inner()), conn)
}

/// Watch the current session and replace it when it drops.
async fn supervise(
    client: Arc<TwsClient>,
    slot: Slot,
    first: CancellationToken,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
) {
    let mut closed = first;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = closed.cancelled() => {}
        }

        tracing::warn!("TWS connection lost, reconnecting");
        set_slot(&slot, None);

        match reconnect_loop(&client, &reconnect, &cancel).await {
            Some(conn) => {
                closed = conn.closed();
                set_slot(&slot, Some(Arc::new(conn)));
            }
            None => return,
        }
    }
}

#[async_trait]
impl Broker for TwsBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        let _guard = self.lifecycle.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        // A previous session may still be reconnecting.
        if let Some(old) = self.take_supervisor() {
            old.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), old.handle).await;
        }

        let conn = self.client.connect().await.map_err(|e| {
            tracing::error!(error = %e, addr = %self.client.config().addr(), "Failed to connect to TWS");
            BrokerError::from(e)
        })?;
        let closed = conn.closed();
        set_slot(&self.current, Some(Arc::new(conn)));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(supervise(
            Arc::clone(&self.client),
            Arc::clone(&self.current),
            closed,
            self.reconnect.clone(),
            cancel.clone(),
        ));
        *self.supervisor.lock().unwrap_or_else(|e| e.into_inner()) = Some(Supervisor { cancel, handle });
        Ok(())
    }

    async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(sup) = self.take_supervisor() {
            sup.cancel.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), sup.handle).await;
        }
        if let Some(conn) = set_slot(&self.current, None) {
            conn.shutdown().await;
            tracing::info!("Disconnected from TWS");
        }
    }

    fn is_connected(&self) -> bool {
        self.connection().is_ok()
    }

    /// Resolve through REQ_CONTRACT_DATA. The first match wins; the
    /// requested routing exchange is kept.
    async fn qualify(&self, contract: &Contract) -> Result<Contract, BrokerError> {
        let conn = self.connection()?;
        let mut matches = conn.contract_details(contract).await?;
        if matches.len() > 1 {
            tracing::debug!(
                contract = %contract.describe(),
                count = matches.len(),
                "Ambiguous contract, using first match",
            );
        }
        if matches.is_empty() {
            return Err(BrokerError::Unqualified(contract.describe()));
        }
        let mut qualified = matches.swap_remove(0);
        if !contract.exchange.is_empty() {
            qualified.exchange = contract.exchange.clone();
        }
        Ok(qualified)
    }

    async fn option_params(&self, underlying: &Contract) -> Result<Vec<OptionChainParams>, BrokerError> {
        self.connection()?.option_params(underlying).await
    }

    async fn snapshot(&self, contract: &Contract) -> Result<Quote, BrokerError> {
        self.connection()?.snapshot(contract).await
    }

    async fn place_order(&self, contract: &Contract, order: &Order) -> Result<OrderId, BrokerError> {
        self.connection()?.place_order(contract, order).await
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        self.connection()?.cancel_order(order_id).await
    }

    async fn order_status(&self, order_id: OrderId) -> Option<OrderStatusReport> {
        self.client.order_status(order_id)
    }
}
