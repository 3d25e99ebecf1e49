//! TCP client for the TWS socket API.
//!
//! [`TwsClient`] holds the connection settings for one TWS (or IB
//! Gateway) endpoint. Call [`TwsClient::connect`] to perform the API
//! handshake and get a live [`TwsConnection`]; a reader task owned by the
//! connection routes every reply back to the request that asked for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chaindesk_core::broker::{BrokerError, OptionChainParams, OrderStatusReport};
use chaindesk_core::contract::Contract;
use chaindesk_core::order::Order;
use chaindesk_core::quote::Quote;
use chaindesk_core::types::{OrderId, ReqId};
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use crate::codec::{handshake_bytes, TwsCodec, MIN_CLIENT_VERSION};
use crate::error::TwsError;
use crate::events::TwsEvent;
use crate::messages;
use crate::processor::process_messages;

/// Broadcast channel capacity for session events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Request ids start here so they never collide with order ids, which
/// share the id space of error messages.
const FIRST_REQ_ID: ReqId = 10_000_000;

/// Connection settings for a TWS endpoint.
#[derive(Debug, Clone)]
pub struct TwsConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    /// TCP connect plus handshake, and separately the wait for the first
    /// NEXT_VALID_ID.
    pub connect_timeout: Duration,
    /// Contract details and option-chain parameter requests.
    pub request_timeout: Duration,
    /// Market-data snapshots. On expiry the partial quote is returned.
    pub snapshot_timeout: Duration,
    /// 1 = live, 3 = delayed. Anything other than 1 is requested
    /// right after the handshake.
    pub market_data_type: i32,
}

impl Default for TwsConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 7496,
            client_id: 1,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            snapshot_timeout: Duration::from_secs(2),
            market_data_type: 1,
        }
    }
}

impl TwsConfig {
    /// Load settings from environment variables with defaults.
    ///
    /// | Env Var            | Default     |
    /// |--------------------|-------------|
    /// | `TWS_HOST`         | `127.0.0.1` |
    /// | `TWS_PORT`         | `7496`      |
    /// | `TWS_CLIENT_ID`    | `1`         |
    /// | `MARKET_DATA_TYPE` | `1`         |
    pub fn from_env() -> Self {
        let host = std::env::var("TWS_HOST").unwrap_or_else(|_| "127.0.0.1".into());

        let port: u16 = std::env::var("TWS_PORT")
            .unwrap_or_else(|_| "7496".into())
            .parse()
            .expect("TWS_PORT must be a valid u16");

        let client_id: i32 = std::env::var("TWS_CLIENT_ID")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("TWS_CLIENT_ID must be a valid i32");

        let market_data_type: i32 = std::env::var("MARKET_DATA_TYPE")
            .unwrap_or_else(|_| "1".into())
            .parse()
            .expect("MARKET_DATA_TYPE must be 1, 2, 3 or 4");

        Self {
            host,
            port,
            client_id,
            market_data_type,
            ..Self::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A reply being assembled by the reader task.
pub(crate) enum Pending {
    ContractDetails {
        found: Vec<Contract>,
        tx: oneshot::Sender<Result<Vec<Contract>, BrokerError>>,
    },
    OptionParams {
        found: Vec<OptionChainParams>,
        tx: oneshot::Sender<Result<Vec<OptionChainParams>, BrokerError>>,
    },
    Snapshot {
        quote: Quote,
        tx: oneshot::Sender<Result<Quote, BrokerError>>,
    },
}

impl Pending {
    /// Resolve with whatever has been collected so far.
    pub(crate) fn complete(self) {
        match self {
            Pending::ContractDetails { found, tx } => {
                let _ = tx.send(Ok(found));
            }
            Pending::OptionParams { found, tx } => {
                let _ = tx.send(Ok(found));
            }
            Pending::Snapshot { quote, tx } => {
                let _ = tx.send(Ok(quote));
            }
        }
    }

    pub(crate) fn fail(self, err: BrokerError) {
        match self {
            Pending::ContractDetails { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Pending::OptionParams { tx, .. } => {
                let _ = tx.send(Err(err));
            }
            Pending::Snapshot { tx, .. } => {
                let _ = tx.send(Err(err));
            }
        }
    }
}

/// State shared between a connection and its reader task.
pub(crate) struct Shared {
    pub(crate) server_version: i32,
    pub(crate) pending: Mutex<HashMap<ReqId, Pending>>,
    pub(crate) order_statuses: Arc<RwLock<HashMap<OrderId, OrderStatusReport>>>,
    pub(crate) next_order_id: AtomicI64,
    next_req_id: AtomicI32,
    pub(crate) connected: AtomicBool,
    pub(crate) events: broadcast::Sender<TwsEvent>,
    /// Set by NEXT_VALID_ID; the handshake waits on it.
    pub(crate) ready: watch::Sender<Option<OrderId>>,
    /// Cancelled when the connection is closed for any reason.
    pub(crate) closed: CancellationToken,
}

impl Shared {
    fn next_req_id(&self) -> ReqId {
        self.next_req_id.fetch_add(1, Ordering::Relaxed)
    }

    fn register(&self, req_id: ReqId, pending: Pending) {
        self.lock_pending().insert(req_id, pending);
    }

    pub(crate) fn take_pending(&self, req_id: ReqId) -> Option<Pending> {
        self.lock_pending().remove(&req_id)
    }

    pub(crate) fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<ReqId, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail every outstanding request.
    pub(crate) fn fail_all(&self, err: &BrokerError) {
        let drained: Vec<Pending> = self.lock_pending().drain().map(|(_, p)| p).collect();
        for pending in drained {
            pending.fail(err.clone());
        }
    }

    pub(crate) fn record_status(&self, order_id: OrderId, report: OrderStatusReport) {
        self.order_statuses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(order_id, report);
    }
}

/// Configuration handle for a TWS endpoint.
///
/// Session events and order statuses outlive individual connections, so
/// a reconnect keeps subscribers and the status map intact.
pub struct TwsClient {
    config: TwsConfig,
    events: broadcast::Sender<TwsEvent>,
    order_statuses: Arc<RwLock<HashMap<OrderId, OrderStatusReport>>>,
}

impl TwsClient {
    pub fn new(config: TwsConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            events,
            order_statuses: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &TwsConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TwsEvent> {
        self.events.subscribe()
    }

    /// Last status TWS reported for `order_id`, from any session.
    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatusReport> {
        self.order_statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&order_id)
            .cloned()
    }

    /// Open the socket, run the API handshake and wait for the first
    /// NEXT_VALID_ID.
    pub async fn connect(&self) -> Result<TwsConnection, TwsError> {
        let addr = self.config.addr();
        let timeout = self.config.connect_timeout;

        let stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TwsError::Timeout("TCP connect"))?
            .map_err(|e| TwsError::Connection(format!("Failed to connect to TWS at {addr}: {e}")))?;
        stream.set_nodelay(true)?;

        let (read_half, mut write_half) = stream.into_split();
        write_half.write_all(&handshake_bytes()).await?;

        let mut reader = FramedRead::new(read_half, TwsCodec::new());
        let hello = tokio::time::timeout(timeout, reader.next())
            .await
            .map_err(|_| TwsError::Timeout("server version"))?
            .ok_or_else(|| TwsError::Handshake("connection closed during handshake".into()))??;

        let server_version: i32 = hello
            .first()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| TwsError::Handshake(format!("unexpected reply {hello:?}")))?;
        if server_version < MIN_CLIENT_VERSION {
            return Err(TwsError::Handshake(format!(
                "server version {server_version} is older than {MIN_CLIENT_VERSION}"
            )));
        }
        let connection_time = hello.get(1).cloned().unwrap_or_default();

        let mut writer = FramedWrite::new(write_half, TwsCodec::new());
        writer
            .send(messages::start_api(self.config.client_id))
            .await?;

        let (ready, mut ready_rx) = watch::channel(None);
        let shared = Arc::new(Shared {
            server_version,
            pending: Mutex::new(HashMap::new()),
            order_statuses: Arc::clone(&self.order_statuses),
            next_order_id: AtomicI64::new(0),
            next_req_id: AtomicI32::new(FIRST_REQ_ID),
            connected: AtomicBool::new(false),
            events: self.events.clone(),
            ready,
            closed: CancellationToken::new(),
        });

        tokio::spawn(process_messages(reader, Arc::clone(&shared)));

        let next_order_id = tokio::select! {
            _ = shared.closed.cancelled() => {
                return Err(TwsError::Handshake("connection closed before ready".into()));
            }
            _ = tokio::time::sleep(timeout) => {
                shared.closed.cancel();
                return Err(TwsError::Timeout("next valid id"));
            }
            ready = ready_rx.wait_for(Option::is_some) => {
                let id = ready.map_err(|_| TwsError::Closed)?;
                (*id).unwrap_or_default()
            }
        };
        shared.connected.store(true, Ordering::SeqCst);

        let conn = TwsConnection {
            writer: tokio::sync::Mutex::new(writer),
            shared,
            request_timeout: self.config.request_timeout,
            snapshot_timeout: self.config.snapshot_timeout,
        };

        if self.config.market_data_type != 1 {
            conn.send(messages::req_market_data_type(self.config.market_data_type))
                .await?;
        }

        tracing::info!(
            addr = %addr,
            client_id = self.config.client_id,
            server_version,
            connection_time = %connection_time,
            next_order_id,
            "Connected to TWS",
        );
        let _ = self.events.send(TwsEvent::Connected {
            server_version,
            next_order_id,
        });

        Ok(conn)
    }
}

/// A live, handshaken TWS session.
pub struct TwsConnection {
    writer: tokio::sync::Mutex<FramedWrite<OwnedWriteHalf, TwsCodec>>,
    shared: Arc<Shared>,
    request_timeout: Duration,
    snapshot_timeout: Duration,
}

impl std::fmt::Debug for TwsConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TwsConnection")
            .field("request_timeout", &self.request_timeout)
            .field("snapshot_timeout", &self.snapshot_timeout)
            .finish_non_exhaustive()
    }
}

impl TwsConnection {
    pub fn server_version(&self) -> i32 {
        self.shared.server_version
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst) && !self.shared.closed.is_cancelled()
    }

    /// Token cancelled once the connection is gone, whether closed
    /// locally or dropped by TWS.
    pub fn closed(&self) -> CancellationToken {
        self.shared.closed.clone()
    }

    async fn send(&self, fields: Vec<String>) -> Result<(), TwsError> {
        if self.shared.closed.is_cancelled() {
            return Err(TwsError::Closed);
        }
        self.writer.lock().await.send(fields).await
    }

    /// Send a request and wait for the reader task to resolve it.
    async fn request<T>(
        &self,
        req_id: ReqId,
        pending: Pending,
        rx: oneshot::Receiver<Result<T, BrokerError>>,
        fields: Vec<String>,
        what: &str,
    ) -> Result<T, BrokerError> {
        self.shared.register(req_id, pending);
        if let Err(e) = self.send(fields).await {
            self.shared.take_pending(req_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::NotConnected),
            Err(_) => {
                self.shared.take_pending(req_id);
                Err(BrokerError::Timeout(what.to_string()))
            }
        }
    }

    /// Every contract matching `contract`. Empty when TWS has no
    /// security definition for it.
    pub async fn contract_details(&self, contract: &Contract) -> Result<Vec<Contract>, BrokerError> {
        let req_id = self.shared.next_req_id();
        let (tx, rx) = oneshot::channel();
        let pending = Pending::ContractDetails {
            found: Vec::new(),
            tx,
        };
        let fields = messages::req_contract_data(req_id, contract);
        let what = format!("contract details for {}", contract.describe());
        self.request(req_id, pending, rx, fields, &what).await
    }

    pub async fn option_params(&self, underlying: &Contract) -> Result<Vec<OptionChainParams>, BrokerError> {
        let req_id = self.shared.next_req_id();
        let (tx, rx) = oneshot::channel();
        let pending = Pending::OptionParams {
            found: Vec::new(),
            tx,
        };
        let fields = messages::req_sec_def_opt_params(req_id, underlying);
        let what = format!("option parameters for {}", underlying.symbol);
        self.request(req_id, pending, rx, fields, &what).await
    }

    /// One-shot snapshot. If TWS does not finish the snapshot in time the
    /// ticks collected so far are returned and the request is cancelled.
    pub async fn snapshot(&self, contract: &Contract) -> Result<Quote, BrokerError> {
        let req_id = self.shared.next_req_id();
        let (tx, rx) = oneshot::channel();
        self.shared.register(
            req_id,
            Pending::Snapshot {
                quote: Quote::default(),
                tx,
            },
        );

        let fields = messages::req_mkt_data(req_id, contract, self.shared.server_version);
        if let Err(e) = self.send(fields).await {
            self.shared.take_pending(req_id);
            return Err(e.into());
        }

        match tokio::time::timeout(self.snapshot_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BrokerError::NotConnected),
            Err(_) => {
                let partial = match self.shared.take_pending(req_id) {
                    Some(Pending::Snapshot { quote, .. }) => quote,
                    _ => Quote::default(),
                };
                tracing::debug!(
                    req_id,
                    contract = %contract.describe(),
                    "Snapshot timed out, returning partial quote",
                );
                if let Err(e) = self.send(messages::cancel_mkt_data(req_id)).await {
                    tracing::debug!(req_id, error = %e, "Failed to cancel market data");
                }
                Ok(partial)
            }
        }
    }

    /// Place an order under the next id TWS allows.
    pub async fn place_order(&self, contract: &Contract, order: &Order) -> Result<OrderId, BrokerError> {
        let order_id = self.shared.next_order_id.fetch_add(1, Ordering::SeqCst);
        let fields = messages::place_order(order_id, contract, order, self.shared.server_version);
        self.send(fields).await?;

        tracing::info!(
            order_id,
            contract = %contract.describe(),
            action = %order.action,
            quantity = order.total_quantity,
            order_type = order.order_type.code(),
            transmit = order.transmit,
            parent_id = order.parent_id,
            "Order sent to TWS",
        );
        Ok(order_id)
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        self.send(messages::cancel_order(order_id)).await?;
        tracing::info!(order_id, "Cancel sent to TWS");
        Ok(())
    }

    pub fn order_status(&self, order_id: OrderId) -> Option<OrderStatusReport> {
        self.shared
            .order_statuses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&order_id)
            .cloned()
    }

    /// Ask TWS for a fresh order id. The reply updates the id counter.
    pub async fn request_ids(&self) -> Result<(), BrokerError> {
        self.send(messages::req_ids()).await?;
        Ok(())
    }

    pub fn next_order_id(&self) -> OrderId {
        self.shared.next_order_id.load(Ordering::SeqCst)
    }

    /// Close the socket. The reader task exits and fails any pending
    /// request.
    pub async fn shutdown(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "Error closing TWS socket");
        }
    }
}

impl Drop for TwsConnection {
    fn drop(&mut self) {
        self.shared.closed.cancel();
    }
}
