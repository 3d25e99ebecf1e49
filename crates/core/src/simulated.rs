//! In-memory [`Broker`] used for offline runs and tests.
//!
//! Lists a single 0DTE expiry (today by default) with a strike every dollar
//! around the configured underlying price, quotes options with
//! [`simulated_quote`](crate::chain::simulated_quote) and accepts every
//! order it can qualify.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::broker::{Broker, BrokerError, OptionChainParams, OrderStatusReport};
use crate::chain::{expiry_code, unique_sorted_strikes};
use crate::contract::{Contract, Right, SecType, SMART};
use crate::order::Order;
use crate::quote::Quote;
use crate::types::{ConId, OrderId};

/// Strikes listed on each side of the underlying price.
const LISTED_STRIKES_EACH_SIDE: i32 = 30;

/// conId handed to the simulated underlying.
const UNDERLYING_CON_ID: ConId = 756733;

/// First order id handed out, like a fresh TWS session.
const FIRST_ORDER_ID: OrderId = 1;

#[derive(Debug, Default)]
struct SimState {
    underlying_price: f64,
    expirations: Vec<String>,
    rejected_strikes: HashSet<i64>,
    con_ids: HashMap<String, ConId>,
    placed: Vec<(OrderId, Contract, Order)>,
    statuses: HashMap<OrderId, OrderStatusReport>,
    cancelled: Vec<OrderId>,
    fail_connect: bool,
}

/// Deterministic-enough broker for demos and tests.
pub struct SimulatedBroker {
    symbol: String,
    connected: AtomicBool,
    next_order_id: AtomicI64,
    next_con_id: AtomicI64,
    state: Mutex<SimState>,
}

fn strike_key(strike: f64) -> i64 {
    (strike * 100.0).round() as i64
}

/// OCC-style local symbol, e.g. `SPY   250514C00500000`.
pub fn occ_symbol(symbol: &str, expiry: &str, right: Right, strike: f64) -> String {
    let short_expiry = expiry.get(2..).unwrap_or(expiry);
    format!(
        "{symbol:<6}{short_expiry}{}{:08}",
        right.code(),
        (strike * 1000.0).round() as i64
    )
}

impl SimulatedBroker {
    /// Underlying `symbol` trading at `price`, with today's expiry listed.
    pub fn new(symbol: impl Into<String>, price: f64) -> Self {
        let today = expiry_code(chrono::Local::now().date_naive());
        Self::with_expirations(symbol, price, vec![today])
    }

    pub fn with_expirations(symbol: impl Into<String>, price: f64, expirations: Vec<String>) -> Self {
        Self {
            symbol: symbol.into(),
            connected: AtomicBool::new(false),
            next_order_id: AtomicI64::new(FIRST_ORDER_ID),
            next_con_id: AtomicI64::new(UNDERLYING_CON_ID + 1),
            state: Mutex::new(SimState {
                underlying_price: price,
                expirations,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_underlying_price(&self, price: f64) {
        self.lock().underlying_price = price;
    }

    pub fn set_expirations(&self, expirations: Vec<String>) {
        self.lock().expirations = expirations;
    }

    /// Make qualification fail for options at `strike`.
    pub fn reject_strike(&self, strike: f64) {
        self.lock().rejected_strikes.insert(strike_key(strike));
    }

    /// Make the next `connect` calls fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.lock().fail_connect = fail;
    }

    /// Every order accepted so far, in placement order.
    pub fn placed_orders(&self) -> Vec<(OrderId, Contract, Order)> {
        self.lock().placed.clone()
    }

    /// Ids passed to a successful `cancel_order`.
    pub fn cancelled_orders(&self) -> Vec<OrderId> {
        self.lock().cancelled.clone()
    }

    /// Overwrite the status report for an order, e.g. to simulate a fill.
    pub fn set_order_status(&self, order_id: OrderId, report: OrderStatusReport) {
        self.lock().statuses.insert(order_id, report);
    }

    fn listed_strikes(price: f64) -> Vec<f64> {
        let atm = price.round();
        let raw: Vec<f64> = (-LISTED_STRIKES_EACH_SIDE..=LISTED_STRIKES_EACH_SIDE)
            .map(|i| atm + f64::from(i))
            .filter(|s| *s > 0.0)
            .collect();
        unique_sorted_strikes(&raw)
    }

    fn con_id_for(&self, state: &mut SimState, key: String) -> ConId {
        *state
            .con_ids
            .entry(key)
            .or_insert_with(|| self.next_con_id.fetch_add(1, Ordering::SeqCst))
    }

    fn ensure_connected(&self) -> Result<(), BrokerError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(BrokerError::NotConnected)
        }
    }
}

#[async_trait]
impl Broker for SimulatedBroker {
    async fn connect(&self) -> Result<(), BrokerError> {
        if self.lock().fail_connect {
            return Err(BrokerError::Io("Connection refused (simulated)".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn qualify(&self, contract: &Contract) -> Result<Contract, BrokerError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        let mut qualified = contract.clone();

        match contract.sec_type {
            SecType::Stock => {
                if contract.symbol != self.symbol {
                    return Err(BrokerError::Unqualified(contract.describe()));
                }
                qualified.con_id = UNDERLYING_CON_ID;
                qualified.local_symbol = contract.symbol.clone();
                qualified.trading_class = contract.symbol.clone();
            }
            SecType::Option => {
                let right = contract
                    .right
                    .ok_or_else(|| BrokerError::Unqualified(contract.describe()))?;
                let listed = Self::listed_strikes(state.underlying_price);
                let on_grid = listed.iter().any(|s| strike_key(*s) == strike_key(contract.strike));
                if contract.symbol != self.symbol
                    || !state.expirations.contains(&contract.expiry)
                    || !on_grid
                    || state.rejected_strikes.contains(&strike_key(contract.strike))
                {
                    return Err(BrokerError::Unqualified(contract.describe()));
                }
                let local = occ_symbol(&contract.symbol, &contract.expiry, right, contract.strike);
                qualified.con_id = self.con_id_for(&mut state, local.clone());
                qualified.local_symbol = local;
                qualified.trading_class = contract.symbol.clone();
                qualified.multiplier = "100".to_string();
            }
            SecType::Bag => {}
        }

        Ok(qualified)
    }

    async fn option_params(&self, underlying: &Contract) -> Result<Vec<OptionChainParams>, BrokerError> {
        self.ensure_connected()?;
        let state = self.lock();
        let strikes = Self::listed_strikes(state.underlying_price);
        let chain = |exchange: &str| OptionChainParams {
            exchange: exchange.to_string(),
            underlying_con_id: underlying.con_id,
            trading_class: underlying.symbol.clone(),
            multiplier: "100".to_string(),
            expirations: state.expirations.clone(),
            strikes: strikes.clone(),
        };
        Ok(vec![chain("CBOE"), chain(SMART)])
    }

    async fn snapshot(&self, contract: &Contract) -> Result<Quote, BrokerError> {
        self.ensure_connected()?;
        let price = self.lock().underlying_price;
        if price <= 0.0 {
            return Ok(Quote::default());
        }

        let quote = match (contract.sec_type, contract.right) {
            (SecType::Option, Some(right)) => {
                let (bid, ask) = {
                    let mut rng = rand::rng();
                    crate::chain::simulated_quote(price, contract.strike, right, &mut rng)
                };
                Quote {
                    bid: Some(bid),
                    ask: Some(ask),
                    last: None,
                    close: None,
                }
            }
            _ => Quote {
                bid: Some(price - 0.01),
                ask: Some(price + 0.01),
                last: Some(price),
                close: Some(price),
            },
        };
        Ok(quote)
    }

    async fn place_order(&self, contract: &Contract, order: &Order) -> Result<OrderId, BrokerError> {
        self.ensure_connected()?;
        if contract.sec_type != SecType::Bag && !contract.is_qualified() {
            return Err(BrokerError::Unqualified(contract.describe()));
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let status = if order.transmit { "Submitted" } else { "PreSubmitted" };

        let mut state = self.lock();
        state.placed.push((order_id, contract.clone(), Order { order_id, ..order.clone() }));
        state.statuses.insert(
            order_id,
            OrderStatusReport {
                status: status.to_string(),
                filled: 0.0,
                remaining: order.total_quantity,
                avg_fill_price: 0.0,
            },
        );
        Ok(order_id)
    }

    async fn cancel_order(&self, order_id: OrderId) -> Result<(), BrokerError> {
        self.ensure_connected()?;
        let mut state = self.lock();
        let Some(report) = state.statuses.get_mut(&order_id) else {
            return Err(BrokerError::Rejected {
                code: 10147,
                message: format!("OrderId {order_id} that needs to be cancelled is not found."),
            });
        };
        report.status = "Cancelled".to_string();
        state.cancelled.push(order_id);
        Ok(())
    }

    async fn order_status(&self, order_id: OrderId) -> Option<OrderStatusReport> {
        self.lock().statuses.get(&order_id).cloned()
    }
}
