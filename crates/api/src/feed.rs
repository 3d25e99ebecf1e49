//! Market-data feed.
//!
//! While running, [`MarketFeed`] refreshes the underlying price and the
//! option chain for the target expiry on a fixed interval, keeps the latest
//! [`OptionsSnapshot`] in memory and publishes every cycle as a
//! [`FeedEvent`] for the push emitter.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chaindesk_core::broker::{Broker, BrokerError};
use chaindesk_core::chain;
use chaindesk_core::contract::Contract;
use chaindesk_core::error::CoreError;
use chaindesk_core::quote::{OptionQuote, OptionsSnapshot, Quote};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect` waits for the refresh task to wind down.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Push events, serialised as `{"event": <name>, "data": <payload>}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    OptionsUpdate(OptionsSnapshot),
    ConnectionStatus { ibkr_connected: bool },
}

/// What a single refresh cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The chain was replaced with `contracts` rows.
    Updated { contracts: usize },
    /// No usable underlying price yet; the chain was not touched.
    NoPrice,
    /// The target expiry is not listed; any previous chain was cleared.
    NoExpiry,
    /// The chain lists no strikes.
    NoStrikes,
}

#[derive(Debug, Default)]
struct FeedState {
    spy_price: f64,
    options: BTreeMap<String, OptionQuote>,
}

/// Qualified option contracts for one expiry, keyed by [`chain::option_key`].
#[derive(Debug, Default)]
struct ContractCache {
    expiry: String,
    contracts: HashMap<String, Contract>,
}

struct FeedTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MarketFeed {
    broker: Arc<dyn Broker>,
    config: FeedConfig,
    state: RwLock<FeedState>,
    /// Qualified underlying, cached for the lifetime of a session.
    underlying: Mutex<Option<Contract>>,
    option_contracts: Mutex<ContractCache>,
    events: broadcast::Sender<FeedEvent>,
    task: tokio::sync::Mutex<Option<FeedTask>>,
}

impl MarketFeed {
    pub fn new(broker: Arc<dyn Broker>, config: FeedConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            broker,
            config,
            state: RwLock::new(FeedState::default()),
            underlying: Mutex::new(None),
            option_contracts: Mutex::new(ContractCache::default()),
            events,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FeedConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Connect the broker (if needed) and start the refresh loop (if not
    /// already running). Calling this while connected is a no-op apart from
    /// re-announcing the connection status.
    pub async fn connect(self: &Arc<Self>) -> Result<(), CoreError> {
        let mut task = self.task.lock().await;

        if !self.broker.is_connected() {
            self.broker.connect().await?;
            tracing::info!(symbol = %self.config.symbol, "Broker connected");
        }

        let running = task.as_ref().is_some_and(|t| !t.handle.is_finished());
        if !running {
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(Arc::clone(self).run(cancel.clone()));
            *task = Some(FeedTask { cancel, handle });
            tracing::info!(
                symbol = %self.config.symbol,
                interval_ms = self.config.refresh_interval.as_millis() as u64,
                strikes_around_atm = self.config.strikes_around_atm,
                "Market feed started",
            );
        }

        self.publish_connection_status(true);
        Ok(())
    }

    /// Stop the refresh loop, disconnect the broker and drop cached data.
    pub async fn disconnect(&self) {
        let mut task = self.task.lock().await;
        if let Some(t) = task.take() {
            t.cancel.cancel();
            let _ = tokio::time::timeout(STOP_TIMEOUT, t.handle).await;
        }

        self.broker.disconnect().await;
        *self.write_state() = FeedState::default();
        *self.lock_underlying() = None;
        *self.lock_contracts() = ContractCache::default();

        tracing::info!("Market feed stopped and broker disconnected");
        self.publish_connection_status(false);
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Broker connected and the refresh loop alive.
    pub async fn is_live(&self) -> bool {
        self.broker.is_connected() && self.is_running().await
    }

    /// Latest snapshot. While the broker is disconnected this is the
    /// not-connected snapshot carrying an error message.
    pub fn snapshot(&self) -> OptionsSnapshot {
        if !self.broker.is_connected() {
            return OptionsSnapshot::not_connected();
        }

        let state = self.read_state();
        if state.options.is_empty() && state.spy_price <= 0.0 && self.config.mock_fallback {
            tracing::debug!("No live options data yet, serving generated chain");
            return chain::mock_snapshot(state.spy_price, &mut rand::rng());
        }
        OptionsSnapshot::new(state.spy_price, state.options.clone())
    }

    /// Last known underlying price, `0.0` until one has been seen.
    pub fn spy_price(&self) -> f64 {
        self.read_state().spy_price
    }

    pub fn publish_connection_status(&self, connected: bool) {
        let _ = self.events.send(FeedEvent::ConnectionStatus {
            ibkr_connected: connected,
        });
    }

    /// Run one refresh cycle: underlying price first, then the chain.
    pub async fn refresh_once(&self) -> Result<RefreshOutcome, CoreError> {
        let underlying = self.underlying_contract().await?;
        self.update_price(&underlying).await?;

        let price = self.spy_price();
        if price <= 0.0 {
            tracing::warn!(symbol = %self.config.symbol, "Underlying price not valid, skipping options update");
            return Ok(RefreshOutcome::NoPrice);
        }

        self.update_chain(&underlying, price).await
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if !self.broker.is_connected() {
                tracing::debug!("Broker not connected, skipping refresh");
                continue;
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => break,
                result = self.refresh_once() => result,
            };
            match result {
                Ok(outcome) => tracing::trace!(?outcome, "Refresh cycle complete"),
                Err(CoreError::NotConnected) => {
                    tracing::debug!("Broker dropped during refresh");
                    continue;
                }
                Err(e) => tracing::warn!(error = %e, "Refresh cycle failed"),
            }

            let snapshot = self.snapshot();
            let (missing_bids, missing_asks) = snapshot.missing_counts();
            tracing::debug!(
                spy_price = snapshot.spy_price,
                options = snapshot.options.len(),
                missing_bids,
                missing_asks,
                "Publishing options update",
            );
            let _ = self.events.send(FeedEvent::OptionsUpdate(snapshot));
        }

        tracing::debug!("Market feed loop exited");
    }

    async fn underlying_contract(&self) -> Result<Contract, CoreError> {
        let cached = self.lock_underlying().clone();
        if let Some(contract) = cached {
            return Ok(contract);
        }
        let qualified = self
            .broker
            .qualify(&Contract::stock(&self.config.symbol))
            .await?;
        *self.lock_underlying() = Some(qualified.clone());
        Ok(qualified)
    }

    async fn update_price(&self, underlying: &Contract) -> Result<(), CoreError> {
        let quote = self.broker.snapshot(underlying).await?;
        match quote.market_price() {
            Some(price) => {
                self.write_state().spy_price = price;
                tracing::debug!(symbol = %underlying.symbol, price, "Updated underlying price");
            }
            None => {
                tracing::warn!(symbol = %underlying.symbol, ?quote, "Could not retrieve a valid underlying price");
            }
        }
        Ok(())
    }

    async fn update_chain(&self, underlying: &Contract, price: f64) -> Result<RefreshOutcome, CoreError> {
        let chains = self.broker.option_params(underlying).await?;
        let Some(params) = chain::choose_smart_chain(&chains) else {
            return Err(CoreError::Broker(format!(
                "No option chain parameters found for {}",
                underlying.symbol
            )));
        };

        let expiry = chain::expiry_code(self.config.target_expiry());
        if !params.expirations.contains(&expiry) {
            let preview = &params.expirations[..params.expirations.len().min(5)];
            tracing::warn!(expiry = %expiry, available = ?preview, "No options expiring on target date");
            let mut state = self.write_state();
            if !state.options.is_empty() {
                tracing::info!("Clearing stale options data");
                state.options.clear();
            }
            return Ok(RefreshOutcome::NoExpiry);
        }

        let strikes = chain::select_window(&params.strikes, price, self.config.strikes_around_atm);
        if strikes.is_empty() {
            tracing::warn!(exchange = %params.exchange, "No strikes listed in option chain");
            return Ok(RefreshOutcome::NoStrikes);
        }

        let requested = chain::build_contracts(&underlying.symbol, &expiry, &strikes, params);
        let qualified = self.qualified_contracts(&expiry, &requested).await?;
        let quotes = self.paced(&qualified, |c| self.broker.snapshot(c)).await;

        let mut options = BTreeMap::new();
        for (contract, quote) in qualified.iter().zip(quotes) {
            let quote = match quote {
                Ok(quote) => quote,
                Err(BrokerError::NotConnected) => return Err(CoreError::NotConnected),
                Err(e) => {
                    tracing::debug!(contract = %contract.describe(), error = %e, "Snapshot failed");
                    Quote::default()
                }
            };
            let Some(right) = contract.right else {
                continue;
            };
            options.insert(
                chain::option_key(contract.strike, right),
                OptionQuote {
                    strike: contract.strike,
                    right,
                    bid: quote.bid.into(),
                    ask: quote.ask.into(),
                    local_symbol: contract.local_symbol.clone(),
                },
            );
        }

        let contracts = options.len();
        self.write_state().options = options;
        tracing::info!(expiry = %expiry, price, contracts, "Updated options data");
        Ok(RefreshOutcome::Updated { contracts })
    }

    /// Qualified versions of `requested`, in order. Contracts already
    /// qualified for `expiry` come from the cache; only the rest go to the
    /// broker. Contracts the broker does not recognise are left out.
    async fn qualified_contracts(&self, expiry: &str, requested: &[Contract]) -> Result<Vec<Contract>, CoreError> {
        let missing = {
            let mut cache = self.lock_contracts();
            if cache.expiry != expiry {
                *cache = ContractCache {
                    expiry: expiry.to_string(),
                    contracts: HashMap::new(),
                };
            }
            let missing: Vec<Contract> = requested
                .iter()
                .filter(|c| contract_key(c).is_some_and(|key| !cache.contracts.contains_key(&key)))
                .cloned()
                .collect();
            missing
        };

        if !missing.is_empty() {
            tracing::debug!(expiry, count = missing.len(), "Qualifying option contracts");
            let results = self.paced(&missing, |c| self.broker.qualify(c)).await;
            let mut cache = self.lock_contracts();
            for (asked, result) in missing.iter().zip(results) {
                match result {
                    Ok(contract) if contract.is_qualified() => {
                        if let Some(key) = contract_key(asked) {
                            cache.contracts.insert(key, contract);
                        }
                    }
                    Ok(_) => {}
                    Err(BrokerError::NotConnected) => return Err(CoreError::NotConnected),
                    Err(e) => {
                        tracing::debug!(contract = %asked.describe(), error = %e, "Skipping option that failed to qualify");
                    }
                }
            }
        }

        let cache = self.lock_contracts();
        let qualified: Vec<Contract> = requested
            .iter()
            .filter_map(|c| contract_key(c).and_then(|key| cache.contracts.get(&key).cloned()))
            .collect();
        Ok(qualified)
    }

    /// Run `request` once per contract, in order, with at most
    /// `max_in_flight` outstanding and starts spaced by `request_spacing`.
    async fn paced<'a, T, F, Fut>(&self, contracts: &'a [Contract], request: F) -> Vec<T>
    where
        F: Fn(&'a Contract) -> Fut + Sync,
        Fut: Future<Output = T> + Send,
    {
        let pacer = tokio::sync::Mutex::new(request_pacer(self.config.request_spacing));
        let pacer = &pacer;
        stream::iter(contracts)
            .map(|contract| {
                let call = request(contract);
                async move {
                    if let Some(ticks) = pacer.lock().await.as_mut() {
                        ticks.tick().await;
                    }
                    call.await
                }
            })
            .boxed()
            .buffered(self.config.max_in_flight.max(1))
            .collect()
            .await
    }

    fn read_state(&self) -> RwLockReadGuard<'_, FeedState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, FeedState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_underlying(&self) -> MutexGuard<'_, Option<Contract>> {
        self.underlying.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_contracts(&self) -> MutexGuard<'_, ContractCache> {
        self.option_contracts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn contract_key(contract: &Contract) -> Option<String> {
    contract.right.map(|right| chain::option_key(contract.strike, right))
}

/// `None` when spacing is disabled.
fn request_pacer(spacing: Duration) -> Option<Interval> {
    if spacing.is_zero() {
        return None;
    }
    let mut ticks = tokio::time::interval(spacing);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticks)
}
