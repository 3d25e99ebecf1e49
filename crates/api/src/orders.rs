//! Order routing on top of a [`Broker`].
//!
//! [`OrderManager`] qualifies contracts, places single and multi-leg
//! orders, and keeps an [`OrderBook`] of everything placed through it so
//! cancels and status lookups can be checked against known ids.

use std::sync::{Arc, Mutex, MutexGuard};

use chaindesk_core::broker::{Broker, BrokerError, OrderStatusReport};
use chaindesk_core::chain::format_strike;
use chaindesk_core::contract::{Action, ComboLeg, Contract, SMART};
use chaindesk_core::error::CoreError;
use chaindesk_core::order::{plan_multi_leg, LegPlan, Order, OrderRequest};
use chaindesk_core::order_book::{OrderBook, STATUS_CANCELLING};
use chaindesk_core::types::OrderId;

/// Result of a successful placement.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedOrder {
    pub order_id: OrderId,
    /// Set only for bracket-style multi-leg orders.
    pub child_ids: Option<Vec<OrderId>>,
}

/// Status as reported to the dashboard. The fill fields are present only
/// when the broker has reported on the order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderStatusView {
    pub status: String,
    pub report: Option<OrderStatusReport>,
}

pub struct OrderManager {
    broker: Arc<dyn Broker>,
    book: Mutex<OrderBook>,
}

impl OrderManager {
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self {
            broker,
            book: Mutex::new(OrderBook::new()),
        }
    }

    /// Number of orders placed through this manager.
    pub fn order_count(&self) -> usize {
        self.book().len()
    }

    pub async fn place_single_order(&self, request: &OrderRequest) -> Result<PlacedOrder, CoreError> {
        self.ensure_connected()?;
        let order = request.to_order()?;

        let contract = self
            .broker
            .qualify(&request.contract())
            .await
            .map_err(|e| contract_failure("Failed to create valid contract", e))?;
        let order_id = self.broker.place_order(&contract, &order).await?;

        tracing::info!(
            order_id,
            contract = %contract.describe(),
            action = %order.action,
            quantity = order.total_quantity,
            order_type = order.order_type.code(),
            limit_price = ?order.limit_price,
            "Placed single order",
        );
        self.book().insert_submitted(order_id, contract, order, None);

        Ok(PlacedOrder {
            order_id,
            child_ids: None,
        })
    }

    /// Legs sharing one symbol and expiry go out as a single BAG combo;
    /// anything else as a parent order with linked children.
    pub async fn place_multi_leg_order(&self, legs: &[OrderRequest]) -> Result<PlacedOrder, CoreError> {
        self.ensure_connected()?;
        if legs.is_empty() {
            return Err(CoreError::Validation("No order legs provided".to_string()));
        }
        let orders = legs
            .iter()
            .map(OrderRequest::to_order)
            .collect::<Result<Vec<_>, _>>()?;

        match plan_multi_leg(legs) {
            LegPlan::Combo => self.place_combo(legs).await,
            LegPlan::Bracket => self.place_bracket(legs, orders).await,
        }
    }

    async fn place_combo(&self, legs: &[OrderRequest]) -> Result<PlacedOrder, CoreError> {
        let ratios = combo_ratios(legs)?;
        let mut combo_legs = Vec::with_capacity(legs.len());
        for (leg, ratio) in legs.iter().zip(ratios) {
            let contract = self.broker.qualify(&leg.contract()).await.map_err(|e| {
                contract_failure(
                    &format!(
                        "Failed to create valid contract for leg: {} {}",
                        format_strike(leg.strike),
                        leg.right
                    ),
                    e,
                )
            })?;
            combo_legs.push(ComboLeg {
                con_id: contract.con_id,
                ratio,
                action: leg.action,
                exchange: SMART.to_string(),
            });
        }

        let combo = Contract::combo(&legs[0].symbol, combo_legs);
        let order = Order::market(Action::Buy, 1.0);
        let order_id = self.broker.place_order(&combo, &order).await?;

        tracing::info!(order_id, legs = legs.len(), "Placed multi-leg combo order");
        self.book().insert_submitted(order_id, combo, order, None);

        Ok(PlacedOrder {
            order_id,
            child_ids: None,
        })
    }

    /// Parent first, then children. Only the last order transmits, which
    /// releases the whole group at TWS. If a child cannot be placed the
    /// parent is cancelled.
    async fn place_bracket(&self, legs: &[OrderRequest], orders: Vec<Order>) -> Result<PlacedOrder, CoreError> {
        let last = legs.len() - 1;
        let mut orders = orders.into_iter();
        let parent_order = orders
            .next()
            .ok_or_else(|| CoreError::Internal("bracket order without a parent".to_string()))?
            .with_transmit(last == 0);

        let parent_contract = self
            .broker
            .qualify(&legs[0].contract())
            .await
            .map_err(|e| contract_failure("Failed to create valid contract for parent leg", e))?;
        let parent_id = self.broker.place_order(&parent_contract, &parent_order).await?;
        self.book()
            .insert_submitted(parent_id, parent_contract, parent_order, None);

        let mut child_ids = Vec::with_capacity(last);
        for ((i, leg), order) in legs.iter().enumerate().skip(1).zip(orders) {
            let order = order.with_parent(parent_id).with_transmit(i == last);
            let placed = match self.broker.qualify(&leg.contract()).await {
                Ok(contract) => self
                    .broker
                    .place_order(&contract, &order)
                    .await
                    .map(|child_id| (child_id, contract)),
                Err(e) => Err(e),
            };

            match placed {
                Ok((child_id, contract)) => {
                    self.book()
                        .insert_submitted(child_id, contract, order, Some(parent_id));
                    child_ids.push(child_id);
                }
                Err(e) => {
                    tracing::warn!(parent_id, leg = i + 1, error = %e, "Child leg failed, cancelling parent");
                    self.cancel_parent(parent_id).await;
                    return Err(contract_failure(
                        &format!("Failed to create valid contract for leg {}", i + 1),
                        e,
                    ));
                }
            }
        }

        tracing::info!(parent_id, ?child_ids, legs = legs.len(), "Placed bracket order");
        Ok(PlacedOrder {
            order_id: parent_id,
            child_ids: Some(child_ids),
        })
    }

    async fn cancel_parent(&self, parent_id: OrderId) {
        match self.broker.cancel_order(parent_id).await {
            Ok(()) => {
                self.book().set_status(parent_id, STATUS_CANCELLING);
            }
            Err(e) => {
                tracing::error!(parent_id, error = %e, "Failed to cancel parent order");
            }
        }
    }

    pub async fn cancel_order(&self, order_id: OrderId) -> Result<(), CoreError> {
        self.ensure_connected()?;
        if !self.book().contains(order_id) {
            return Err(order_not_found(order_id));
        }

        self.broker.cancel_order(order_id).await?;
        self.book().set_status(order_id, STATUS_CANCELLING);
        tracing::info!(order_id, "Cancellation request sent");
        Ok(())
    }

    /// The broker's live report wins; the locally recorded status is the
    /// fallback.
    pub async fn get_order_status(&self, order_id: OrderId) -> Result<OrderStatusView, CoreError> {
        self.ensure_connected()?;
        let stored = self
            .book()
            .get(order_id)
            .map(|record| record.status.clone())
            .ok_or_else(|| order_not_found(order_id))?;

        match self.broker.order_status(order_id).await {
            Some(report) => Ok(OrderStatusView {
                status: report.status.clone(),
                report: Some(report),
            }),
            None => Ok(OrderStatusView {
                status: stored,
                report: None,
            }),
        }
    }

    /// Record a status pushed by the broker. Unknown ids are ignored.
    pub fn apply_status(&self, order_id: OrderId, status: &str) -> bool {
        self.book().set_status(order_id, status)
    }

    fn ensure_connected(&self) -> Result<(), CoreError> {
        if self.broker.is_connected() {
            Ok(())
        } else {
            Err(CoreError::NotConnected)
        }
    }

    fn book(&self) -> MutexGuard<'_, OrderBook> {
        self.book.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Combo ratios must be whole, at least 1, and fit an `i32`.
fn combo_ratios(legs: &[OrderRequest]) -> Result<Vec<i32>, CoreError> {
    legs.iter()
        .enumerate()
        .map(|(i, leg)| {
            let quantity = leg.quantity;
            if quantity.fract() != 0.0 || quantity < 1.0 || quantity > f64::from(i32::MAX) {
                return Err(CoreError::Validation(format!(
                    "Leg {}: combo quantity must be a whole number from 1 to {}, got {quantity}",
                    i + 1,
                    i32::MAX
                )));
            }
            Ok(quantity as i32)
        })
        .collect()
}

fn order_not_found(order_id: OrderId) -> CoreError {
    CoreError::NotFound {
        entity: "Order ID",
        id: order_id.to_string(),
    }
}

fn contract_failure(context: &str, err: BrokerError) -> CoreError {
    match err {
        BrokerError::NotConnected => CoreError::NotConnected,
        other => CoreError::Broker(format!("{context}: {other}")),
    }
}
