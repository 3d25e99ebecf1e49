//! Order requests as submitted by the dashboard, and the broker-facing
//! [`Order`] they are turned into.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::contract::{Action, Contract, Right};
use crate::error::CoreError;
use crate::types::OrderId;

/// Fields every single order and every multi-leg leg must carry.
pub const REQUIRED_ORDER_FIELDS: [&str; 6] =
    ["symbol", "expiry", "strike", "right", "action", "quantity"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    #[default]
    #[serde(alias = "MKT")]
    Market,
    #[serde(alias = "LMT")]
    Limit,
}

impl OrderType {
    /// TWS order-type code.
    pub fn code(self) -> &'static str {
        match self {
            OrderType::Market => "MKT",
            OrderType::Limit => "LMT",
        }
    }
}

/// An order ready to be placed with the broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Order {
    /// Assigned by the broker on placement; `0` until then.
    pub order_id: OrderId,
    pub action: Action,
    pub total_quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    /// `0` when the order has no parent.
    pub parent_id: OrderId,
    /// When `false` the order is staged at TWS and released together with
    /// the next transmitted order in the same group.
    pub transmit: bool,
}

impl Order {
    pub fn market(action: Action, quantity: f64) -> Self {
        Self {
            order_id: 0,
            action,
            total_quantity: quantity,
            order_type: OrderType::Market,
            limit_price: None,
            parent_id: 0,
            transmit: true,
        }
    }

    pub fn limit(action: Action, quantity: f64, limit_price: f64) -> Self {
        Self {
            order_type: OrderType::Limit,
            limit_price: Some(limit_price),
            ..Self::market(action, quantity)
        }
    }

    pub fn with_transmit(mut self, transmit: bool) -> Self {
        self.transmit = transmit;
        self
    }

    pub fn with_parent(mut self, parent_id: OrderId) -> Self {
        self.parent_id = parent_id;
        self
    }
}

/// One option order (or one leg of a multi-leg order) from the dashboard.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub expiry: String,
    pub strike: f64,
    pub right: Right,
    pub action: Action,
    pub quantity: f64,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
}

impl OrderRequest {
    /// Check that `value` is an object carrying every required field.
    ///
    /// `leg` is the position within a multi-leg request and changes the
    /// wording of the error message.
    pub fn validate_required(value: &Value, leg: Option<usize>) -> Result<(), CoreError> {
        let missing = REQUIRED_ORDER_FIELDS
            .iter()
            .find(|field| value.get(**field).map_or(true, Value::is_null));

        match (missing, leg) {
            (None, _) => Ok(()),
            (Some(field), None) => Err(CoreError::Validation(format!(
                "Missing required field: {field}"
            ))),
            (Some(field), Some(i)) => Err(CoreError::Validation(format!(
                "Missing required field '{field}' in leg {i}"
            ))),
        }
    }

    /// Validate presence, then deserialize.
    pub fn from_json(value: Value, leg: Option<usize>) -> Result<Self, CoreError> {
        Self::validate_required(&value, leg)?;
        serde_json::from_value(value).map_err(|e| match leg {
            Some(i) => CoreError::Validation(format!("Invalid leg {i}: {e}")),
            None => CoreError::Validation(format!("Invalid order: {e}")),
        })
    }

    /// Unqualified option contract described by this request.
    pub fn contract(&self) -> Contract {
        Contract::option(&self.symbol, &self.expiry, self.strike, self.right)
    }

    /// Build the broker order.
    pub fn to_order(&self) -> Result<Order, CoreError> {
        if !(self.quantity.is_finite() && self.quantity > 0.0) {
            return Err(CoreError::Validation(
                "quantity must be greater than zero".to_string(),
            ));
        }
        match self.order_type {
            OrderType::Market => Ok(Order::market(self.action, self.quantity)),
            OrderType::Limit => match self.limit_price {
                Some(price) if price.is_finite() && price > 0.0 => {
                    Ok(Order::limit(self.action, self.quantity, price))
                }
                Some(_) => Err(CoreError::Validation(
                    "limit_price must be greater than zero".to_string(),
                )),
                None => Err(CoreError::Validation(
                    "limit_price is required for LIMIT orders".to_string(),
                )),
            },
        }
    }
}

/// How a multi-leg order is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegPlan {
    /// Every leg shares one symbol and expiry: a single BAG contract.
    Combo,
    /// Parent order plus linked children, released by the last child.
    Bracket,
}

pub fn plan_multi_leg(legs: &[OrderRequest]) -> LegPlan {
    let symbols: HashSet<&str> = legs.iter().map(|l| l.symbol.as_str()).collect();
    let expiries: HashSet<&str> = legs.iter().map(|l| l.expiry.as_str()).collect();
    if symbols.len() == 1 && expiries.len() == 1 {
        LegPlan::Combo
    } else {
        LegPlan::Bracket
    }
}
