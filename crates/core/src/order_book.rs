//! In-memory ledger of orders placed during this session.

use std::collections::HashMap;

use serde::Serialize;

use crate::contract::Contract;
use crate::order::Order;
use crate::types::OrderId;

/// Status recorded when an order is handed to the broker.
pub const STATUS_SUBMITTED: &str = "SUBMITTED";
/// Status recorded when a cancel request is sent.
pub const STATUS_CANCELLING: &str = "CANCELLING";

/// One order as tracked by the order manager.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRecord {
    pub order_id: OrderId,
    pub contract: Contract,
    pub order: Order,
    pub status: String,
    pub parent: Option<OrderId>,
    pub children: Vec<OrderId>,
}

#[derive(Debug, Default)]
pub struct OrderBook {
    orders: HashMap<OrderId, OrderRecord>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly placed order.
    pub fn insert_submitted(
        &mut self,
        order_id: OrderId,
        contract: Contract,
        order: Order,
        parent: Option<OrderId>,
    ) {
        let record = OrderRecord {
            order_id,
            contract,
            order: Order { order_id, ..order },
            status: STATUS_SUBMITTED.to_string(),
            parent,
            children: Vec::new(),
        };
        self.orders.insert(order_id, record);
        if let Some(parent_id) = parent {
            self.attach_child(parent_id, order_id);
        }
    }

    /// Link `child` under `parent`. Unknown parents are ignored.
    pub fn attach_child(&mut self, parent: OrderId, child: OrderId) {
        if let Some(record) = self.orders.get_mut(&parent) {
            if !record.children.contains(&child) {
                record.children.push(child);
            }
        }
    }

    pub fn get(&self, order_id: OrderId) -> Option<&OrderRecord> {
        self.orders.get(&order_id)
    }

    pub fn contains(&self, order_id: OrderId) -> bool {
        self.orders.contains_key(&order_id)
    }

    /// Update the stored status. Returns `false` for unknown ids.
    pub fn set_status(&mut self, order_id: OrderId, status: impl Into<String>) -> bool {
        match self.orders.get_mut(&order_id) {
            Some(record) => {
                record.status = status.into();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::{Action, Right};

    fn contract() -> Contract {
        Contract::option("SPY", "20250514", 500.0, Right::Call)
    }

    #[test]
    fn insert_records_submitted_status_and_id() {
        let mut book = OrderBook::new();
        book.insert_submitted(7, contract(), Order::market(Action::Buy, 1.0), None);

        let rec = book.get(7).unwrap();
        assert_eq!(rec.status, STATUS_SUBMITTED);
        assert_eq!(rec.order.order_id, 7);
        assert!(rec.parent.is_none());
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn children_are_linked_to_parent() {
        let mut book = OrderBook::new();
        book.insert_submitted(1, contract(), Order::market(Action::Buy, 1.0), None);
        book.insert_submitted(2, contract(), Order::market(Action::Sell, 1.0), Some(1));
        book.insert_submitted(3, contract(), Order::market(Action::Sell, 1.0), Some(1));

        assert_eq!(book.get(1).unwrap().children, vec![2, 3]);
        assert_eq!(book.get(3).unwrap().parent, Some(1));
    }

    #[test]
    fn set_status_on_unknown_id_reports_false() {
        let mut book = OrderBook::new();
        assert!(!book.set_status(99, STATUS_CANCELLING));
        book.insert_submitted(99, contract(), Order::market(Action::Buy, 1.0), None);
        assert!(book.set_status(99, STATUS_CANCELLING));
        assert_eq!(book.get(99).unwrap().status, STATUS_CANCELLING);
    }
}
