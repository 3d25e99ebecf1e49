//! Quote values and the option-chain snapshot pushed to clients.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::contract::Right;

/// Placeholder emitted for quote fields the broker did not supply.
pub const NOT_AVAILABLE: &str = "N/A";

/// Top-of-book fields collected from a market-data snapshot.
///
/// Every field is optional; TWS reports `-1` or omits ticks entirely when
/// a value is not available, and both collapse to `None` here.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Quote {
    pub bid: Option<f64>,
    pub ask: Option<f64>,
    pub last: Option<f64>,
    pub close: Option<f64>,
}

impl Quote {
    /// Keep only finite, strictly positive prices.
    pub fn sanitize(value: f64) -> Option<f64> {
        (value.is_finite() && value > 0.0).then_some(value)
    }

    /// Midpoint of bid/ask when both sides are present.
    pub fn midpoint(&self) -> Option<f64> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if ask >= bid => Some((bid + ask) / 2.0),
            _ => None,
        }
    }

    /// Best usable price for the instrument.
    ///
    /// Last trade when it sits inside the spread, otherwise the midpoint,
    /// otherwise last, otherwise the previous close.
    pub fn market_price(&self) -> Option<f64> {
        if let (Some(last), Some(bid), Some(ask)) = (self.last, self.bid, self.ask) {
            if bid <= last && last <= ask {
                return Some(last);
            }
        }
        self.midpoint().or(self.last).or(self.close)
    }
}

/// A price that serialises as a JSON number, or `"N/A"` when absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuoteValue(pub Option<f64>);

impl QuoteValue {
    pub fn is_available(&self) -> bool {
        self.0.is_some()
    }
}

impl From<Option<f64>> for QuoteValue {
    fn from(value: Option<f64>) -> Self {
        Self(value)
    }
}

impl Serialize for QuoteValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            Some(v) => serializer.serialize_f64(v),
            None => serializer.serialize_str(NOT_AVAILABLE),
        }
    }
}

impl<'de> Deserialize<'de> for QuoteValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuoteValueVisitor;

        impl Visitor<'_> for QuoteValueVisitor {
            type Value = QuoteValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a number or \"N/A\"")
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                Ok(QuoteValue(Some(v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                Ok(QuoteValue(Some(v as f64)))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                Ok(QuoteValue(Some(v as f64)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                if v == NOT_AVAILABLE {
                    Ok(QuoteValue(None))
                } else {
                    Err(E::invalid_value(de::Unexpected::Str(v), &self))
                }
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(QuoteValue(None))
            }
        }

        deserializer.deserialize_any(QuoteValueVisitor)
    }
}

/// One row of the option chain as seen by the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub strike: f64,
    pub right: Right,
    pub bid: QuoteValue,
    pub ask: QuoteValue,
    #[serde(rename = "localSymbol")]
    pub local_symbol: String,
}

/// Point-in-time view of the underlying price and the option chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptionsSnapshot {
    /// Present only when the snapshot was requested while disconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub spy_price: f64,
    pub options: BTreeMap<String, OptionQuote>,
}

impl OptionsSnapshot {
    pub fn new(spy_price: f64, options: BTreeMap<String, OptionQuote>) -> Self {
        Self {
            error: None,
            spy_price,
            options,
        }
    }

    /// Snapshot returned while no broker session is active.
    pub fn not_connected() -> Self {
        Self {
            error: Some("Not connected to TWS".to_string()),
            spy_price: 0.0,
            options: BTreeMap::new(),
        }
    }

    /// Whether this snapshot carries real data worth pushing on connect.
    pub fn is_populated(&self) -> bool {
        self.spy_price > 0.0 && !self.options.is_empty()
    }

    /// Count of rows missing a bid and rows missing an ask.
    pub fn missing_counts(&self) -> (usize, usize) {
        self.options.values().fold((0, 0), |(bids, asks), q| {
            (
                bids + usize::from(!q.bid.is_available()),
                asks + usize::from(!q.ask.is_available()),
            )
        })
    }
}
