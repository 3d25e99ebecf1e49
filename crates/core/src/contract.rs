//! Contract and order-side vocabulary shared by the feed, the order manager
//! and the TWS wire layer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::types::ConId;

/// Default routing exchange for every contract built by this crate.
pub const SMART: &str = "SMART";

/// Default settlement currency.
pub const USD: &str = "USD";

/// Option right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Right {
    #[serde(rename = "C", alias = "CALL", alias = "c")]
    Call,
    #[serde(rename = "P", alias = "PUT", alias = "p")]
    Put,
}

impl Right {
    /// Single-letter code used on the wire and in snapshot keys.
    pub fn code(self) -> &'static str {
        match self {
            Right::Call => "C",
            Right::Put => "P",
        }
    }
}

impl fmt::Display for Right {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Right {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "C" | "CALL" => Ok(Right::Call),
            "P" | "PUT" => Ok(Right::Put),
            other => Err(format!("Invalid option right: {other}")),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Action {
    #[serde(alias = "buy")]
    Buy,
    #[serde(alias = "sell")]
    Sell,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Buy => "BUY",
            Action::Sell => "SELL",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Security type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecType {
    #[serde(rename = "STK")]
    Stock,
    #[serde(rename = "OPT")]
    Option,
    #[serde(rename = "BAG")]
    Bag,
}

impl SecType {
    pub fn code(self) -> &'static str {
        match self {
            SecType::Stock => "STK",
            SecType::Option => "OPT",
            SecType::Bag => "BAG",
        }
    }
}

impl FromStr for SecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STK" => Ok(SecType::Stock),
            "OPT" => Ok(SecType::Option),
            "BAG" => Ok(SecType::Bag),
            other => Err(format!("Unsupported security type: {other}")),
        }
    }
}

/// One leg of a BAG (combo) contract.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComboLeg {
    pub con_id: ConId,
    pub ratio: i32,
    pub action: Action,
    pub exchange: String,
}

/// A tradable instrument.
///
/// Built unqualified (`con_id == 0`) from user input, then resolved
/// against the broker which fills in `con_id`, `local_symbol` and
/// `trading_class`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub con_id: ConId,
    pub symbol: String,
    pub sec_type: SecType,
    /// `YYYYMMDD` for options, empty otherwise.
    pub expiry: String,
    pub strike: f64,
    pub right: Option<Right>,
    pub multiplier: String,
    pub exchange: String,
    pub currency: String,
    pub local_symbol: String,
    pub trading_class: String,
    pub combo_legs: Vec<ComboLeg>,
}

impl Contract {
    /// Common stock routed through SMART in USD.
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            con_id: 0,
            symbol: symbol.into(),
            sec_type: SecType::Stock,
            expiry: String::new(),
            strike: 0.0,
            right: None,
            multiplier: String::new(),
            exchange: SMART.to_string(),
            currency: USD.to_string(),
            local_symbol: String::new(),
            trading_class: String::new(),
            combo_legs: Vec::new(),
        }
    }

    /// Equity option routed through SMART in USD.
    pub fn option(symbol: impl Into<String>, expiry: impl Into<String>, strike: f64, right: Right) -> Self {
        Self {
            sec_type: SecType::Option,
            expiry: expiry.into(),
            strike,
            right: Some(right),
            ..Self::stock(symbol)
        }
    }

    /// Combo contract holding already-qualified legs.
    pub fn combo(symbol: impl Into<String>, legs: Vec<ComboLeg>) -> Self {
        Self {
            sec_type: SecType::Bag,
            combo_legs: legs,
            ..Self::stock(symbol)
        }
    }

    pub fn is_qualified(&self) -> bool {
        self.con_id != 0
    }

    /// Short human-readable description for log lines.
    pub fn describe(&self) -> String {
        match (self.sec_type, self.right) {
            (SecType::Option, Some(right)) => {
                format!("{} {} {} {}", self.symbol, self.expiry, self.strike, right)
            }
            (SecType::Bag, _) => format!("{} BAG x{}", self.symbol, self.combo_legs.len()),
            _ => self.symbol.clone(),
        }
    }
}
