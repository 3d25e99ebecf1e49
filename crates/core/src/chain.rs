//! Option-chain selection: which expiry, which strikes, which contracts.
//!
//! Pure logic -- no broker access. The feed fetches chain parameters and
//! quotes, and uses these helpers to decide what to request and how to key
//! the result.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rand::Rng;

use crate::broker::OptionChainParams;
use crate::contract::{Contract, Right, SMART};
use crate::quote::{OptionQuote, OptionsSnapshot, QuoteValue};

/// Strikes requested on each side of the at-the-money strike.
pub const DEFAULT_STRIKES_AROUND_ATM: usize = 10;

/// Both rights, in the order rows are requested.
pub const RIGHTS: [Right; 2] = [Right::Call, Right::Put];

/// `YYYYMMDD` expiry code for a calendar date.
pub fn expiry_code(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Format a strike the way the dashboard expects it in row keys:
/// whole numbers keep one decimal (`500.0`), others print as-is (`502.5`).
pub fn format_strike(strike: f64) -> String {
    if strike.is_finite() && strike.fract() == 0.0 {
        format!("{strike:.1}")
    } else {
        format!("{strike}")
    }
}

/// Snapshot key for one row, e.g. `500.0_C`.
pub fn option_key(strike: f64, right: Right) -> String {
    format!("{}_{}", format_strike(strike), right.code())
}

/// Deduplicate and sort strikes ascending. Non-finite values are dropped.
pub fn unique_sorted_strikes(strikes: &[f64]) -> Vec<f64> {
    let mut out: Vec<f64> = strikes.iter().copied().filter(|s| s.is_finite()).collect();
    out.sort_by(f64::total_cmp);
    out.dedup();
    out
}

/// Index of the strike closest to `price` in a sorted strike list.
///
/// Ties resolve to the lower strike.
pub fn atm_index(strikes: &[f64], price: f64) -> Option<usize> {
    strikes
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - price).abs().total_cmp(&(*b - price).abs()))
        .map(|(i, _)| i)
}

/// The at-the-money strike plus up to `around` strikes on each side.
///
/// `strikes` may be unsorted and contain duplicates.
pub fn select_window(strikes: &[f64], price: f64, around: usize) -> Vec<f64> {
    let all = unique_sorted_strikes(strikes);
    let Some(atm) = atm_index(&all, price) else {
        return Vec::new();
    };
    let start = atm.saturating_sub(around);
    let end = (atm + around + 1).min(all.len());
    all[start..end].to_vec()
}

/// Pick the chain listed on `preferred_exchange`, else the first one.
pub fn choose_chain<'a>(
    chains: &'a [OptionChainParams],
    preferred_exchange: &str,
) -> Option<&'a OptionChainParams> {
    chains
        .iter()
        .find(|c| c.exchange == preferred_exchange)
        .or_else(|| chains.first())
}

/// Same as [`choose_chain`] with SMART preferred.
pub fn choose_smart_chain(chains: &[OptionChainParams]) -> Option<&OptionChainParams> {
    choose_chain(chains, SMART)
}

/// One call and one put per strike, routed on the chain's exchange and
/// trading class.
pub fn build_contracts(
    symbol: &str,
    expiry: &str,
    strikes: &[f64],
    chain: &OptionChainParams,
) -> Vec<Contract> {
    strikes
        .iter()
        .flat_map(|&strike| {
            RIGHTS.iter().map(move |&right| {
                let mut contract = Contract::option(symbol, expiry, strike, right);
                contract.exchange = chain.exchange.clone();
                contract.trading_class = chain.trading_class.clone();
                contract
            })
        })
        .collect()
}

/// Round to cents.
fn cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Simulated bid/ask for one strike.
///
/// Bid is intrinsic value plus an extrinsic component that decays with
/// distance from the underlying; the ask sits a few cents above.
pub fn simulated_quote<R: Rng + ?Sized>(
    underlying: f64,
    strike: f64,
    right: Right,
    rng: &mut R,
) -> (f64, f64) {
    let distance = (strike - underlying).abs();
    let intrinsic = match right {
        Right::Call => (underlying - strike).max(0.0),
        Right::Put => (strike - underlying).max(0.0),
    };
    let extrinsic = (2.0 - distance * 0.2 + rng.random_range(-0.1..0.1)).max(0.05);
    let bid = cents(intrinsic + extrinsic);
    let spread = (rng.random_range(0.01..0.05) + distance * 0.01).max(0.01);
    let ask = cents(bid + spread).max(bid + 0.01);
    (bid, cents(ask))
}

/// A chain of five strikes either side of `underlying`, one dollar apart.
pub fn mock_snapshot<R: Rng + ?Sized>(underlying: f64, rng: &mut R) -> OptionsSnapshot {
    let price = if underlying > 0.0 { underlying } else { 500.0 };
    let mut options = BTreeMap::new();

    for offset in -5i32..=5 {
        let strike = (price + f64::from(offset)).round();
        for right in RIGHTS {
            let (bid, ask) = simulated_quote(price, strike, right, rng);
            options.insert(
                option_key(strike, right),
                OptionQuote {
                    strike,
                    right,
                    bid: QuoteValue(Some(bid)),
                    ask: QuoteValue(Some(ask)),
                    local_symbol: format!("SPY {strike}{} MOCK", right.code()),
                },
            );
        }
    }

    OptionsSnapshot::new(price, options)
}
