//! TWS message ids, the incoming message parser and outgoing request
//! builders.
//!
//! Layouts target the server-version range negotiated by
//! [`handshake_bytes`](crate::codec::handshake_bytes). Fields gated on a
//! server version are only read or written when the negotiated version
//! reaches that gate.

use chaindesk_core::broker::{OptionChainParams, OrderStatusReport};
use chaindesk_core::contract::{Contract, Right, SecType};
use chaindesk_core::order::Order;
use chaindesk_core::types::{OrderId, ReqId};

use crate::codec::{FieldReader, FieldWriter};
use crate::error::TwsError;

/// Outgoing message ids.
pub mod out {
    pub const REQ_MKT_DATA: i32 = 1;
    pub const CANCEL_MKT_DATA: i32 = 2;
    pub const PLACE_ORDER: i32 = 3;
    pub const CANCEL_ORDER: i32 = 4;
    pub const REQ_IDS: i32 = 8;
    pub const REQ_CONTRACT_DATA: i32 = 9;
    pub const REQ_MARKET_DATA_TYPE: i32 = 59;
    pub const START_API: i32 = 71;
    pub const REQ_SEC_DEF_OPT_PARAMS: i32 = 78;
}

/// Incoming message ids.
pub mod incoming {
    pub const TICK_PRICE: i32 = 1;
    pub const TICK_SIZE: i32 = 2;
    pub const ORDER_STATUS: i32 = 3;
    pub const ERR_MSG: i32 = 4;
    pub const OPEN_ORDER: i32 = 5;
    pub const NEXT_VALID_ID: i32 = 9;
    pub const CONTRACT_DATA: i32 = 10;
    pub const MANAGED_ACCTS: i32 = 15;
    pub const CURRENT_TIME: i32 = 49;
    pub const CONTRACT_DATA_END: i32 = 52;
    pub const TICK_SNAPSHOT_END: i32 = 57;
    pub const MARKET_DATA_TYPE: i32 = 58;
    pub const SEC_DEF_OPT_PARAMS: i32 = 75;
    pub const SEC_DEF_OPT_PARAMS_END: i32 = 76;
    pub const TICK_REQ_PARAMS: i32 = 81;
}

/// Server versions at which message layouts change.
pub mod min_version {
    pub const FRACTIONAL_POSITIONS: i32 = 101;
    pub const PEGGED_TO_BENCHMARK: i32 = 102;
    pub const MODELS_SUPPORT: i32 = 103;
    pub const EXT_OPERATOR: i32 = 105;
    pub const SOFT_DOLLAR_TIER: i32 = 106;
    pub const MD_SIZE_MULTIPLIER: i32 = 110;
    pub const CASH_QTY: i32 = 111;
    pub const REQ_SMART_COMPONENTS: i32 = 114;
    pub const MARKET_CAP_PRICE: i32 = 131;
    pub const DECISION_MAKER: i32 = 138;
    pub const MIFID_EXECUTION: i32 = 139;
    pub const AUTO_PRICE_FOR_HEDGE: i32 = 141;
    pub const ORDER_CONTAINER: i32 = 145;
    pub const D_PEG_ORDERS: i32 = 148;
    pub const PRICE_MGMT_ALGO: i32 = 151;
    pub const SIZE_RULES: i32 = 164;
}

/// Price fields of interest in TICK_PRICE, live and delayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickField {
    Bid,
    Ask,
    Last,
    Close,
}

impl TickField {
    pub fn from_tick_type(tick_type: i32) -> Option<Self> {
        match tick_type {
            1 | 66 => Some(TickField::Bid),
            2 | 67 => Some(TickField::Ask),
            4 | 68 => Some(TickField::Last),
            9 | 75 => Some(TickField::Close),
            _ => None,
        }
    }
}

/// Farm-status and other notices that never indicate a failure.
pub fn is_informational(code: i32) -> bool {
    (2100..=2199).contains(&code)
}

/// Codes after which the socket is no longer usable.
pub fn is_connection_lost(code: i32) -> bool {
    matches!(code, 504 | 1100)
}

/// "No security definition has been found for the request."
pub const NO_SECURITY_DEFINITION: i32 = 200;

/// Snapshot notices: delayed data substituted, or a partial
/// subscription. The snapshot still completes.
pub fn is_snapshot_notice(code: i32) -> bool {
    matches!(code, 10090 | 10167)
}

/// A decoded server message.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    TickPrice {
        req_id: ReqId,
        tick_type: i32,
        price: f64,
    },
    TickSize {
        req_id: ReqId,
        tick_type: i32,
        size: f64,
    },
    OrderStatus {
        order_id: OrderId,
        report: OrderStatusReport,
    },
    Error {
        req_id: i32,
        code: i32,
        message: String,
    },
    OpenOrder {
        order_id: OrderId,
    },
    NextValidId(OrderId),
    ContractData {
        req_id: ReqId,
        contract: Box<Contract>,
    },
    ContractDataEnd {
        req_id: ReqId,
    },
    ManagedAccounts(Vec<String>),
    CurrentTime(i64),
    TickSnapshotEnd {
        req_id: ReqId,
    },
    MarketDataType {
        req_id: ReqId,
        data_type: i32,
    },
    SecDefOptParams {
        req_id: ReqId,
        params: OptionChainParams,
    },
    SecDefOptParamsEnd {
        req_id: ReqId,
    },
    TickReqParams {
        req_id: ReqId,
    },
    /// Any message id this client does not handle.
    Unhandled(i32),
}

/// Decode one frame.
pub fn parse(fields: &[String], server_version: i32) -> Result<IncomingMessage, TwsError> {
    let mut r = FieldReader::new(fields);
    let msg_id = r.next_i32()?;

    let msg = match msg_id {
        incoming::TICK_PRICE => {
            r.skip(1)?;
            let req_id = r.next_i32()?;
            let tick_type = r.next_i32()?;
            let price = r.next_f64()?;
            IncomingMessage::TickPrice {
                req_id,
                tick_type,
                price,
            }
        }
        incoming::TICK_SIZE => {
            r.skip(1)?;
            let req_id = r.next_i32()?;
            let tick_type = r.next_i32()?;
            let size = r.next_f64()?;
            IncomingMessage::TickSize {
                req_id,
                tick_type,
                size,
            }
        }
        incoming::ORDER_STATUS => {
            if server_version < min_version::MARKET_CAP_PRICE {
                r.skip(1)?;
            }
            let order_id = r.next_i64()?;
            let status = r.next_str()?.to_string();
            let filled = r.next_f64()?;
            let remaining = r.next_f64()?;
            let avg_fill_price = r.next_f64()?;
            IncomingMessage::OrderStatus {
                order_id,
                report: OrderStatusReport {
                    status,
                    filled,
                    remaining,
                    avg_fill_price,
                },
            }
        }
        incoming::ERR_MSG => {
            r.skip(1)?;
            let req_id = r.next_i32()?;
            let code = r.next_i32()?;
            let message = r.next_str()?.to_string();
            IncomingMessage::Error {
                req_id,
                code,
                message,
            }
        }
        incoming::OPEN_ORDER => {
            if server_version < min_version::ORDER_CONTAINER {
                r.skip(1)?;
            }
            IncomingMessage::OpenOrder {
                order_id: r.next_i64()?,
            }
        }
        incoming::NEXT_VALID_ID => {
            r.skip(1)?;
            IncomingMessage::NextValidId(r.next_i64()?)
        }
        incoming::CONTRACT_DATA => parse_contract_data(&mut r, server_version)?,
        incoming::CONTRACT_DATA_END => {
            r.skip(1)?;
            IncomingMessage::ContractDataEnd {
                req_id: r.next_i32()?,
            }
        }
        incoming::MANAGED_ACCTS => {
            r.skip(1)?;
            let accounts = r
                .next_str()?
                .split(',')
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect();
            IncomingMessage::ManagedAccounts(accounts)
        }
        incoming::CURRENT_TIME => {
            r.skip(1)?;
            IncomingMessage::CurrentTime(r.next_i64()?)
        }
        incoming::TICK_SNAPSHOT_END => {
            r.skip(1)?;
            IncomingMessage::TickSnapshotEnd {
                req_id: r.next_i32()?,
            }
        }
        incoming::MARKET_DATA_TYPE => {
            r.skip(1)?;
            let req_id = r.next_i32()?;
            let data_type = r.next_i32()?;
            IncomingMessage::MarketDataType { req_id, data_type }
        }
        incoming::SEC_DEF_OPT_PARAMS => parse_sec_def_opt_params(&mut r)?,
        incoming::SEC_DEF_OPT_PARAMS_END => IncomingMessage::SecDefOptParamsEnd {
            req_id: r.next_i32()?,
        },
        incoming::TICK_REQ_PARAMS => IncomingMessage::TickReqParams {
            req_id: r.next_i32()?,
        },
        other => IncomingMessage::Unhandled(other),
    };

    Ok(msg)
}

fn parse_contract_data(r: &mut FieldReader<'_>, sv: i32) -> Result<IncomingMessage, TwsError> {
    let version = if sv < min_version::SIZE_RULES {
        r.next_i32()?
    } else {
        8
    };
    let req_id = if version >= 3 { r.next_i32()? } else { -1 };

    let symbol = r.next_str()?.to_string();
    let sec_type = r.next_str()?;
    let sec_type: SecType = sec_type
        .parse()
        .map_err(TwsError::Protocol)?;
    // "20250514" or "20250514 16:00 US/Eastern"
    let expiry = r
        .next_str()?
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    let strike = r.next_f64()?;
    let right = match r.next_str()? {
        "" | "0" | "?" => None,
        code => Some(code.parse::<Right>().map_err(TwsError::Protocol)?),
    };
    let exchange = r.next_str()?.to_string();
    let currency = r.next_str()?.to_string();
    let local_symbol = r.next_str()?.to_string();
    let _market_name = r.next_str()?;
    let trading_class = r.next_str()?.to_string();
    let con_id = r.next_i64()?;
    let _min_tick = r.next_f64()?;
    if (min_version::MD_SIZE_MULTIPLIER..min_version::SIZE_RULES).contains(&sv) {
        r.skip(1)?;
    }
    let multiplier = r.next_str()?.to_string();

    let contract = Contract {
        con_id,
        symbol,
        sec_type,
        expiry,
        strike,
        right,
        multiplier,
        exchange,
        currency,
        local_symbol,
        trading_class,
        combo_legs: Vec::new(),
    };

    Ok(IncomingMessage::ContractData {
        req_id,
        contract: Box::new(contract),
    })
}

fn parse_sec_def_opt_params(r: &mut FieldReader<'_>) -> Result<IncomingMessage, TwsError> {
    let req_id = r.next_i32()?;
    let exchange = r.next_str()?.to_string();
    let underlying_con_id = r.next_i64()?;
    let trading_class = r.next_str()?.to_string();
    let multiplier = r.next_str()?.to_string();

    let exp_count = r.next_i32()?.max(0) as usize;
    let mut expirations = Vec::with_capacity(exp_count);
    for _ in 0..exp_count {
        expirations.push(r.next_str()?.to_string());
    }

    let strike_count = r.next_i32()?.max(0) as usize;
    let mut strikes = Vec::with_capacity(strike_count);
    for _ in 0..strike_count {
        strikes.push(r.next_f64()?);
    }

    Ok(IncomingMessage::SecDefOptParams {
        req_id,
        params: OptionChainParams {
            exchange,
            underlying_con_id,
            trading_class,
            multiplier,
            expirations,
            strikes,
        },
    })
}

// ---- outgoing requests ----

pub fn start_api(client_id: i32) -> Vec<String> {
    FieldWriter::new(out::START_API)
        .int(2)
        .int(client_id.into())
        .empty()
        .finish()
}

pub fn req_ids() -> Vec<String> {
    FieldWriter::new(out::REQ_IDS).int(1).int(1).finish()
}

/// 1 = live, 2 = frozen, 3 = delayed, 4 = delayed-frozen.
pub fn req_market_data_type(data_type: i32) -> Vec<String> {
    FieldWriter::new(out::REQ_MARKET_DATA_TYPE)
        .int(1)
        .int(data_type.into())
        .finish()
}

/// Write the contract fields shared by every request that carries one:
/// conId through tradingClass.
fn write_contract(w: &mut FieldWriter, contract: &Contract) {
    w.int(contract.con_id)
        .str(&contract.symbol)
        .str(contract.sec_type.code())
        .str(&contract.expiry)
        .float(contract.strike)
        .str(contract.right.map(Right::code).unwrap_or_default())
        .str(&contract.multiplier)
        .str(&contract.exchange)
        .empty() // primary exchange
        .str(&contract.currency)
        .str(&contract.local_symbol)
        .str(&contract.trading_class);
}

pub fn req_contract_data(req_id: ReqId, contract: &Contract) -> Vec<String> {
    let mut w = FieldWriter::new(out::REQ_CONTRACT_DATA);
    w.int(8).int(req_id.into());
    write_contract(&mut w, contract);
    w.bool(false) // include expired
        .empty() // sec id type
        .empty(); // sec id
    w.finish()
}

pub fn req_sec_def_opt_params(req_id: ReqId, underlying: &Contract) -> Vec<String> {
    FieldWriter::new(out::REQ_SEC_DEF_OPT_PARAMS)
        .int(req_id.into())
        .str(&underlying.symbol)
        .empty() // fut/fop exchange
        .str(underlying.sec_type.code())
        .int(underlying.con_id)
        .finish()
}

/// One-shot snapshot request. TWS answers with ticks and then
/// TICK_SNAPSHOT_END.
pub fn req_mkt_data(req_id: ReqId, contract: &Contract, server_version: i32) -> Vec<String> {
    let mut w = FieldWriter::new(out::REQ_MKT_DATA);
    w.int(11).int(req_id.into());
    write_contract(&mut w, contract);

    if contract.sec_type == SecType::Bag {
        w.int(contract.combo_legs.len() as i64);
        for leg in &contract.combo_legs {
            w.int(leg.con_id)
                .int(leg.ratio.into())
                .str(leg.action.as_str())
                .str(&leg.exchange);
        }
    }

    w.bool(false) // delta-neutral contract
        .empty() // generic tick list
        .bool(true); // snapshot
    if server_version >= min_version::REQ_SMART_COMPONENTS {
        w.bool(false); // regulatory snapshot
    }
    w.empty(); // market data options
    w.finish()
}

pub fn cancel_mkt_data(req_id: ReqId) -> Vec<String> {
    FieldWriter::new(out::CANCEL_MKT_DATA)
        .int(2)
        .int(req_id.into())
        .finish()
}

pub fn cancel_order(order_id: OrderId) -> Vec<String> {
    FieldWriter::new(out::CANCEL_ORDER)
        .int(1)
        .int(order_id)
        .finish()
}

/// PLACE_ORDER with every optional order attribute left unset.
pub fn place_order(
    order_id: OrderId,
    contract: &Contract,
    order: &Order,
    server_version: i32,
) -> Vec<String> {
    use min_version as sv;

    let mut w = FieldWriter::new(out::PLACE_ORDER);
    if server_version < sv::ORDER_CONTAINER {
        w.int(45);
    }
    w.int(order_id);

    write_contract(&mut w, contract);
    w.empty().empty(); // sec id type, sec id

    // main order fields
    w.str(order.action.as_str());
    if server_version >= sv::FRACTIONAL_POSITIONS {
        w.float(order.total_quantity);
    } else {
        w.int(order.total_quantity.round() as i64);
    }
    w.str(order.order_type.code())
        .opt_float(order.limit_price)
        .empty(); // aux price

    // extended order fields
    w.str("DAY") // tif
        .empty() // oca group
        .empty() // account
        .empty() // open/close
        .int(0) // origin: customer
        .empty() // order ref
        .bool(order.transmit)
        .int(order.parent_id)
        .bool(false) // block order
        .bool(false) // sweep to fill
        .int(0) // display size
        .int(0) // trigger method
        .bool(false) // outside RTH
        .bool(false); // hidden

    if contract.sec_type == SecType::Bag {
        w.int(contract.combo_legs.len() as i64);
        for leg in &contract.combo_legs {
            w.int(leg.con_id)
                .int(leg.ratio.into())
                .str(leg.action.as_str())
                .str(&leg.exchange)
                .int(0) // open/close: same as parent
                .int(0) // short sale slot
                .empty() // designated location
                .int(-1); // exempt code
        }
        w.int(0); // per-leg prices
        w.int(0); // smart combo routing params
    }

    w.empty() // deprecated shares allocation
        .float(0.0) // discretionary amount
        .empty() // good after time
        .empty() // good till date
        .empties(4); // fa group, method, percentage, profile
    if server_version >= sv::MODELS_SUPPORT {
        w.empty(); // model code
    }
    w.int(0) // short sale slot
        .empty() // designated location
        .int(-1) // exempt code
        .int(0) // oca type
        .empty() // rule 80A
        .empty() // settling firm
        .bool(false) // all or none
        .empty() // min qty
        .empty() // percent offset
        .bool(false) // e-trade only
        .bool(false) // firm quote only
        .empty() // NBBO price cap
        .int(0) // auction strategy
        .empties(5) // starting price, stock ref price, delta, stock range lower/upper
        .bool(false) // override percentage constraints
        .empty() // volatility
        .empty() // volatility type
        .empty() // delta-neutral order type
        .empty() // delta-neutral aux price
        .bool(false) // continuous update
        .empty() // reference price type
        .empty() // trail stop price
        .empty() // trailing percent
        .empty() // scale init level size
        .empty() // scale subs level size
        .empty() // scale price increment
        .empties(3) // scale table, active start/stop time
        .empty() // hedge type
        .bool(false) // opt out smart routing
        .empty() // clearing account
        .empty() // clearing intent
        .bool(false) // not held
        .bool(false) // delta-neutral contract
        .empty() // algo strategy
        .empty() // algo id
        .bool(false) // what-if
        .empty() // misc options
        .bool(false) // solicited
        .bool(false) // randomize size
        .bool(false); // randomize price

    if server_version >= sv::PEGGED_TO_BENCHMARK {
        w.int(0) // conditions
            .empty() // adjusted order type
            .empties(5) // trigger price, limit offset, adjusted stop/stop-limit/trailing
            .int(0); // adjustable trailing unit
    }
    if server_version >= sv::EXT_OPERATOR {
        w.empty();
    }
    if server_version >= sv::SOFT_DOLLAR_TIER {
        w.empty().empty();
    }
    if server_version >= sv::CASH_QTY {
        w.empty();
    }
    if server_version >= sv::DECISION_MAKER {
        w.empty().empty();
    }
    if server_version >= sv::MIFID_EXECUTION {
        w.empty().empty();
    }
    if server_version >= sv::AUTO_PRICE_FOR_HEDGE {
        w.bool(false);
    }
    if server_version >= sv::ORDER_CONTAINER {
        w.bool(false);
    }
    if server_version >= sv::D_PEG_ORDERS {
        w.bool(false);
    }
    if server_version >= sv::PRICE_MGMT_ALGO {
        w.empty();
    }
    w.finish()
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chaindesk_core::contract::{Action, ComboLeg};

    use super::*;

    const SV: i32 = 157;

    fn fields(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn tick_types_map_live_and_delayed() {
        assert_eq!(TickField::from_tick_type(1), Some(TickField::Bid));
        assert_eq!(TickField::from_tick_type(67), Some(TickField::Ask));
        assert_eq!(TickField::from_tick_type(68), Some(TickField::Last));
        assert_eq!(TickField::from_tick_type(75), Some(TickField::Close));
        assert_eq!(TickField::from_tick_type(14), None);
    }

    #[test]
    fn error_code_classes() {
        assert!(is_informational(2104));
        assert!(is_informational(2158));
        assert!(!is_informational(200));
        assert!(is_connection_lost(1100));
        assert!(is_snapshot_notice(10167));
    }

    #[test]
    fn parses_tick_price() {
        let msg = parse(&fields(&["1", "6", "10000001", "66", "1.25", "3", "0"]), SV).unwrap();
        assert_eq!(
            msg,
            IncomingMessage::TickPrice {
                req_id: 10000001,
                tick_type: 66,
                price: 1.25
            }
        );
    }

    #[test]
    fn parses_order_status_without_version_field() {
        let raw = fields(&[
            "3", "12", "Submitted", "0", "1", "0", "998", "0", "0", "1", "", "0",
        ]);
        let msg = parse(&raw, SV).unwrap();
        assert_matches!(msg, IncomingMessage::OrderStatus { order_id: 12, report } if report.status == "Submitted" && report.remaining == 1.0);
    }

    #[test]
    fn order_status_carries_version_on_old_servers() {
        let raw = fields(&["3", "1", "12", "Filled", "1", "0", "1.5", "998", "0", "1.5", "1", ""]);
        assert_matches!(parse(&raw, 120).unwrap(), IncomingMessage::OrderStatus { order_id: 12, report } if report.avg_fill_price == 1.5);
    }

    #[test]
    fn parses_error() {
        let raw = fields(&["4", "2", "10000003", "200", "No security definition has been found"]);
        assert_matches!(
            parse(&raw, SV).unwrap(),
            IncomingMessage::Error { req_id: 10000003, code: 200, .. }
        );
    }

    #[test]
    fn parses_contract_data() {
        let raw = fields(&[
            "10", "8", "10000002", "SPY", "OPT", "20250514", "585", "C", "SMART", "USD",
            "SPY   250514C00585000", "SPY", "SPY", "712345678", "0.01", "1", "100", "AMEX",
        ]);
        let msg = parse(&raw, SV).unwrap();
        let IncomingMessage::ContractData { req_id, contract } = msg else {
            panic!("expected contract data");
        };
        assert_eq!(req_id, 10000002);
        assert_eq!(contract.con_id, 712345678);
        assert_eq!(contract.right, Some(Right::Call));
        assert_eq!(contract.strike, 585.0);
        assert_eq!(contract.multiplier, "100");
        assert_eq!(contract.trading_class, "SPY");
    }

    #[test]
    fn contract_data_expiry_drops_time_suffix() {
        let raw = fields(&[
            "10", "8", "5", "SPY", "OPT", "20250514 16:00 US/Eastern", "585", "P", "SMART", "USD",
            "X", "SPY", "SPY", "1", "0.01", "1", "100",
        ]);
        let IncomingMessage::ContractData { contract, .. } = parse(&raw, SV).unwrap() else {
            panic!("expected contract data");
        };
        assert_eq!(contract.expiry, "20250514");
    }

    #[test]
    fn parses_sec_def_opt_params() {
        let raw = fields(&[
            "75", "10000001", "SMART", "756733", "SPY", "100", "2", "20250514", "20250515", "3",
            "584", "585", "586",
        ]);
        let IncomingMessage::SecDefOptParams { req_id, params } = parse(&raw, SV).unwrap() else {
            panic!("expected option params");
        };
        assert_eq!(req_id, 10000001);
        assert_eq!(params.expirations, vec!["20250514", "20250515"]);
        assert_eq!(params.strikes, vec![584.0, 585.0, 586.0]);
    }

    #[test]
    fn unknown_ids_are_unhandled() {
        assert_eq!(
            parse(&fields(&["99", "1"]), SV).unwrap(),
            IncomingMessage::Unhandled(99)
        );
    }

    #[test]
    fn truncated_frame_is_a_protocol_error() {
        assert_matches!(parse(&fields(&["9", "1"]), SV), Err(TwsError::Protocol(_)));
    }

    #[test]
    fn start_api_layout() {
        assert_eq!(start_api(7), fields(&["71", "2", "7", ""]));
    }

    #[test]
    fn contract_request_layout() {
        let c = Contract::option("SPY", "20250514", 585.0, Right::Put);
        let f = req_contract_data(10000001, &c);
        assert_eq!(f[..4], fields(&["9", "8", "10000001", "0"])[..]);
        assert_eq!(f[5], "OPT");
        assert_eq!(f[7], "585.0");
        assert_eq!(f[8], "P");
        assert_eq!(f.len(), 18);
    }

    #[test]
    fn snapshot_request_sets_snapshot_flag() {
        let mut c = Contract::option("SPY", "20250514", 585.0, Right::Call);
        c.con_id = 42;
        let f = req_mkt_data(10000005, &c, SV);
        // ..., delta neutral, generic ticks, snapshot, regulatory, options
        let n = f.len();
        assert_eq!(f[n - 5..], fields(&["0", "", "1", "0", ""])[..]);
        assert_eq!(f[3], "42");
    }

    #[test]
    fn combo_snapshot_lists_legs() {
        let legs = vec![
            ComboLeg { con_id: 1, ratio: 1, action: Action::Buy, exchange: "SMART".into() },
            ComboLeg { con_id: 2, ratio: 1, action: Action::Sell, exchange: "SMART".into() },
        ];
        let f = req_mkt_data(1, &Contract::combo("SPY", legs), SV);
        let pos = f.iter().position(|x| x == "BAG").unwrap();
        // sec type, then 9 more contract fields, then leg count
        assert_eq!(f[pos + 10], "2");
        assert_eq!(f[pos + 11..pos + 15], fields(&["1", "1", "BUY", "SMART"])[..]);
    }

    #[test]
    fn place_order_field_count_tracks_server_version() {
        let c = Contract::option("SPY", "20250514", 585.0, Right::Call);
        let order = Order::limit(Action::Buy, 1.0, 1.25);

        let newest = place_order(5, &c, &order, 157);
        assert_eq!(newest[0], "3");
        assert_eq!(newest[1], "5");
        assert_eq!(newest[16], "BUY");
        assert_eq!(newest[17], "1.0");
        assert_eq!(newest[18], "LMT");
        assert_eq!(newest[19], "1.25");

        // version field present, and later gated fields absent
        let older = place_order(5, &c, &order, 100);
        assert_eq!(older[1], "45");
        assert_eq!(older[2], "5");
        assert!(older.len() < newest.len());
    }

    #[test]
    fn place_order_carries_transmit_and_parent() {
        let c = Contract::option("SPY", "20250514", 585.0, Right::Call);
        let order = Order::market(Action::Sell, 2.0).with_transmit(false).with_parent(9);
        let f = place_order(10, &c, &order, 157);
        // tif follows lmt/aux; transmit and parent id follow 6 more fields
        let tif = f.iter().position(|x| x == "DAY").unwrap();
        assert_eq!(f[tif + 6], "0");
        assert_eq!(f[tif + 7], "9");
        assert_eq!(f[tif - 2], "");
    }

    #[test]
    fn bag_order_includes_leg_block() {
        let legs = vec![ComboLeg { con_id: 11, ratio: 1, action: Action::Buy, exchange: "SMART".into() }];
        let combo = Contract::combo("SPY", legs);
        let plain = place_order(1, &Contract::stock("SPY"), &Order::market(Action::Buy, 1.0), SV);
        let bag = place_order(1, &combo, &Order::market(Action::Buy, 1.0), SV);
        // count + 8 leg fields + two empty counts
        assert_eq!(bag.len(), plain.len() + 11);
    }
}
