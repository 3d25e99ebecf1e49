//! TWS client and broker behaviour against the in-process fake server.

mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chaindesk_core::broker::{Broker, BrokerError, OrderStatusReport};
use chaindesk_core::contract::{Action, Contract, Right};
use chaindesk_core::order::Order;
use chaindesk_core::types::OrderId;
use chaindesk_tws::reconnect::ReconnectConfig;
use chaindesk_tws::{TwsBroker, TwsClient, TwsError, TwsEvent};
use tokio::sync::broadcast;

use common::{frame, silent, FakeTws, Handler, Reply, FIRST_ORDER_ID, SERVER_VERSION};

/// Answers contract lookups for SPY stock and SPY options, 200 for
/// unknown symbols and 321 for `BAD`.
fn contract_handler() -> Handler {
    Arc::new(|f: &[String]| {
        if f[0] != "9" {
            return Reply::Frames(Vec::new());
        }
        let req_id = f[2].as_str();
        match (f[4].as_str(), f[5].as_str()) {
            ("SPY", "STK") => Reply::Frames(vec![
                frame(&[
                    "10", "8", req_id, "SPY", "STK", "", "0", "", "SMART", "USD", "SPY", "NMS",
                    "SPY", "756733", "0.01", "100", "",
                ]),
                frame(&["52", "1", req_id]),
            ]),
            ("SPY", "OPT") => Reply::Frames(vec![
                frame(&[
                    "10", "8", req_id, "SPY", "OPT", "20250514", f[7].as_str(), f[8].as_str(), "SMART", "USD",
                    "SPY   250514C00585000", "SPY", "SPY", "712345678", "0.01", "1", "100",
                ]),
                frame(&["52", "1", req_id]),
            ]),
            ("BAD", _) => Reply::Frames(vec![frame(&["4", "2", req_id, "321", "Error validating request"])]),
            _ => Reply::Frames(vec![frame(&[
                "4",
                "2",
                req_id,
                "200",
                "No security definition has been found for the request",
            ])]),
        }
    })
}

fn order_handler() -> Handler {
    Arc::new(|f: &[String]| match f[0].as_str() {
        "3" => Reply::Frames(vec![frame(&[
            "3", f[1].as_str(), "PreSubmitted", "0", "1", "0", "1", "0", "0", "1", "", "0",
        ])]),
        "4" => Reply::Frames(vec![frame(&[
            "3", f[2].as_str(), "Cancelled", "0", "1", "0", "1", "0", "0", "1", "", "0",
        ])]),
        _ => Reply::Frames(Vec::new()),
    })
}

async fn next_order_status(rx: &mut broadcast::Receiver<TwsEvent>) -> (OrderId, OrderStatusReport) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let TwsEvent::OrderStatus { order_id, report } = rx.recv().await.unwrap() {
                return (order_id, report);
            }
        }
    })
    .await
    .expect("no order status within 2s")
}

#[tokio::test]
async fn handshake_reports_version_and_first_order_id() {
    let tws = FakeTws::start(silent()).await;
    let client = TwsClient::new(tws.config());
    let mut events = client.subscribe();

    let conn = client.connect().await.unwrap();
    assert_eq!(conn.server_version(), SERVER_VERSION);
    assert_eq!(conn.next_order_id(), FIRST_ORDER_ID);
    assert!(conn.is_connected());

    assert_matches!(
        events.recv().await.unwrap(),
        TwsEvent::Connected { server_version: 157, next_order_id: 100 }
    );
    assert_eq!(tws.received()[0], frame(&["71", "2", "1", ""]));
    conn.shutdown().await;
}

#[tokio::test]
async fn delayed_data_is_requested_after_handshake() {
    let tws = FakeTws::start(silent()).await;
    let mut config = tws.config();
    config.market_data_type = 3;

    let conn = TwsClient::new(config).connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(tws.received().contains(&frame(&["59", "1", "3"])));
    conn.shutdown().await;
}

#[tokio::test]
async fn connect_fails_when_nothing_listens() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = TwsClient::new(chaindesk_tws::TwsConfig {
        port,
        ..Default::default()
    });
    assert_matches!(client.connect().await, Err(TwsError::Connection(_)));
}

#[tokio::test]
async fn broker_qualifies_contracts() {
    let tws = FakeTws::start(contract_handler()).await;
    let broker = TwsBroker::new(tws.config());
    broker.connect().await.unwrap();
    assert!(broker.is_connected());

    let spy = broker.qualify(&Contract::stock("SPY")).await.unwrap();
    assert_eq!(spy.con_id, 756733);
    assert_eq!(spy.exchange, "SMART");

    let opt = broker
        .qualify(&Contract::option("SPY", "20250514", 585.0, Right::Put))
        .await
        .unwrap();
    assert_eq!(opt.con_id, 712345678);
    assert_eq!(opt.right, Some(Right::Put));

    broker.disconnect().await;
    assert!(!broker.is_connected());
}

#[tokio::test]
async fn unknown_contract_is_unqualified_and_rejections_surface() {
    let tws = FakeTws::start(contract_handler()).await;
    let broker = TwsBroker::new(tws.config());
    broker.connect().await.unwrap();

    assert_matches!(
        broker.qualify(&Contract::stock("NOPE")).await,
        Err(BrokerError::Unqualified(_))
    );
    assert_matches!(
        broker.qualify(&Contract::stock("BAD")).await,
        Err(BrokerError::Rejected { code: 321, .. })
    );
    broker.disconnect().await;
}

#[tokio::test]
async fn option_params_collect_every_exchange() {
    let handler: Handler = Arc::new(|f: &[String]| {
        if f[0] != "78" {
            return Reply::Frames(Vec::new());
        }
        let req_id = f[1].as_str();
        Reply::Frames(vec![
            frame(&["75", req_id, "CBOE", "756733", "SPY", "100", "1", "20250514", "2", "584", "585"]),
            frame(&["75", req_id, "SMART", "756733", "SPY", "100", "2", "20250514", "20250515", "3", "584", "585", "586"]),
            frame(&["76", req_id]),
        ])
    });
    let tws = FakeTws::start(handler).await;
    let broker = TwsBroker::new(tws.config());
    broker.connect().await.unwrap();

    let mut spy = Contract::stock("SPY");
    spy.con_id = 756733;
    let chains = broker.option_params(&spy).await.unwrap();
    assert_eq!(chains.len(), 2);
    assert_eq!(chains[1].exchange, "SMART");
    assert_eq!(chains[1].strikes, vec![584.0, 585.0, 586.0]);
    broker.disconnect().await;
}

#[tokio::test]
async fn snapshot_collects_ticks_until_snapshot_end() {
    let handler: Handler = Arc::new(|f: &[String]| {
        if f[0] != "1" {
            return Reply::Frames(Vec::new());
        }
        let req_id = f[2].as_str();
        Reply::Frames(vec![
            frame(&["1", "6", req_id, "1", "1.20", "10", "0"]),
            frame(&["1", "6", req_id, "2", "1.30", "12", "0"]),
            frame(&["1", "6", req_id, "4", "-1", "0", "0"]),
            frame(&["57", "1", req_id]),
        ])
    });
    let tws = FakeTws::start(handler).await;
    let broker = TwsBroker::new(tws.config());
    broker.connect().await.unwrap();

    let quote = broker
        .snapshot(&Contract::option("SPY", "20250514", 585.0, Right::Call))
        .await
        .unwrap();
    assert_eq!(quote.bid, Some(1.20));
    assert_eq!(quote.ask, Some(1.30));
    assert_eq!(quote.last, None);
    broker.disconnect().await;
}

#[tokio::test]
async fn snapshot_timeout_returns_partial_quote_and_cancels() {
    let handler: Handler = Arc::new(|f: &[String]| {
        if f[0] != "1" {
            return Reply::Frames(Vec::new());
        }
        Reply::Frames(vec![frame(&["1", "6", f[2].as_str(), "66", "2.05", "1", "0"])])
    });
    let tws = FakeTws::start(handler).await;
    let broker = TwsBroker::new(tws.config());
    broker.connect().await.unwrap();

    let quote = broker.snapshot(&Contract::stock("SPY")).await.unwrap();
    assert_eq!(quote.bid, Some(2.05));
    assert_eq!(quote.ask, None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(tws.count("2"), 1);
    broker.disconnect().await;
}

#[tokio::test]
async fn orders_use_sequential_ids_and_track_status() {
    let tws = FakeTws::start(order_handler()).await;
    let broker = TwsBroker::new(tws.config());
    let mut events = broker.subscribe();
    broker.connect().await.unwrap();

    let contract = Contract::option("SPY", "20250514", 585.0, Right::Call);
    let first = broker
        .place_order(&contract, &Order::market(Action::Buy, 1.0))
        .await
        .unwrap();
    assert_eq!(first, FIRST_ORDER_ID);

    let (order_id, report) = next_order_status(&mut events).await;
    assert_eq!(order_id, first);
    assert_eq!(report.status, "PreSubmitted");
    assert_eq!(broker.order_status(first).await.unwrap().status, "PreSubmitted");

    let second = broker
        .place_order(&contract, &Order::limit(Action::Sell, 1.0, 1.25))
        .await
        .unwrap();
    assert_eq!(second, FIRST_ORDER_ID + 1);
    next_order_status(&mut events).await;

    broker.cancel_order(first).await.unwrap();
    let (order_id, report) = next_order_status(&mut events).await;
    assert_eq!(order_id, first);
    assert_eq!(report.status, "Cancelled");
    assert!(broker.order_status(999).await.is_none());
    broker.disconnect().await;
}

#[tokio::test]
async fn requests_fail_when_not_connected() {
    let broker = TwsBroker::new(chaindesk_tws::TwsConfig::default());
    assert!(!broker.is_connected());
    assert_matches!(
        broker.snapshot(&Contract::stock("SPY")).await,
        Err(BrokerError::NotConnected)
    );
    assert_matches!(broker.cancel_order(1).await, Err(BrokerError::NotConnected));
}

#[tokio::test]
async fn server_drop_fails_pending_request_and_emits_disconnected() {
    let handler: Handler = Arc::new(|f: &[String]| {
        if f[0] == "78" {
            Reply::Close
        } else {
            Reply::Frames(Vec::new())
        }
    });
    let tws = FakeTws::start(handler).await;
    let client = TwsClient::new(tws.config());
    let mut events = client.subscribe();
    let conn = client.connect().await.unwrap();

    assert_matches!(
        conn.option_params(&Contract::stock("SPY")).await,
        Err(BrokerError::NotConnected)
    );
    assert!(!conn.is_connected());

    let disconnected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let TwsEvent::Disconnected = events.recv().await.unwrap() {
                return;
            }
        }
    })
    .await;
    assert!(disconnected.is_ok());
}

#[tokio::test]
async fn broker_reconnects_after_connection_loss() {
    let handler: Handler = Arc::new(|f: &[String]| {
        if f[0] == "78" {
            Reply::Close
        } else {
            Reply::Frames(Vec::new())
        }
    });
    let tws = FakeTws::start(handler).await;
    let broker = TwsBroker::with_reconnect(
        tws.config(),
        ReconnectConfig {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(200),
            multiplier: 2.0,
        },
    );
    broker.connect().await.unwrap();

    assert!(broker.option_params(&Contract::stock("SPY")).await.is_err());

    let restored = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if broker.is_connected() && tws.count("71") >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(restored.is_ok(), "broker did not reconnect");

    broker.disconnect().await;
    assert!(!broker.is_connected());
}
