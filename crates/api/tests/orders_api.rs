//! Integration tests for the order endpoints.

mod common;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::Router;
use chaindesk_core::broker::{Broker, OrderStatusReport};
use chaindesk_core::contract::SecType;
use chaindesk_core::simulated::SimulatedBroker;
use common::{body_json, get, post, post_json, EXPIRY, NEXT_EXPIRY};
use serde_json::{json, Value};

async fn connected_app() -> (Arc<SimulatedBroker>, Router) {
    let broker = common::simulated_broker();
    broker.connect().await.unwrap();
    let app = common::build_test_app(common::test_state(broker.clone()));
    (broker, app)
}

fn single(expiry: &str, strike: f64, right: &str, action: &str) -> Value {
    json!({
        "symbol": "SPY",
        "expiry": expiry,
        "strike": strike,
        "right": right,
        "action": action,
        "quantity": 1,
    })
}

#[tokio::test]
async fn place_single_market_order() {
    let (broker, app) = connected_app().await;

    let response = post_json(app, "/api/place_single_order", single(EXPIRY, 500.0, "C", "BUY")).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json["order_id"].is_i64());
    assert!(json.get("child_ids").is_none());
    assert_eq!(broker.placed_orders().len(), 1);
}

#[tokio::test]
async fn place_single_limit_order_accepts_long_right_name() {
    let (broker, app) = connected_app().await;
    let mut body = single(EXPIRY, 495.0, "PUT", "SELL");
    body["order_type"] = json!("LIMIT");
    body["limit_price"] = json!(0.85);

    let response = post_json(app, "/api/place_single_order", body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let (_, _, order) = &broker.placed_orders()[0];
    assert_eq!(order.limit_price, Some(0.85));
}

#[tokio::test]
async fn missing_field_is_reported_by_name() {
    let (_broker, app) = connected_app().await;
    let mut body = single(EXPIRY, 500.0, "C", "BUY");
    body.as_object_mut().unwrap().remove("strike");

    let response = post_json(app, "/api/place_single_order", body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Missing required field: strike");
}

#[tokio::test]
async fn limit_without_price_is_rejected() {
    let (broker, app) = connected_app().await;
    let mut body = single(EXPIRY, 500.0, "C", "BUY");
    body["order_type"] = json!("LIMIT");

    let response = post_json(app, "/api/place_single_order", body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(broker.placed_orders().is_empty());
}

#[tokio::test]
async fn malformed_json_is_bad_request() {
    let (_broker, app) = connected_app().await;
    let request = axum::http::Request::builder()
        .method("POST")
        .uri("/api/place_single_order")
        .header("content-type", "application/json")
        .body(axum::body::Body::from("{not json"))
        .unwrap();

    let response = tower::ServiceExt::oneshot(app, request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unknown_contract_is_broker_error() {
    let (_broker, app) = connected_app().await;

    let response = post_json(app, "/api/place_single_order", single("20250620", 500.0, "C", "BUY")).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await["code"], "BROKER_ERROR");
}

#[tokio::test]
async fn orders_while_disconnected_are_unavailable() {
    let app = common::build_test_app(common::test_state(common::simulated_broker()));

    let response = post_json(app.clone(), "/api/place_single_order", single(EXPIRY, 500.0, "C", "BUY")).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["code"], "NOT_CONNECTED");

    assert_eq!(
        post(app.clone(), "/api/cancel_order/1").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
    assert_eq!(
        get(app, "/api/order_status/1").await.status(),
        StatusCode::SERVICE_UNAVAILABLE
    );
}

#[tokio::test]
async fn multi_leg_requires_non_empty_legs() {
    let (_broker, app) = connected_app().await;

    for body in [json!({}), json!({"legs": "x"}), json!({"legs": []})] {
        let response = post_json(app.clone(), "/api/place_multi_leg_order", body).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["message"], "Missing or invalid 'legs' field");
    }
}

#[tokio::test]
async fn multi_leg_missing_field_names_the_leg() {
    let (_broker, app) = connected_app().await;
    let mut second = single(EXPIRY, 505.0, "C", "SELL");
    second.as_object_mut().unwrap().remove("action");

    let response = post_json(
        app,
        "/api/place_multi_leg_order",
        json!({"legs": [single(EXPIRY, 500.0, "C", "BUY"), second]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await["message"],
        "Missing required field 'action' in leg 1"
    );
}

#[tokio::test]
async fn same_expiry_legs_go_out_as_combo() {
    let (broker, app) = connected_app().await;
    let body = json!({"legs": [
        single(EXPIRY, 500.0, "C", "BUY"),
        single(EXPIRY, 505.0, "C", "SELL"),
    ]});

    let response = post_json(app, "/api/place_multi_leg_order", body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["success"], true);
    assert!(json.get("child_ids").is_none());
    let placed = broker.placed_orders();
    assert_eq!(placed.len(), 1);
    assert_eq!(placed[0].1.sec_type, SecType::Bag);
}

#[tokio::test]
async fn mixed_expiries_go_out_as_bracket() {
    let (broker, app) = connected_app().await;
    let body = json!({"legs": [
        single(EXPIRY, 500.0, "C", "BUY"),
        single(NEXT_EXPIRY, 500.0, "C", "SELL"),
    ]});

    let response = post_json(app, "/api/place_multi_leg_order", body).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let parent_id = json["order_id"].as_i64().unwrap();
    let child_ids = json["child_ids"].as_array().unwrap();
    assert_eq!(child_ids.len(), 1);
    let placed = broker.placed_orders();
    assert_eq!(placed[1].2.parent_id, parent_id);
    assert!(placed[1].2.transmit);
}

#[tokio::test]
async fn cancel_unknown_order_is_404() {
    let (_broker, app) = connected_app().await;

    let response = post(app, "/api/cancel_order/4242").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["message"], "Order ID 4242 not found");
}

#[tokio::test]
async fn cancel_and_status_round_trip() {
    let (broker, app) = connected_app().await;
    let placed = body_json(
        post_json(app.clone(), "/api/place_single_order", single(EXPIRY, 500.0, "C", "BUY")).await,
    )
    .await;
    let order_id = placed["order_id"].as_i64().unwrap();

    let status = body_json(get(app.clone(), &format!("/api/order_status/{order_id}")).await).await;
    assert_eq!(status["success"], true);
    assert_eq!(status["status"], "Submitted");
    assert_eq!(status["remaining"], 1.0);

    let response = post(app.clone(), &format!("/api/cancel_order/{order_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await["message"],
        format!("Order {order_id} cancellation request sent")
    );
    assert_eq!(broker.cancelled_orders(), vec![order_id]);

    broker.set_order_status(
        order_id,
        OrderStatusReport {
            status: "Cancelled".into(),
            filled: 0.0,
            remaining: 1.0,
            avg_fill_price: 0.0,
        },
    );
    let status = body_json(get(app, &format!("/api/order_status/{order_id}")).await).await;
    assert_eq!(status["status"], "Cancelled");
    assert_eq!(status["avg_fill_price"], 0.0);
}

#[tokio::test]
async fn status_of_unknown_order_is_404() {
    let (_broker, app) = connected_app().await;

    let response = get(app, "/api/order_status/77").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["code"], "NOT_FOUND");
}

#[tokio::test]
async fn null_field_counts_as_missing() {
    let (broker, app) = connected_app().await;
    let mut body = single(EXPIRY, 500.0, "C", "BUY");
    body["expiry"] = Value::Null;

    let response = post_json(app, "/api/place_single_order", body).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["message"], "Missing required field: expiry");
    assert!(broker.placed_orders().is_empty());
}

#[tokio::test]
async fn fractional_combo_quantity_names_the_leg() {
    let (broker, app) = connected_app().await;
    let mut second = single(EXPIRY, 505.0, "C", "SELL");
    second["quantity"] = json!(0.5);

    let response = post_json(
        app,
        "/api/place_multi_leg_order",
        json!({"legs": [single(EXPIRY, 500.0, "C", "BUY"), second]}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert!(json["message"].as_str().unwrap().starts_with("Leg 2:"));
    assert!(broker.placed_orders().is_empty());
}
