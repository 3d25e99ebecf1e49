#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use chaindesk_core::simulated::SimulatedBroker;
use chrono::NaiveDate;
use http_body_util::BodyExt;
use tower::ServiceExt;

use chaindesk_api::config::{BrokerMode, FeedConfig, ServerConfig};
use chaindesk_api::router::build_app_router;
use chaindesk_api::state::AppState;
use chaindesk_tws::TwsConfig;

/// Expiry listed by [`simulated_broker`] and tracked by [`test_config`].
pub const EXPIRY: &str = "20250514";
/// A second listed expiry, for bracket orders.
pub const NEXT_EXPIRY: &str = "20250515";

/// Test configuration: simulated broker, fixed expiry, fast refresh.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:3000".to_string()],
        request_timeout_secs: 30,
        broker_mode: BrokerMode::Simulated,
        simulated_price: 500.0,
        heartbeat_interval: Duration::from_secs(30),
        feed: FeedConfig {
            refresh_interval: Duration::from_millis(50),
            request_spacing: Duration::ZERO,
            expiry_date: NaiveDate::from_ymd_opt(2025, 5, 14),
            ..FeedConfig::default()
        },
        tws: TwsConfig::default(),
    }
}

/// SPY at 500 with two listed expiries.
pub fn simulated_broker() -> Arc<SimulatedBroker> {
    Arc::new(SimulatedBroker::with_expirations(
        "SPY",
        500.0,
        vec![EXPIRY.to_string(), NEXT_EXPIRY.to_string()],
    ))
}

pub fn test_state(broker: Arc<SimulatedBroker>) -> AppState {
    AppState::new(test_config(), broker)
}

/// Full application router with the production middleware stack.
pub fn build_test_app(state: AppState) -> Router {
    let config = test_config();
    build_app_router(state, &config)
}

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
