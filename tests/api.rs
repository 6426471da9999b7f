//! API Integration Tests
//!
//! Exercise the ingress router over the in-memory backends, driving the
//! worker by hand where a processed outcome is asserted.

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::util::ServiceExt;

use banking_ledger::api;

mod common;

fn app(h: &common::TestHarness) -> Router {
    api::create_router().with_state(h.app_state())
}

async fn body_json(body: Body) -> Value {
    let bytes = to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_submit_and_read_history_e2e() {
    let h = common::harness();
    let app = app(&h);

    // 1. Open an account with 100.00
    let response = app
        .clone()
        .oneshot(post("/accounts", json!({"initial_balance": "100.00"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response.into_body()).await;
    let account_id = body["account_id"].as_i64().unwrap();

    // 2. Submit a deposit; ingress only ever says "accepted"
    let response = app
        .clone()
        .oneshot(post(
            &format!("/accounts/{}/transactions", account_id),
            json!({"amount": "25.50", "type": "deposit"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], "accepted");
    assert!(body["request_id"].is_string());

    // 3. Let the worker consume the queue
    h.drain().await;

    // 4. The history shows the applied transaction
    let response = app
        .clone()
        .oneshot(get(&format!("/accounts/{}/ledger", account_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["type"], "deposit");
    assert_eq!(entries[0]["amount"], "25.50");

    // 5. And the balance reflects it
    let response = app
        .clone()
        .oneshot(get(&format!("/accounts/{}/balance", account_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["balance"], "125.50");
}

#[tokio::test]
async fn test_submit_rejects_bad_input() {
    let h = common::harness();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(post("/accounts", json!({"initial_balance": "100.00"})))
        .await
        .unwrap();
    let account_id = body_json(response.into_body()).await["account_id"]
        .as_i64()
        .unwrap();

    // Non-positive amount
    let response = app
        .clone()
        .oneshot(post(
            &format!("/accounts/{}/transactions", account_id),
            json!({"amount": "-5.00", "type": "deposit"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error_code"], "invalid_request");

    // Unknown transaction type
    let response = app
        .clone()
        .oneshot(post(
            &format!("/accounts/{}/transactions", account_id),
            json!({"amount": "5.00", "type": "transfer"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Nothing reached the queue
    assert!(h.queue.is_idle());
}

#[tokio::test]
async fn test_create_account_rejects_negative_balance() {
    let h = common::harness();
    let app = app(&h);

    let response = app
        .oneshot(post("/accounts", json!({"initial_balance": "-1.00"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_balance_of_unknown_account_is_404() {
    let h = common::harness();
    let app = app(&h);

    let response = app.oneshot(get("/accounts/404/balance")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error_code"], "account_not_found");
}

#[tokio::test]
async fn test_client_supplied_request_id_dedups() {
    let h = common::harness();
    let app = app(&h);

    let response = app
        .clone()
        .oneshot(post("/accounts", json!({"initial_balance": "100.00"})))
        .await
        .unwrap();
    let account_id = body_json(response.into_body()).await["account_id"]
        .as_i64()
        .unwrap();

    // The client retries the same submission with its idempotency key
    let request_id = "7c9e6679-7425-40de-944b-e07fc1f90ae7";
    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(post(
                &format!("/accounts/{}/transactions", account_id),
                json!({"request_id": request_id, "amount": "10.00", "type": "deposit"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }

    h.drain().await;

    // Applied once
    let response = app
        .clone()
        .oneshot(get(&format!("/accounts/{}/balance", account_id)))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["balance"], "110.00");

    let response = app
        .clone()
        .oneshot(get(&format!("/accounts/{}/ledger", account_id)))
        .await
        .unwrap();
    let body = body_json(response.into_body()).await;
    assert_eq!(body["entries"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dead_letter_inspection_surface() {
    let h = common::harness();
    let app = app(&h);

    h.queue.enqueue_raw(b"garbage payload".to_vec());
    h.drain().await;

    let response = app.oneshot(get("/admin/dead-letters")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    let dead = body["dead_letters"].as_array().unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0]["payload"], "garbage payload");
    assert!(dead[0]["reason"].as_str().unwrap().contains("unparseable"));
}
