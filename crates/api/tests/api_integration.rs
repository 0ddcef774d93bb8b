//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use booking::{BookingEngine, InMemoryProvider};
use common::{CabinTypeId, OrderId, VoyageId};
use domain::{Money, PaymentMethod};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use store::InMemoryStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestApp {
    app: Router,
    wallet: Arc<InMemoryProvider>,
    voyage_id: VoyageId,
    cabin_type_id: CabinTypeId,
}

const ADMIN: &[(&str, &str)] = &[("x-user-id", "ops-1"), ("x-user-role", "admin")];
const ALICE: &[(&str, &str)] = &[("x-user-id", "alice")];
const BOB: &[(&str, &str)] = &[("x-user-id", "bob")];

/// One adult in one cabin: 700.00 fare + 25.00 port fee + 5.00 service fee.
const CABIN_PRICE: i64 = 73_000;

async fn setup(capacity: u32) -> TestApp {
    let wallet = Arc::new(InMemoryProvider::new(PaymentMethod::Wallet, "wallet-secret"));
    let engine = BookingEngine::builder(InMemoryStore::new())
        .provider(wallet.clone())
        .build();
    let app = api::create_app(api::AppState::new(engine), get_metrics_handle());

    let voyage_id = VoyageId::new();
    let cabin_type_id = CabinTypeId::new();
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/admin/inventory/{voyage_id}/{cabin_type_id}"),
        ADMIN,
        Some(json!({ "capacity": capacity })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(
        &app,
        "PUT",
        &format!("/admin/fares/{voyage_id}/{cabin_type_id}"),
        ADMIN,
        Some(json!({
            "cabin_type_name": "Balcony",
            "max_occupancy": 2,
            "adult_price": 70_000,
            "child_price": 35_000,
            "infant_price": 0,
            "port_fee": 2_500,
            "service_fee": 500
        })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    TestApp {
        app,
        wallet,
        voyage_id,
        cabin_type_id,
    }
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn callback(app: &Router, provider: &str, body: Vec<u8>, signature: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/payments/callback/{provider}"))
        .header("Provider-Signature", signature)
        .body(Body::from(body))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn order_body(t: &TestApp, quantity: u32) -> Value {
    let passengers: Vec<Value> = (0..quantity)
        .map(|i| {
            json!({
                "name": format!("Guest{i}"),
                "surname": "Sailor",
                "gender": "female",
                "birth_date": "1990-04-12",
                "passenger_type": "adult"
            })
        })
        .collect();
    json!({
        "items": [{
            "voyage_id": t.voyage_id,
            "cabin_type_id": t.cabin_type_id,
            "quantity": quantity,
            "occupancy": { "adults": 1 }
        }],
        "passengers": passengers,
        "contact": { "name": "Alice Sailor", "phone": "+1-555-0100" }
    })
}

async fn create_order(t: &TestApp, quantity: u32) -> Value {
    let (status, order) = send(&t.app, "POST", "/orders", ALICE, Some(order_body(t, quantity))).await;
    assert_eq!(status, StatusCode::CREATED, "{order}");
    order
}

async fn pay_in_full(t: &TestApp, order_id: &str) {
    let (status, intent) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/payments"),
        ALICE,
        Some(json!({ "method": "wallet" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{intent}");
    let payment_no = intent["payment"]["payment_no"].as_str().unwrap();
    let amount = intent["payment"]["amount"].as_i64().unwrap();

    let (body, signature) =
        t.wallet
            .settlement_callback(payment_no, "txn-1", Money::from_cents(amount));
    let (status, ack) = callback(&t.app, "wallet", body, &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, "ok");
}

#[tokio::test]
async fn test_health_check() {
    let t = setup(1).await;
    let (status, json) = send(&t.app, "GET", "/health", &[], None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_metrics_endpoint_renders_text() {
    let t = setup(1).await;
    let response = t
        .app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn test_create_hold_and_cancel_order() {
    let t = setup(2).await;
    let order = create_order(&t, 2).await;
    assert_eq!(order["status"], "pending");
    assert_eq!(order["payment_status"], "unpaid");
    assert_eq!(order["total_amount"], 2 * CABIN_PRICE);
    assert_eq!(order["user_id"], "alice");

    let inventory = format!("/inventory/{}/{}", t.voyage_id, t.cabin_type_id);
    let (_, slot) = send(&t.app, "GET", &inventory, &[], None).await;
    assert_eq!(slot["held"], 2);
    assert_eq!(slot["available"], 0);

    let order_id = order["id"].as_str().unwrap();
    let (status, cancelled) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/cancel"),
        ALICE,
        Some(json!({ "reason": "customer_request" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cancelled["status"], "cancelled");
    assert_eq!(cancelled["cancellation_reason"], "customer_request");

    let (_, slot) = send(&t.app, "GET", &inventory, &[], None).await;
    assert_eq!(slot["held"], 0);
    assert_eq!(slot["available"], 2);
}

#[tokio::test]
async fn test_sold_out_slot_returns_conflict() {
    let t = setup(1).await;
    create_order(&t, 1).await;

    let (status, json) = send(&t.app, "POST", "/orders", ALICE, Some(order_body(&t, 1))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_passenger_mismatch_is_bad_request() {
    let t = setup(2).await;
    let mut body = order_body(&t, 2);
    body["passengers"].as_array_mut().unwrap().pop();

    let (status, json) = send(&t.app, "POST", "/orders", ALICE, Some(body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("passenger"));
}

#[tokio::test]
async fn test_quote_does_not_hold_cabins() {
    let t = setup(1).await;
    let body = json!({ "items": order_body(&t, 1)["items"] });
    let (status, quote) = send(&t.app, "POST", "/orders/quote", &[], Some(body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(quote["total"], CABIN_PRICE);

    let inventory = format!("/inventory/{}/{}", t.voyage_id, t.cabin_type_id);
    let (_, slot) = send(&t.app, "GET", &inventory, &[], None).await;
    assert_eq!(slot["held"], 0);
}

#[tokio::test]
async fn test_orders_are_private_to_their_owner() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    let number = order["order_number"].as_str().unwrap();

    let (status, _) = send(&t.app, "GET", &format!("/orders/{order_id}"), ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, "GET", &format!("/orders/number/{number}"), ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&t.app, "GET", &format!("/orders/{order_id}"), BOB, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&t.app, "GET", &format!("/orders/{order_id}"), ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, mine) = send(&t.app, "GET", "/orders", ALICE, None).await;
    assert_eq!(mine.as_array().unwrap().len(), 1);
    let (_, theirs) = send(&t.app, "GET", "/orders", BOB, None).await;
    assert!(theirs.as_array().unwrap().is_empty());
    let (status, _) = send(&t.app, "GET", "/users/alice/orders", BOB, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = send(&t.app, "GET", "/orders", &[], None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_confirm_pending_order_is_conflict() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, json) = send(&t.app, "POST", &format!("/orders/{order_id}/confirm"), ALICE, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("confirm"));

    let (_, order) = send(&t.app, "GET", &format!("/orders/{order_id}"), ALICE, None).await;
    assert_eq!(order["status"], "pending");
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let t = setup(1).await;
    let (status, json) = send(&t.app, "GET", &format!("/orders/{}", OrderId::new()), ALICE, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().is_some());
}

#[tokio::test]
async fn test_invalid_order_id_format() {
    let t = setup(1).await;
    let (status, _) = send(&t.app, "GET", "/orders/not-a-uuid", ALICE, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_admin_routes_require_admin_role() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, json) = send(&t.app, "DELETE", &format!("/admin/orders/{order_id}"), ALICE, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(json["error"].as_str().is_some());

    let (status, _) = send(
        &t.app,
        "PUT",
        &format!("/admin/inventory/{}/{}", t.voyage_id, t.cabin_type_id),
        ALICE,
        Some(json!({ "capacity": 50 })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(&t.app, "DELETE", &format!("/admin/orders/{order_id}"), ADMIN, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&t.app, "GET", &format!("/orders/{order_id}"), ADMIN, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_callback_pays_order_once() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    pay_in_full(&t, order_id).await;

    let (_, details) = send(&t.app, "GET", &format!("/orders/{order_id}/details"), ALICE, None).await;
    assert_eq!(details["order"]["status"], "paid");
    assert_eq!(details["order"]["payment_status"], "paid");
    assert_eq!(details["order"]["paid_amount"], CABIN_PRICE);
    let payment = &details["payments"][0];
    assert_eq!(payment["state"], "paid");

    // The provider delivers at least once.
    let (body, signature) =
        t.wallet
            .settlement_callback(payment["payment_no"].as_str().unwrap(), "txn-1", Money::from_cents(CABIN_PRICE));
    let (status, ack) = callback(&t.app, "wallet", body, &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, "ok");

    let (_, order) = send(&t.app, "GET", &format!("/orders/{order_id}"), ALICE, None).await;
    assert_eq!(order["paid_amount"], CABIN_PRICE);

    let (status, _) = send(&t.app, "POST", &format!("/orders/{order_id}/confirm"), ALICE, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_forged_callback_is_rejected() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    let (_, intent) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/payments"),
        ALICE,
        Some(json!({ "method": "wallet" })),
    )
    .await;
    let payment_no = intent["payment"]["payment_no"].as_str().unwrap();

    let (body, _) = t
        .wallet
        .settlement_callback(payment_no, "txn-9", Money::from_cents(CABIN_PRICE));
    let (status, ack) = callback(&t.app, "wallet", body, "00ff").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(ack, "error");

    let (_, order) = send(&t.app, "GET", &format!("/orders/{order_id}"), ALICE, None).await;
    assert_eq!(order["payment_status"], "unpaid");

    let (status, json) = callback(&t.app, "barter", b"{}".to_vec(), "").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json.contains("error"));
}

#[tokio::test]
async fn test_callback_for_unknown_payment_is_acknowledged() {
    let t = setup(1).await;
    let (body, signature) =
        t.wallet
            .settlement_callback("PAY-UNKNOWN", "txn-77", Money::from_cents(CABIN_PRICE));

    let (status, ack) = callback(&t.app, "wallet", body.clone(), &signature).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack, "ok");

    // Redelivery gets the same answer instead of an endless retry loop.
    let (status, _) = callback(&t.app, "wallet", body, &signature).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_payment_with_unconfigured_method_is_not_found() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();

    let (status, _) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/payments"),
        ALICE,
        Some(json!({ "method": "card" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_full_refund_flow() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    pay_in_full(&t, order_id).await;

    let (_, refundable) = send(&t.app, "GET", &format!("/orders/{order_id}/refundable"), ALICE, None).await;
    assert_eq!(refundable["refundable_amount"], CABIN_PRICE);

    let (status, refund) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/refunds"),
        ALICE,
        Some(json!({
            "amount": CABIN_PRICE,
            "reason": "change of plans",
            "cancellation_reason": "customer_request"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{refund}");
    assert_eq!(refund["status"], "pending");
    let refund_id = refund["id"].as_str().unwrap();

    let (status, _) = send(&t.app, "POST", &format!("/admin/refunds/{refund_id}/approve"), ALICE, Some(json!({}))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, approved) = send(
        &t.app,
        "POST",
        &format!("/admin/refunds/{refund_id}/approve"),
        ADMIN,
        Some(json!({ "note": "within policy" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(approved["status"], "approved");
    assert_eq!(approved["reviewer_id"], "ops-1");

    let (status, completed) =
        send(&t.app, "POST", &format!("/admin/refunds/{refund_id}/process"), ADMIN, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(completed["status"], "completed");

    let (_, order) = send(&t.app, "GET", &format!("/orders/{order_id}"), ALICE, None).await;
    assert_eq!(order["payment_status"], "refunded");
    assert_eq!(order["refunded_amount"], CABIN_PRICE);

    let inventory = format!("/inventory/{}/{}", t.voyage_id, t.cabin_type_id);
    let (_, slot) = send(&t.app, "GET", &inventory, &[], None).await;
    assert_eq!(slot["available"], 1);

    let (_, refunds) = send(&t.app, "GET", "/refunds", ALICE, None).await;
    assert_eq!(refunds.as_array().unwrap().len(), 1);
    let (status, _) = send(&t.app, "GET", &format!("/refunds/{refund_id}"), BOB, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_refund_rejection_needs_a_note() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    pay_in_full(&t, order_id).await;

    let (_, refund) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/refunds"),
        ALICE,
        Some(json!({ "amount": 10_000, "reason": "cabin noise" })),
    )
    .await;
    let refund_id = refund["id"].as_str().unwrap();
    let reject = format!("/admin/refunds/{refund_id}/reject");

    let (status, _) = send(&t.app, "POST", &reject, ADMIN, Some(json!({ "note": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, rejected) =
        send(&t.app, "POST", &reject, ADMIN, Some(json!({ "note": "outside policy" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(rejected["status"], "rejected");
    assert_eq!(rejected["review_note"], "outside policy");

    let (status, _) = send(&t.app, "POST", &reject, ADMIN, Some(json!({ "note": "again" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_refund_above_collected_is_unprocessable() {
    let t = setup(1).await;
    let order = create_order(&t, 1).await;
    let order_id = order["id"].as_str().unwrap();
    pay_in_full(&t, order_id).await;

    let (status, json) = send(
        &t.app,
        "POST",
        &format!("/orders/{order_id}/refunds"),
        ALICE,
        Some(json!({ "amount": CABIN_PRICE + 1, "reason": "too much" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(json["error"].as_str().is_some());
}
