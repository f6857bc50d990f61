//! HTTP surface tests: routing, the error envelope, auth guards and the
//! JSON shapes, driven through the router without a socket.

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use rust_decimal_macros::dec;
use std::sync::Arc;
use tower::util::ServiceExt;

use atelier::infrastructure::currency::FixedRateConverter;
use atelier::infrastructure::gateway::mock::MockGateway;
use atelier::infrastructure::gateway::verifier::InsecureVerifier;
use atelier::infrastructure::notifications::LoggingConfirmationSink;
use atelier::interfaces::http::{AppState, router};

use common::TestEnv;

struct Api {
    env: TestEnv,
    gateway: Arc<MockGateway>,
    router: Router,
}

async fn api() -> Api {
    let env = TestEnv::new().await;
    let gateway = env.gateway.clone();
    let state = AppState::new(
        env.db.clone(),
        &env.config,
        gateway.clone(),
        Arc::new(FixedRateConverter::new(dec!(3.2))),
        Arc::new(InsecureVerifier),
        Arc::new(LoggingConfirmationSink),
    );
    Api {
        router: router(state),
        gateway,
        env,
    }
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        serde_json::json!({})
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::json!({}))
    };
    (status, body)
}

fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(path: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(path)
        .body(Body::empty())
        .unwrap()
}

fn checkout_body(product_id: i64, variant_id: i64, quantity: i64) -> serde_json::Value {
    serde_json::json!({
        "items": [{"product_id": product_id, "variant_id": variant_id, "quantity": quantity}],
        "email": "guest@example.com",
        "shipping_address": {"city": "Minsk", "line1": "Praspiekt 1"},
        "shipping_method_name": "Standard",
        "shipping_cost": "4.90",
    })
}

#[tokio::test]
async fn test_create_order_and_fetch_detail() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-1", dec!(49.90), 10).await;

    let (status, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 2)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    let order = &body["order"];
    assert_eq!(order["order_status"], "pending_payment");
    assert_eq!(order["payment_status"], "pending");
    assert_eq!(order["subtotal"], "99.80");
    assert_eq!(order["total"], "104.70");
    assert!(order["order_number"].as_str().unwrap().starts_with("ORD-"));
    assert_eq!(order["reservations"].as_array().unwrap().len(), 1);

    let order_id = order["id"].as_str().unwrap();
    let (status, body) = send(&api.router, get(&format!("/orders/{}", order_id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order"]["lines"].as_array().unwrap().len(), 1);
    let minutes = body["order"]["reservations"][0]["minutes_remaining"]
        .as_i64()
        .unwrap();
    assert!((0..=15).contains(&minutes));
}

#[tokio::test]
async fn test_insufficient_stock_envelope() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-2", dec!(10.00), 1).await;

    let (status, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 3)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);
    assert_eq!(body["error_code"], "insufficient_stock");
    let details = body["error_details"].as_array().unwrap();
    assert_eq!(details[0]["requested"], 3);
    assert_eq!(details[0]["available"], 1);
}

#[tokio::test]
async fn test_owner_guard_hides_foreign_orders() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-3", dec!(10.00), 5).await;

    let mut request_body = checkout_body(1, 11, 1);
    request_body["email"] = serde_json::Value::Null;
    let request = Request::builder()
        .method("POST")
        .uri("/orders/create")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-user-id", "user-7")
        .body(Body::from(request_body.to_string()))
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::CREATED);
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    // Anonymous and foreign callers see a 404; the owner and admins see it.
    let (status, _) = send(&api.router, get(&format!("/orders/{}", order_id))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/orders/{}", order_id))
        .header("x-user-id", "someone-else")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/orders/{}", order_id))
        .header("x-user-id", "user-7")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .method("GET")
        .uri(format!("/orders/{}", order_id))
        .header("x-admin-token", "test-admin")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_inventory_check_is_public() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-4", dec!(10.00), 3).await;

    let (status, body) = send(
        &api.router,
        post_json(
            "/inventory/check",
            serde_json::json!({"items": [
                {"product_id": 1, "variant_id": 11, "quantity": 2},
                {"product_id": 1, "variant_id": 11, "quantity": 9},
                {"product_id": 99, "variant_id": 99, "quantity": 1},
            ]}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["all_in_stock"], false);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["in_stock"], true);
    assert_eq!(items[1]["in_stock"], false);
    assert_eq!(items[2]["available"], 0);
}

#[tokio::test]
async fn test_admin_routes_require_token() {
    let api = api().await;

    let (status, body) = send(&api.router, get("/admin/inventory/dashboard")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error_code"], "forbidden");

    let request = Request::builder()
        .method("GET")
        .uri("/admin/inventory/dashboard")
        .header("x-admin-token", "test-admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["counters"]["active_reservations"], 0);
}

#[tokio::test]
async fn test_admin_bulk_update_adjusts_ledger() {
    let api = api().await;
    let item = api.env.seed_variant(1, 11, "API-5", dec!(10.00), 4).await;

    let request = Request::builder()
        .method("POST")
        .uri("/admin/inventory/bulk-update")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-token", "test-admin")
        .body(Body::from(
            serde_json::json!({"adjustments": [
                {"stock_item_id": item.id, "delta": 6}
            ]})
            .to_string(),
        ))
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["succeeded"].as_array().unwrap().len(), 1);

    let stock = api.env.stock(&item.id).await;
    assert_eq!(stock.on_hand, 10);
}

#[tokio::test]
async fn test_payment_flow_over_http() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-6", dec!(50.00), 5).await;

    let (_, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 1)),
    )
    .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &api.router,
        post_json(
            "/payments/initiate",
            serde_json::json!({"order_id": order_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();
    assert!(body["redirect_url"].as_str().unwrap().contains(&token));

    // Webhook marks it paid.
    api.gateway.set_status(&token, "succeeded");
    let (status, body) = send(
        &api.router,
        post_json(
            "/webhooks/paypro",
            serde_json::json!({"checkout": {
                "token": token,
                "status": "succeeded",
                "order": {"tracking_id": order_id},
            }}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["applied"], true);

    let (status, body) = send(
        &api.router,
        get(&format!("/payments/status?token={}", token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payment_status"], "paid");
    assert_eq!(body["order_status"], "processing");

    // Initiating again reports the settled state instead of a new session.
    let (status, body) = send(
        &api.router,
        post_json(
            "/payments/initiate",
            serde_json::json!({"order_id": order_id}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["already_settled"], true);
}

#[tokio::test]
async fn test_return_leg_redirects_to_frontend() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-7", dec!(50.00), 5).await;

    let (_, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 1)),
    )
    .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();
    let (_, body) = send(
        &api.router,
        post_json(
            "/payments/initiate",
            serde_json::json!({"order_id": order_id}),
        ),
    )
    .await;
    let token = body["token"].as_str().unwrap().to_string();
    api.gateway.set_status(&token, "successful");

    let response = api
        .router
        .clone()
        .oneshot(get(&format!("/payment/success?token={}", token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    let location = response
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(location.starts_with("http://localhost:3000/payment/result"));
    assert!(location.contains("status=success"));
}

#[tokio::test]
async fn test_cancel_endpoint_reports_noop_on_terminal_order() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-8", dec!(50.00), 5).await;

    let (_, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 1)),
    )
    .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &api.router,
        post_json(
            &format!("/orders/{}/cancel", order_id),
            serde_json::json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], true);

    // Cancelling again is a reported no-op, not an error.
    let (status, body) = send(
        &api.router,
        post_json(
            &format!("/orders/{}/cancel", order_id),
            serde_json::json!({}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancelled"], false);
    assert_eq!(body["order_status"], "cancelled");
}

#[tokio::test]
async fn test_admin_ship_and_deliver_routes() {
    let api = api().await;
    api.env.seed_variant(1, 11, "API-9", dec!(50.00), 5).await;

    let (_, body) = send(
        &api.router,
        post_json("/orders/create", checkout_body(1, 11, 1)),
    )
    .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();
    let (_, body) = send(
        &api.router,
        post_json(
            "/payments/initiate",
            serde_json::json!({"order_id": order_id}),
        ),
    )
    .await;
    let token = body["token"].as_str().unwrap().to_string();
    api.gateway.set_status(&token, "succeeded");
    send(
        &api.router,
        post_json(
            "/webhooks/paypro",
            serde_json::json!({"checkout": {
                "token": token,
                "status": "succeeded",
                "order": {"tracking_id": order_id},
            }}),
        ),
    )
    .await;

    // No token, no shipping.
    let (status, _) = send(
        &api.router,
        post_json(
            &format!("/admin/orders/{}/ship", order_id),
            serde_json::json!({"tracking_number": "BY-7"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/orders/{}/ship", order_id))
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-admin-token", "test-admin")
        .body(Body::from(
            serde_json::json!({"tracking_number": "BY-7"}).to_string(),
        ))
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_status"], "shipped");
    assert_eq!(body["tracking_number"], "BY-7");

    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/orders/{}/deliver", order_id))
        .header("x-admin-token", "test-admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["order_status"], "delivered");

    // A second deliver is a guard violation on this operator path.
    let request = Request::builder()
        .method("POST")
        .uri(format!("/admin/orders/{}/deliver", order_id))
        .header("x-admin-token", "test-admin")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&api.router, request).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "state_guard");
}

#[tokio::test]
async fn test_healthz() {
    let api = api().await;
    let (status, body) = send(&api.router, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}
