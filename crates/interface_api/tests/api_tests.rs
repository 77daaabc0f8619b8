//! HTTP tests for the booking payment API
//!
//! The router runs against the in-memory key store, ledger and scripted
//! gateway, so every route is exercised end to end without a network.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum_test::TestServer;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::{json, Value};

use core_kernel::{Currency, HealthCheckable, Money};
use domain_billing::mock::{InMemoryLedgerStore, MockSettlementSource};
use domain_billing::{WebhookVerifier, WEBHOOK_ID_HEADER, WEBHOOK_SIGNATURE_HEADER, WEBHOOK_TIMESTAMP_HEADER};
use domain_booking::mock::{InMemoryIdempotencyStore, MockCheckoutGateway, MockInventory};
use domain_booking::{OrchestratorConfig, OrderStage, PaymentStatus};
use interface_api::{create_router, AppState, Ports, ServiceOptions};
use test_utils::{assert_stage, assert_untouched, BookingFixtures};

const SECRET: &str = "whsec_MfKQ9r8GKYqrTwjUPD8ILPZIo2LaLaSw";

struct TestApp {
    server: TestServer,
    store: Arc<InMemoryIdempotencyStore>,
    gateway: Arc<MockCheckoutGateway>,
    source: Arc<MockSettlementSource>,
    ledger: Arc<InMemoryLedgerStore>,
}

fn app_with(inventory: MockInventory) -> TestApp {
    app_with_parts(inventory, MockCheckoutGateway::new())
}

fn app_with_parts(inventory: MockInventory, gateway: MockCheckoutGateway) -> TestApp {
    let store = Arc::new(InMemoryIdempotencyStore::new());
    let ledger = Arc::new(InMemoryLedgerStore::new());
    let gateway = Arc::new(gateway);
    let source = Arc::new(MockSettlementSource::new());

    let ports = Ports {
        store: store.clone(),
        ledger: ledger.clone(),
        inventory: Arc::new(inventory),
        gateway: gateway.clone(),
        settlements: source.clone(),
        probes: vec![
            store.clone() as Arc<dyn HealthCheckable>,
            gateway.clone() as Arc<dyn HealthCheckable>,
        ],
    };
    let options = ServiceOptions {
        orchestrator: OrchestratorConfig::default(),
        key_ttl: chrono::Duration::hours(24),
        webhook_secret: SECRET.to_string(),
    };

    let state = AppState::new(ports, options).unwrap();
    let server = TestServer::new(create_router(state)).unwrap();
    TestApp {
        server,
        store,
        gateway,
        source,
        ledger,
    }
}

fn app() -> TestApp {
    app_with(MockInventory::with_seats("Interstellar", &[101, 102, 103], 25_000))
}

fn checkout_body(key: &str) -> Value {
    serde_json::to_value(BookingFixtures::checkout_request(key)).unwrap()
}

fn header(name: &'static str, value: &str) -> (HeaderName, HeaderValue) {
    (HeaderName::from_static(name), HeaderValue::from_str(value).unwrap())
}

// ============================================================================
// Health
// ============================================================================

mod health_tests {
    use super::*;

    #[tokio::test]
    async fn test_liveness() {
        let app = app();

        let response = app.server.get("/health").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        assert_eq!(response.json::<Value>()["status"], "healthy");
    }

    #[tokio::test]
    async fn test_readiness_reports_each_probe() {
        let app = app();

        let response = app.server.get("/health/ready").await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<Value>();
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"].as_array().unwrap().len(), 2);
    }
}

// ============================================================================
// Idempotency keys
// ============================================================================

mod key_tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_then_recommit() {
        let app = app();

        let first = app
            .server
            .post("/api/v1/idempotency-keys")
            .json(&json!({ "idempotent_key": "K-1" }))
            .await;
        assert_eq!(first.status_code(), StatusCode::CREATED);
        let body = first.json::<Value>();
        assert_eq!(body["status"], 201);
        assert_eq!(body["already_committed"], false);
        assert_eq!(body["record"]["payment_status"], "UNSET");

        let second = app
            .server
            .post("/api/v1/idempotency-keys")
            .json(&json!({ "idempotent_key": "K-1" }))
            .await;
        assert_eq!(second.status_code(), StatusCode::OK);
        assert_eq!(second.json::<Value>()["already_committed"], true);
        assert_eq!(app.store.len().await, 1);
    }

    #[tokio::test]
    async fn test_key_status() {
        let app = app();

        let unused = app.server.get("/api/v1/idempotency-keys/K-2").await;
        assert_eq!(unused.status_code(), StatusCode::OK);
        let body = unused.json::<Value>();
        assert_eq!(body["is_valid"], true);
        assert!(body.get("record").is_none());

        app.server
            .post("/api/v1/idempotency-keys")
            .json(&json!({ "idempotent_key": "K-2" }))
            .await;

        let used = app.server.get("/api/v1/idempotency-keys/K-2").await;
        let body = used.json::<Value>();
        assert_eq!(body["is_valid"], false);
        assert_eq!(body["record"]["idempotent_key"], "K-2");
    }

    #[tokio::test]
    async fn test_empty_key_is_rejected_with_details() {
        let app = app();

        let response = app
            .server
            .post("/api/v1/idempotency-keys")
            .json(&json!({ "idempotent_key": "" }))
            .await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "validation_error");
        assert_eq!(body["details"][0]["field"], "idempotent_key");
    }

    #[tokio::test]
    async fn test_step_by_step_flow() {
        let app = app();
        app.server
            .post("/api/v1/idempotency-keys")
            .json(&json!({ "idempotent_key": "K-steps" }))
            .await;

        let order = app
            .server
            .post("/api/v1/orders")
            .json(&json!({ "idempotent_key": "K-steps", "movie_time_slot_id": 42, "seat_matrix_ids": [101] }))
            .await;
        assert_eq!(order.status_code(), StatusCode::OK);
        assert_eq!(order.json::<Value>()["order_ids"], json!(["pdt_1"]));

        let customer = app
            .server
            .post("/api/v1/customers")
            .json(&json!({
                "idempotent_key": "K-steps",
                "name": "Asha Rao",
                "email": "asha@example.com",
                "phone_number": "+919876543210"
            }))
            .await;
        assert_eq!(customer.status_code(), StatusCode::OK);
        assert_eq!(customer.json::<Value>()["customer_id"], "cus_1");

        let link = app.server.post("/api/v1/idempotency-keys/K-steps/payment-link").await;
        assert_eq!(link.status_code(), StatusCode::OK);
        assert_eq!(link.json::<Value>()["payment_id"], "pay_1");

        let record = app.store.get("K-steps").await.unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Initiated);
        assert_stage(&record, OrderStage::PaymentLinkIssued);
        assert!(record.in_flight.is_none());
    }
}

// ============================================================================
// Booking flow
// ============================================================================

mod booking_tests {
    use super::*;

    #[tokio::test]
    async fn test_order_without_committed_key() {
        let app = app();

        let response = app
            .server
            .post("/api/v1/orders")
            .json(&json!({ "idempotent_key": "K-none", "movie_time_slot_id": 42, "seat_matrix_ids": [101] }))
            .await;

        assert_eq!(response.status_code(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(response.json::<Value>()["error"], "precondition_failed");
        assert_eq!(app.gateway.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_booked_seat_is_refused() {
        let app = app_with(MockInventory::with_seats("Interstellar", &[101, 102], 25_000).with_booked(&[102]));

        let response = app.server.post("/api/v1/payment-links").json(&checkout_body("K-taken")).await;

        assert_eq!(response.status_code(), StatusCode::BAD_REQUEST);
        let body = response.json::<Value>();
        assert_eq!(body["error"], "seats_unavailable");
        assert_eq!(body["retryable"], false);
        assert_eq!(app.gateway.product_calls(), 0);
    }

    #[tokio::test]
    async fn test_invalid_checkout_lists_every_field() {
        let app = app();
        let mut body = checkout_body("K-bad");
        body["email"] = json!("not-an-email");
        body["seat_matrix_ids"] = json!([]);

        let response = app.server.post("/api/v1/payment-links").json(&body).await;

        assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        let details = response.json::<Value>()["details"].as_array().unwrap().clone();
        let fields: Vec<&str> = details.iter().map(|d| d["field"].as_str().unwrap()).collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"seat_matrix_ids"));
        assert_eq!(app.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_checkout_issues_link_once() {
        let app = app();

        let first = app.server.post("/api/v1/payment-links").json(&checkout_body("K-abc")).await;
        assert_eq!(first.status_code(), StatusCode::OK);
        let body = first.json::<Value>();
        assert_eq!(body["status"], 200);
        assert_eq!(body["payment_id"], "pay_1");
        assert_eq!(body["replayed"], false);
        assert!(body["payment_link"].as_str().unwrap().starts_with("https://"));

        let replay = app.server.post("/api/v1/payment-links").json(&checkout_body("K-abc")).await;
        assert_eq!(replay.status_code(), StatusCode::OK);
        let body = replay.json::<Value>();
        assert_eq!(body["payment_id"], "pay_1");
        assert_eq!(body["replayed"], true);

        assert_eq!(app.gateway.product_calls(), 2);
        assert_eq!(app.gateway.customer_calls(), 1);
        assert_eq!(app.gateway.payment_calls(), 1);
    }

    #[tokio::test]
    async fn test_gateway_outage_is_retryable() {
        let app = app();
        app.gateway.set_unavailable(true);

        let response = app.server.post("/api/v1/payment-links").json(&checkout_body("K-down")).await;

        assert_eq!(response.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.json::<Value>()["retryable"], true);

        let record = app.store.get("K-down").await.unwrap();
        assert_untouched(&record);
        assert_stage(&record, OrderStage::New);
        assert!(record.in_flight.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_with_one_key_charge_once() {
        let app = app_with_parts(
            MockInventory::with_seats("Interstellar", &[101, 102, 103], 25_000),
            MockCheckoutGateway::new().with_delay(Duration::from_millis(50)),
        );
        let body = checkout_body("K-race");

        let (a, b) = tokio::join!(
            app.server.post("/api/v1/payment-links").json(&body).into_future(),
            app.server.post("/api/v1/payment-links").json(&body).into_future(),
        );

        let mut statuses = [a.status_code(), b.status_code()];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);
        let loser = if a.status_code() == StatusCode::CONFLICT { a } else { b };
        let error = loser.json::<Value>();
        assert_eq!(error["error"], "in_progress");
        assert_eq!(error["retryable"], true);

        assert_eq!(app.gateway.product_calls(), 2);
        assert_eq!(app.gateway.customer_calls(), 1);
        assert_eq!(app.gateway.payment_calls(), 1);

        // the retry the loser was told to make is answered from the record
        let retry = app.server.post("/api/v1/payment-links").json(&body).await;
        assert_eq!(retry.status_code(), StatusCode::OK);
        assert_eq!(retry.json::<Value>()["replayed"], true);
        assert_eq!(app.gateway.payment_calls(), 1);
    }

    #[tokio::test]
    async fn test_generated_buyers_can_check_out() {
        let app = app();

        for n in 0..3 {
            let mut request = BookingFixtures::checkout_request(&format!("K-buyer-{}", n));
            request.customer = BookingFixtures::random_customer();
            request.seat_matrix_ids = vec![101 + n];

            let response = app.server.post("/api/v1/payment-links").json(&request).await;
            assert_eq!(response.status_code(), StatusCode::OK);
        }
        assert_eq!(app.gateway.customer_calls(), 3);
        assert_eq!(app.gateway.payment_calls(), 3);
    }
}

// ============================================================================
// Webhooks
// ============================================================================

mod webhook_tests {
    use super::*;

    const BODY: &str = r#"{"business_id":"bus_1","type":"payment.succeeded","data":{"payment_id":"pay_1"}}"#;

    async fn seed_settlement(app: &TestApp) {
        let inr = |amount| Money::new(amount, Currency::INR);
        app.source.add_customer("cus_1", "Asha Rao", "asha@example.com").await;
        app.source.add_product("pdt_1", "Interstellar - Seat R101", inr(dec!(250))).await;
        app.source.add_product("pdt_2", "Interstellar - Seat R102", inr(dec!(250))).await;
        app.source
            .add_payment("pay_1", "cus_1", inr(dec!(500)), &["pdt_1", "pdt_2"], Some("K-abc"))
            .await;
    }

    #[tokio::test]
    async fn test_unsigned_delivery_is_rejected() {
        let app = app();
        seed_settlement(&app).await;

        let now = Utc::now().timestamp().to_string();
        let (id_name, id_value) = header(WEBHOOK_ID_HEADER, "msg_1");
        let (ts_name, ts_value) = header(WEBHOOK_TIMESTAMP_HEADER, &now);
        let (sig_name, sig_value) = header(WEBHOOK_SIGNATURE_HEADER, "v1,bm90LWEtc2lnbmF0dXJl");

        let response = app
            .server
            .post("/webhooks/payments")
            .add_header(id_name, id_value)
            .add_header(ts_name, ts_value)
            .add_header(sig_name, sig_value)
            .text(BODY)
            .await;

        assert_eq!(response.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.ledger.post_calls(), 0);
        assert_eq!(app.source.calls(), 0);
    }

    #[tokio::test]
    async fn test_signed_delivery_settles_booking() {
        let app = app();
        let checkout = app.server.post("/api/v1/payment-links").json(&checkout_body("K-abc")).await;
        assert_eq!(checkout.status_code(), StatusCode::OK);
        seed_settlement(&app).await;

        let verifier = WebhookVerifier::new(SECRET).unwrap();
        let now = Utc::now().timestamp();
        let signature = verifier.sign("msg_1", now, BODY.as_bytes());
        let (id_name, id_value) = header(WEBHOOK_ID_HEADER, "msg_1");
        let (ts_name, ts_value) = header(WEBHOOK_TIMESTAMP_HEADER, &now.to_string());
        let (sig_name, sig_value) = header(WEBHOOK_SIGNATURE_HEADER, &signature);

        let response = app
            .server
            .post("/webhooks/payments")
            .add_header(id_name, id_value)
            .add_header(ts_name, ts_value)
            .add_header(sig_name, sig_value)
            .text(BODY)
            .await;

        assert_eq!(response.status_code(), StatusCode::OK);
        let body = response.json::<Value>();
        assert_eq!(body["outcome"], "reconciled");
        assert_eq!(body["status"], 200);
        assert_eq!(body["posting_status"], "posted");
        assert_eq!(body["settled_key"], "K-abc");
        assert_eq!(app.ledger.all_entries().await.len(), 2);

        let record = app.store.get("K-abc").await.unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Settled);
    }
}
