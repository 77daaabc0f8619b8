//! HTTP adapter tests
//!
//! The gateway and inventory clients run against a local wiremock server;
//! the tests pin the request shapes and the mapping of remote failures.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal_macros::dec;
use serde_json::json;
use wiremock::matchers::{bearer_token, body_json, body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use core_kernel::{Currency, CustomerId, HealthCheckable, Money, PaymentId, PortError, ProductId};
use domain_billing::SettlementSource;
use domain_booking::{
    BillingAddress, CartItem, CheckoutGateway, CustomerDetails, IdempotencyKey, InventoryPort, NewCatalogProduct,
    PaymentMetadata, PaymentRequest,
};
use infra_gateway::{GatewayClient, GatewayConfig, GatewayEnvironment, InventoryClient};

const API_KEY: &str = "sk_test_123";

fn gateway(server: &MockServer) -> GatewayClient {
    let config = GatewayConfig::new(GatewayEnvironment::Test, API_KEY).with_base_url(server.uri());
    GatewayClient::new(config).unwrap()
}

fn inventory(server: &MockServer) -> InventoryClient {
    InventoryClient::new(server.uri(), Currency::INR).unwrap()
}

mod gateway_tests {
    use super::*;

    #[tokio::test]
    async fn test_create_customer_sends_bearer_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .and(bearer_token(API_KEY))
            .and(body_json(json!({
                "email": "asha@example.com",
                "name": "Asha Rao",
                "phone_number": "+919876543210"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customer_id": "cus_123",
                "email": "asha@example.com",
                "name": "Asha Rao",
                "business_id": "bus_1",
                "created_at": "2024-06-01T00:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let details = CustomerDetails {
            name: "Asha Rao".into(),
            email: "asha@example.com".into(),
            phone_number: "+919876543210".into(),
        };
        let id = gateway(&server).create_customer(&details).await.unwrap();
        assert_eq!(id, CustomerId::new("cus_123"));
    }

    #[tokio::test]
    async fn test_create_product_prices_in_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/products"))
            .and(body_partial_json(json!({
                "name": "Interstellar - Seat A1",
                "price": {"type": "one_time_price", "currency": "INR", "price": 15000}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"product_id": "pdt_1"})))
            .expect(1)
            .mount(&server)
            .await;

        let product = NewCatalogProduct {
            name: "Interstellar - Seat A1".into(),
            description: "Ticket".into(),
            price: Money::new(dec!(150), Currency::INR),
        };
        let id = gateway(&server).create_product(&product).await.unwrap();
        assert_eq!(id, ProductId::new("pdt_1"));
    }

    #[tokio::test]
    async fn test_create_payment_carries_idempotency_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(bearer_token(API_KEY))
            .and(header("idempotency-key", "K-resend"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_id": "pay_7",
                "payment_link": "https://test.checkout.example/pay_7"
            })))
            .expect(2)
            .mount(&server)
            .await;

        let request = PaymentRequest {
            customer_id: CustomerId::new("cus_1"),
            billing: BillingAddress {
                street: "123 Example Street".into(),
                city: "Bangalore".into(),
                state: "Karnataka".into(),
                country: "IN".into(),
                zipcode: "560001".into(),
            },
            product_cart: vec![CartItem {
                product_id: ProductId::new("pdt_1"),
                quantity: 1,
            }],
            currency: Currency::INR,
            return_url: "https://example.com/return".into(),
            metadata: PaymentMetadata {
                idempotent_key: IdempotencyKey::parse("K-resend").unwrap(),
                movie_time_slot_id: 42,
                booked_seats_id: vec![101],
                customer_id: CustomerId::new("cus_1"),
            },
        };

        // a resend after a lost response reuses the key, so the gateway can dedupe it
        let client = gateway(&server);
        let first = client.create_payment(&request).await.unwrap();
        let second = client.create_payment(&request).await.unwrap();
        assert_eq!(first.payment_id, PaymentId::new("pay_7"));
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_fetch_payment_maps_settlement() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_id": "pay_1",
                "total_amount": 50000,
                "currency": "INR",
                "status": "succeeded",
                "customer": {"customer_id": "cus_1", "email": "asha@example.com", "name": "Asha"},
                "product_cart": [
                    {"product_id": "pdt_1", "quantity": 1},
                    {"product_id": "pdt_2", "quantity": 1}
                ],
                "metadata": {"idempotent_key": "K-abc", "booked_seats_id": "[101,102]"}
            })))
            .mount(&server)
            .await;

        let detail = gateway(&server).fetch_payment(&PaymentId::new("pay_1")).await.unwrap();
        assert_eq!(detail.total, Money::new(dec!(500), Currency::INR));
        assert_eq!(detail.customer_id, CustomerId::new("cus_1"));
        assert_eq!(detail.product_cart.len(), 2);
        assert_eq!(detail.idempotent_key(), Some("K-abc"));
    }

    #[tokio::test]
    async fn test_fetch_customer_and_product() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "customer_id": "cus_1", "email": "asha@example.com", "name": "Asha"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/products/pdt_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "product_id": "pdt_1",
                "name": "Seat A1",
                "price": {"type": "one_time_price", "currency": "INR", "price": 25000}
            })))
            .mount(&server)
            .await;

        let client = gateway(&server);
        let customer = client.fetch_customer(&CustomerId::new("cus_1")).await.unwrap();
        assert_eq!(customer.name, "Asha");
        let product = client.fetch_product(&ProductId::new("pdt_1")).await.unwrap();
        assert_eq!(product.price, Money::new(dec!(250), Currency::INR));
    }

    #[tokio::test]
    async fn test_remote_failures_are_mapped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/customers/cus_1"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/products/pdt_1"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "7"))
            .mount(&server)
            .await;

        let client = gateway(&server);
        assert!(client
            .fetch_payment(&PaymentId::new("pay_missing"))
            .await
            .unwrap_err()
            .is_not_found());

        let down = client.fetch_payment(&PaymentId::new("pay_down")).await.unwrap_err();
        assert!(matches!(down, PortError::ServiceUnavailable { .. }));
        assert!(down.is_transient());

        let denied = client.fetch_customer(&CustomerId::new("cus_1")).await.unwrap_err();
        assert!(matches!(denied, PortError::Unauthorized { .. }));

        let limited = client.fetch_product(&ProductId::new("pdt_1")).await.unwrap_err();
        assert!(matches!(limited, PortError::RateLimited { retry_after_secs: 7 }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_a_transformation_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/payments/pay_1"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = gateway(&server).fetch_payment(&PaymentId::new("pay_1")).await.unwrap_err();
        assert!(matches!(err, PortError::Transformation { .. }));
    }

    #[tokio::test]
    async fn test_health_check() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        assert!(gateway(&server).health_check().await.is_healthy());
    }
}

mod inventory_tests {
    use super::*;

    #[tokio::test]
    async fn test_valid_seats_are_quoted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/seat-bookings/validate"))
            .and(body_json(json!({"movie_time_slot_id": 42, "seat_matrix_ids": [101, 102]})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_valid": true,
                "to_be_booked": [
                    {"id": 101, "seat_number": "A1", "price": 15000, "movie_name": "Interstellar"},
                    {"id": 102, "seat_number": "A2", "price": 15000, "movie_name": "Interstellar"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let validation = inventory(&server).validate_seats(42, &[101, 102]).await.unwrap();
        assert!(validation.is_valid);
        assert!(validation.covers_exactly(&[101, 102]));
        assert_eq!(validation.to_be_booked[1].price, Money::new(dec!(150), Currency::INR));
    }

    #[tokio::test]
    async fn test_refused_seats() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/seat-bookings/validate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"is_valid": false, "error": "seat 102 is booked"})),
            )
            .mount(&server)
            .await;

        let validation = inventory(&server).validate_seats(42, &[101, 102]).await.unwrap();
        assert!(!validation.is_valid);
        assert!(validation.to_be_booked.is_empty());
        assert_eq!(validation.reason.as_deref(), Some("seat 102 is booked"));
    }

    #[tokio::test]
    async fn test_slow_inventory_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/seat-bookings/validate"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"is_valid": false}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = InventoryClient::with_timeout(server.uri(), Currency::INR, Duration::from_millis(100)).unwrap();
        let err = client.validate_seats(42, &[101]).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/seat-bookings/validate"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = inventory(&server).validate_seats(42, &[101]).await.unwrap_err();
        assert!(err.is_transient());
    }
}

mod checkout_flow_tests {
    use super::*;
    use domain_booking::mock::InMemoryIdempotencyStore;
    use domain_booking::{
        IdempotencyKeyManager, OrchestratorConfig, PaymentLinkRequest, PaymentOrchestrator, PaymentStatus,
    };

    #[tokio::test]
    async fn test_payment_link_over_http() {
        let inventory_server = MockServer::start().await;
        let gateway_server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/v1/seat-bookings/validate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "is_valid": true,
                "to_be_booked": [
                    {"id": 101, "seat_number": "A1", "price": 15000, "movie_name": "Interstellar"}
                ]
            })))
            .expect(1)
            .mount(&inventory_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/products"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"product_id": "pdt_1"})))
            .expect(1)
            .mount(&gateway_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/customers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"customer_id": "cus_1"})))
            .expect(1)
            .mount(&gateway_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/payments"))
            .and(header("idempotency-key", "K-http"))
            .and(body_partial_json(json!({
                "payment_link": true,
                "customer": {"customer_id": "cus_1"},
                "product_cart": [{"product_id": "pdt_1", "quantity": 1}],
                "metadata": {"idempotent_key": "K-http", "booked_seats_id": "[101]"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "payment_id": "pay_1",
                "payment_link": "https://test.checkout.example/pay_1"
            })))
            .expect(1)
            .mount(&gateway_server)
            .await;

        let store = Arc::new(InMemoryIdempotencyStore::new());
        let keys = IdempotencyKeyManager::new(store.clone(), chrono::Duration::hours(24));
        let orchestrator = PaymentOrchestrator::new(
            keys,
            Arc::new(inventory(&inventory_server)),
            Arc::new(gateway(&gateway_server)),
            OrchestratorConfig::default(),
        );

        let request = PaymentLinkRequest {
            idempotent_key: "K-http".into(),
            movie_time_slot_id: 42,
            seat_matrix_ids: vec![101],
            customer: CustomerDetails {
                name: "Asha Rao".into(),
                email: "asha@example.com".into(),
                phone_number: "+919876543210".into(),
            },
            billing_address: BillingAddress {
                street: "123 Example Street".into(),
                city: "Bangalore".into(),
                state: "Karnataka".into(),
                country: "IN".into(),
                zipcode: "560001".into(),
            },
        };

        let summary = orchestrator.create_payment_link(&request).await.unwrap();
        assert_eq!(summary.payment_link, "https://test.checkout.example/pay_1");

        // a retried request is answered from the record; wiremock verifies one call each
        let again = orchestrator.create_payment_link(&request).await.unwrap();
        assert!(again.replayed);

        let record = store.get("K-http").await.unwrap();
        assert_eq!(record.payment_status, PaymentStatus::Initiated);
        assert_eq!(record.booked_seat_ids, vec![101]);
    }
}
