//! Payment gateway adapter
//!
//! `GatewayClient` talks to the gateway's REST API with a bearer token. It
//! implements both sides the core needs: `CheckoutGateway` for the booking
//! flow (customers, products, payment links) and `SettlementSource` for the
//! reconciler (reading confirmed payments back).
//!
//! Deadlines are applied by the callers; the client only carries a
//! transport timeout so a stuck connection is eventually dropped.

use std::time::Instant;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, instrument};

use core_kernel::{CustomerId, DomainPort, HealthCheckResult, HealthCheckable, PaymentId, PortError, ProductId};
use domain_billing::{CustomerDetail, ProductDetail, SettlementDetail, SettlementSource};
use domain_booking::{CheckoutGateway, CustomerDetails, IssuedPayment, NewCatalogProduct, PaymentRequest};

use crate::config::{GatewayConfig, GatewayConfigError};
use crate::error::{status_error, transport_error};
use crate::wire::{
    CustomerCreate, CustomerResponse, PaymentCreate, PaymentCreated, PaymentResponse, ProductCreate, ProductResponse,
};

const SERVICE: &str = "payment gateway";

/// Lets the gateway collapse a resent payment creation into the first one
const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// REST client for the payment gateway
#[derive(Debug, Clone)]
pub struct GatewayClient {
    http: Client,
    config: GatewayConfig,
    base_url: String,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayConfigError> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GatewayConfigError::Client(e.to_string()))?;
        let base_url = config.base_url();
        Ok(Self { http, config, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.config.api_key)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        builder: RequestBuilder,
        operation: &str,
        entity: &str,
        id: &str,
    ) -> Result<T, PortError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, operation, self.config.request_timeout, e))?;

        if !response.status().is_success() {
            return Err(status_error(SERVICE, entity, id, response).await);
        }

        response
            .json::<T>()
            .await
            .map_err(|e| transport_error(SERVICE, operation, self.config.request_timeout, e))
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        operation: &str,
        entity: &str,
    ) -> Result<T, PortError> {
        let builder = self.http.post(format!("{}{}", self.base_url, path)).json(body);
        self.send(builder, operation, entity, "new").await
    }

    async fn post_idempotent<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        idempotency_key: &str,
        operation: &str,
        entity: &str,
    ) -> Result<T, PortError> {
        let builder = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .header(IDEMPOTENCY_KEY_HEADER, idempotency_key)
            .json(body);
        self.send(builder, operation, entity, "new").await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, operation: &str, entity: &str, id: &str) -> Result<T, PortError> {
        let builder = self.http.get(format!("{}{}/{}", self.base_url, path, id));
        self.send(builder, operation, entity, id).await
    }
}

impl DomainPort for GatewayClient {}

#[async_trait]
impl CheckoutGateway for GatewayClient {
    #[instrument(skip(self, details))]
    async fn create_customer(&self, details: &CustomerDetails) -> Result<CustomerId, PortError> {
        let created: CustomerResponse = self
            .post("/customers", &CustomerCreate::from(details), "gateway.create_customer", "Customer")
            .await?;
        info!(customer_id = %created.customer_id, "Gateway customer created");
        Ok(CustomerId::new(created.customer_id))
    }

    #[instrument(skip(self, product), fields(name = %product.name))]
    async fn create_product(&self, product: &NewCatalogProduct) -> Result<ProductId, PortError> {
        let body = ProductCreate::from_domain(product)?;
        let created: ProductResponse = self
            .post("/products", &body, "gateway.create_product", "Product")
            .await?;
        debug!(product_id = %created.product_id, "Gateway product created");
        Ok(ProductId::new(created.product_id))
    }

    #[instrument(skip(self, request), fields(key = %request.metadata.idempotent_key, customer_id = %request.customer_id))]
    async fn create_payment(&self, request: &PaymentRequest) -> Result<IssuedPayment, PortError> {
        let body = PaymentCreate::from_domain(request)?;
        let created: PaymentCreated = self
            .post_idempotent(
                "/payments",
                &body,
                request.metadata.idempotent_key.as_str(),
                "gateway.create_payment",
                "Payment",
            )
            .await?;
        let issued = IssuedPayment::try_from(created)?;
        info!(payment_id = %issued.payment_id, "Payment link issued");
        Ok(issued)
    }
}

#[async_trait]
impl SettlementSource for GatewayClient {
    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<SettlementDetail, PortError> {
        let wire: PaymentResponse = self
            .get("/payments", "gateway.fetch_payment", "Payment", payment_id.as_str())
            .await?;
        SettlementDetail::try_from(wire)
    }

    #[instrument(skip(self))]
    async fn fetch_customer(&self, customer_id: &CustomerId) -> Result<CustomerDetail, PortError> {
        let wire: CustomerResponse = self
            .get("/customers", "gateway.fetch_customer", "Customer", customer_id.as_str())
            .await?;
        Ok(CustomerDetail::from(wire))
    }

    #[instrument(skip(self))]
    async fn fetch_product(&self, product_id: &ProductId) -> Result<ProductDetail, PortError> {
        let wire: ProductResponse = self
            .get("/products", "gateway.fetch_product", "Product", product_id.as_str())
            .await?;
        ProductDetail::try_from(wire)
    }
}

#[async_trait]
impl HealthCheckable for GatewayClient {
    /// Any HTTP answer from the API root counts as reachable
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = self.authorized(self.http.get(&self.base_url)).send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_server_error() => HealthCheckResult::unhealthy(
                "payment_gateway",
                latency_ms,
                format!("gateway answered {}", response.status().as_u16()),
            ),
            Ok(_) => HealthCheckResult::healthy("payment_gateway", latency_ms),
            Err(e) => HealthCheckResult::unhealthy("payment_gateway", latency_ms, e.to_string()),
        }
    }
}
