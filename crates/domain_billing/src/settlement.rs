//! Settlement read models
//!
//! What the reconciler reads back from the payment gateway once a payment
//! is confirmed: the payment itself, the paying customer and every catalog
//! product in the cart.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use core_kernel::{CustomerId, DomainPort, Money, PaymentId, PortError, ProductId};

/// Metadata key naming the idempotency record of a payment
pub const IDEMPOTENT_KEY_METADATA: &str = "idempotent_key";

/// One line of a settled cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A payment as confirmed by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementDetail {
    pub payment_id: PaymentId,
    /// Amount captured, in the payment currency
    pub total: Money,
    pub customer_id: CustomerId,
    pub product_cart: Vec<CartLine>,
    /// Gateway-side status, e.g. `succeeded`
    pub status: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl SettlementDetail {
    /// Idempotency key the payment was created under, if recorded
    pub fn idempotent_key(&self) -> Option<&str> {
        self.metadata
            .get(IDEMPOTENT_KEY_METADATA)
            .map(String::as_str)
            .filter(|key| !key.is_empty())
    }
}

/// The paying customer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetail {
    pub customer_id: CustomerId,
    pub name: String,
    pub email: String,
}

/// A catalog product as priced by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub product_id: ProductId,
    pub name: String,
    pub price: Money,
}

/// Port for reading confirmed payments back from the gateway
#[async_trait]
pub trait SettlementSource: DomainPort {
    async fn fetch_payment(&self, payment_id: &PaymentId) -> Result<SettlementDetail, PortError>;

    async fn fetch_customer(&self, customer_id: &CustomerId) -> Result<CustomerDetail, PortError>;

    async fn fetch_product(&self, product_id: &ProductId) -> Result<ProductDetail, PortError>;
}
