//! Gateway wire format
//!
//! Request and response bodies of the payment gateway's REST API, and the
//! explicit mapping between them and the domain types. Amounts travel as
//! integer minor units; payment metadata is a flat string map, so list
//! values such as the booked seat ids are carried as JSON array text.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use core_kernel::{Currency, CustomerId, Money, PaymentId, PortError, ProductId};
use domain_billing::{CartLine, CustomerDetail, ProductDetail, SettlementDetail};
use domain_booking::{BillingAddress, CustomerDetails, IssuedPayment, NewCatalogProduct, PaymentRequest};

/// Price type of a single-purchase product
pub const ONE_TIME_PRICE: &str = "one_time_price";

/// Tax category used for ticket products
pub const TICKET_TAX_CATEGORY: &str = "digital_products";

fn parse_currency(raw: &str) -> Result<Currency, PortError> {
    raw.parse::<Currency>()
        .map_err(|e| PortError::transformation(format!("gateway currency: {}", e)))
}

fn to_minor(money: &Money) -> Result<i64, PortError> {
    money
        .to_minor()
        .map_err(|e| PortError::transformation(format!("amount {}: {}", money, e)))
}

// ---------------------------------------------------------------------------
// Customers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerCreate {
    pub email: String,
    pub name: String,
    pub phone_number: String,
}

impl From<&CustomerDetails> for CustomerCreate {
    fn from(details: &CustomerDetails) -> Self {
        Self {
            email: details.email.clone(),
            name: details.name.clone(),
            phone_number: details.phone_number.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomerResponse {
    pub customer_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone_number: Option<String>,
}

impl From<CustomerResponse> for CustomerDetail {
    fn from(wire: CustomerResponse) -> Self {
        Self {
            customer_id: CustomerId::new(wire.customer_id),
            name: wire.name,
            email: wire.email,
        }
    }
}

// ---------------------------------------------------------------------------
// Products
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceWire {
    #[serde(rename = "type", default = "one_time_price")]
    pub price_type: String,
    pub currency: String,
    /// Minor units
    pub price: i64,
    #[serde(default)]
    pub discount: i64,
    #[serde(default)]
    pub purchasing_power_parity: bool,
}

fn one_time_price() -> String {
    ONE_TIME_PRICE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductCreate {
    pub name: String,
    pub description: String,
    pub price: PriceWire,
    pub tax_category: String,
}

impl ProductCreate {
    pub fn from_domain(product: &NewCatalogProduct) -> Result<Self, PortError> {
        Ok(Self {
            name: product.name.clone(),
            description: product.description.clone(),
            price: PriceWire {
                price_type: ONE_TIME_PRICE.to_string(),
                currency: product.price.currency().code().to_string(),
                price: to_minor(&product.price)?,
                discount: 0,
                purchasing_power_parity: false,
            },
            tax_category: TICKET_TAX_CATEGORY.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProductResponse {
    pub product_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub price: Option<PriceWire>,
}

impl TryFrom<ProductResponse> for ProductDetail {
    type Error = PortError;

    fn try_from(wire: ProductResponse) -> Result<Self, Self::Error> {
        let price = wire
            .price
            .ok_or_else(|| PortError::transformation(format!("product {} has no price", wire.product_id)))?;
        let currency = parse_currency(&price.currency)?;
        Ok(Self {
            name: wire.name.unwrap_or_default(),
            price: Money::from_minor(price.price, currency),
            product_id: ProductId::new(wire.product_id),
        })
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingWire {
    pub city: String,
    pub country: String,
    pub state: String,
    pub street: String,
    pub zipcode: String,
}

impl From<&BillingAddress> for BillingWire {
    fn from(address: &BillingAddress) -> Self {
        Self {
            city: address.city.clone(),
            country: address.country.to_ascii_uppercase(),
            state: address.state.clone(),
            street: address.street.clone(),
            zipcode: address.zipcode.clone(),
        }
    }
}

/// Reference to a customer that already exists on the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachCustomer {
    pub customer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItemWire {
    pub product_id: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentCreate {
    pub payment_link: bool,
    pub billing: BillingWire,
    pub customer: AttachCustomer,
    pub product_cart: Vec<CartItemWire>,
    pub return_url: String,
    pub billing_currency: String,
    pub metadata: HashMap<String, String>,
}

impl PaymentCreate {
    pub fn from_domain(request: &PaymentRequest) -> Result<Self, PortError> {
        let meta = &request.metadata;
        let seats = serde_json::to_string(&meta.booked_seats_id)
            .map_err(|e| PortError::transformation(format!("booked seat ids: {}", e)))?;

        let metadata = HashMap::from([
            ("idempotent_key".to_string(), meta.idempotent_key.as_str().to_string()),
            ("movie_time_slot_id".to_string(), meta.movie_time_slot_id.to_string()),
            ("booked_seats_id".to_string(), seats),
            ("customer_id".to_string(), meta.customer_id.as_str().to_string()),
        ]);

        Ok(Self {
            payment_link: true,
            billing: BillingWire::from(&request.billing),
            customer: AttachCustomer {
                customer_id: request.customer_id.as_str().to_string(),
            },
            product_cart: request
                .product_cart
                .iter()
                .map(|item| CartItemWire {
                    product_id: item.product_id.as_str().to_string(),
                    quantity: item.quantity,
                })
                .collect(),
            return_url: request.return_url.clone(),
            billing_currency: request.currency.code().to_string(),
            metadata,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentCreated {
    pub payment_id: String,
    #[serde(default)]
    pub payment_link: Option<String>,
}

impl TryFrom<PaymentCreated> for IssuedPayment {
    type Error = PortError;

    fn try_from(wire: PaymentCreated) -> Result<Self, Self::Error> {
        let payment_link = wire
            .payment_link
            .filter(|link| !link.is_empty())
            .ok_or_else(|| PortError::transformation(format!("payment {} was issued without a link", wire.payment_id)))?;
        Ok(Self {
            payment_id: PaymentId::new(wire.payment_id),
            payment_link,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentCustomerWire {
    pub customer_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// `GET /payments/{id}`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    /// Minor units
    pub total_amount: i64,
    pub currency: String,
    pub customer: PaymentCustomerWire,
    #[serde(default)]
    pub product_cart: Option<Vec<CartItemWire>>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TryFrom<PaymentResponse> for SettlementDetail {
    type Error = PortError;

    fn try_from(wire: PaymentResponse) -> Result<Self, Self::Error> {
        let currency = parse_currency(&wire.currency)?;
        let metadata = wire
            .metadata
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect();

        Ok(Self {
            payment_id: PaymentId::new(wire.payment_id),
            total: Money::from_minor(wire.total_amount, currency),
            customer_id: CustomerId::new(wire.customer.customer_id),
            product_cart: wire
                .product_cart
                .unwrap_or_default()
                .into_iter()
                .map(|item| CartLine {
                    product_id: ProductId::new(item.product_id),
                    quantity: item.quantity,
                })
                .collect(),
            status: wire.status,
            metadata,
        })
    }
}
