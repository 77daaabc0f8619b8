//! Payment gateway port
//!
//! The orchestrator creates three kinds of gateway objects: a customer for
//! the buyer, one catalog product per booked seat, and a payment whose
//! hosted link is handed back to the client. The gateway's wire format is
//! an adapter concern; this module only carries the domain view.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use core_kernel::{Currency, CustomerId, DomainPort, Money, PaymentId, PortError, ProductId};

use crate::idempotency::IdempotencyKey;
use crate::inventory::SeatQuote;

/// Buyer details sent to the gateway's customer endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerDetails {
    pub name: String,
    pub email: String,
    pub phone_number: String,
}

/// Billing address attached to a payment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAddress {
    pub street: String,
    pub city: String,
    pub state: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    pub zipcode: String,
}

/// A sellable catalog entry representing one ticket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCatalogProduct {
    pub name: String,
    pub description: String,
    pub price: Money,
}

impl NewCatalogProduct {
    /// Builds the product for one quoted seat of a show
    pub fn for_seat(quote: &SeatQuote) -> Self {
        Self {
            name: format!("{} - Seat {}", quote.movie_name, quote.seat_number),
            description: format!(
                "Ticket for {} (seat {}, booking ref {})",
                quote.movie_name, quote.seat_number, quote.seat_id
            ),
            price: quote.price,
        }
    }
}

/// One line of a payment's product cart
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Correlation data stored on the gateway payment
///
/// Settlement webhooks carry it back, which is how a confirmed payment is
/// traced to its idempotency record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentMetadata {
    pub idempotent_key: IdempotencyKey,
    pub movie_time_slot_id: i32,
    pub booked_seats_id: Vec<i32>,
    pub customer_id: CustomerId,
}

/// Request for a hosted payment link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub customer_id: CustomerId,
    pub billing: BillingAddress,
    pub product_cart: Vec<CartItem>,
    pub currency: Currency,
    pub return_url: String,
    pub metadata: PaymentMetadata,
}

/// Payment created by the gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedPayment {
    pub payment_id: PaymentId,
    pub payment_link: String,
}

/// Port to the external payment gateway
#[async_trait]
pub trait CheckoutGateway: DomainPort {
    /// Creates a gateway customer and returns its id
    async fn create_customer(&self, details: &CustomerDetails) -> Result<CustomerId, PortError>;

    /// Creates a one-time-price catalog product and returns its id
    async fn create_product(&self, product: &NewCatalogProduct) -> Result<ProductId, PortError>;

    /// Creates a payment with `payment_link=true`
    async fn create_payment(&self, request: &PaymentRequest) -> Result<IssuedPayment, PortError>;
}
